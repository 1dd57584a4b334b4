// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Compile a [`PathQuery`] into SQL over the `fragment` table.
//!
//! Leaves live in the `attributes` JSON document and are read with
//! `json_extract`/`json_each`. Path matching goes through the
//! `canopy_path_matches` SQL function (see [`path_matches`]), which the
//! connection registers on open. Every value is bound as a named parameter;
//! nothing from the query text is spliced into the SQL.

use canopy_store_core::Pagination;
use canopy_store_core::path::{
    BooleanOperator, ComparisonOperator, ComparisonValue, LeafCondition, PathError, PathQuery,
    PrefixType,
};
use rusqlite::ToSql;
use rusqlite::types::Value;
use tracing::trace;

use crate::error::Result;

/// Name of the path matching function registered on every connection.
pub(crate) const PATH_MATCH_FUNCTION: &str = "canopy_path_matches";

/// Whether `path` is the node `target` names, or one of its list elements.
///
/// For an absolute target the path must equal it, optionally followed by a
/// single key predicate (`/a/b` matches `/a/b` and `/a/b[@k='1']`). For a
/// descendant target the path must end with `/target`, again optionally
/// followed by one key predicate. A list path does not match the elements of
/// a nested list.
pub(crate) fn path_matches(path: &str, target: &str, descendant: bool) -> bool {
    if !descendant {
        return path == target || path.strip_prefix(target).is_some_and(is_key_predicate);
    }
    let suffix = format!("/{target}");
    if path.ends_with(&suffix) {
        return true;
    }
    let element = format!("{suffix}[@");
    path.match_indices(&element)
        .any(|(at, _)| is_key_predicate(&path[at + suffix.len()..]))
}

/// Whether `s` is exactly one `[@...]` predicate. Brackets inside quoted
/// values do not count.
fn is_key_predicate(s: &str) -> bool {
    if !s.starts_with("[@") {
        return false;
    }
    let mut quote = None;
    for (at, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => return false,
            (None, ']') => return at + 1 == s.len(),
            (None, _) => {}
        }
    }
    false
}

/// Which owners a query searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QueryScope {
    Owner(i64),
    Dataspace(i64),
    Owners(Vec<i64>),
}

/// What a compiled query selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Projection {
    /// Fragment rows, ordered by id
    Fragments,
    /// Distinct owner ids, ordered by id
    OwnerIds,
}

/// SQL text plus its named parameters.
#[derive(Debug, Default)]
pub(crate) struct CompiledQuery {
    pub(crate) sql: String,
    params: Vec<(String, Value)>,
}

impl CompiledQuery {
    /// Bind a value and return the placeholder naming it.
    fn bind(&mut self, value: impl Into<Value>) -> String {
        let name = format!(":p{}", self.params.len());
        self.params.push((name.clone(), value.into()));
        name
    }

    pub(crate) fn named_params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}

/// Serialize an id set for `json_each`.
pub(crate) fn json_array<T: serde::Serialize>(values: &[T]) -> Result<String> {
    Ok(serde_json::to_string(values)?)
}

fn json_path(leaf: &str) -> String {
    format!("$.\"{leaf}\"")
}

/// Stateless; construct one per query.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct QueryCompiler;

impl QueryCompiler {
    pub(crate) fn new() -> Self {
        QueryCompiler
    }

    pub(crate) fn compile(
        &self,
        query: &PathQuery,
        scope: &QueryScope,
        projection: Projection,
        pagination: Pagination,
    ) -> Result<CompiledQuery> {
        let mut compiled = CompiledQuery::default();
        let conditions = self.node_conditions(&mut compiled, query, scope, "fragment")?;

        let (with, alias, filter) = match query.ancestor_query() {
            None => (String::new(), "fragment", conditions),
            Some(ancestor) => {
                let ancestor = ancestor?;
                let (with, filter) = self.ancestor_walk(&mut compiled, &ancestor, &conditions)?;
                (with, "ancestors", filter)
            }
        };

        let select = match projection {
            Projection::Fragments => format!(
                "SELECT {alias}.id, {alias}.owner_id, {alias}.path, {alias}.parent_id, {alias}.attributes"
            ),
            Projection::OwnerIds => format!("SELECT DISTINCT {alias}.owner_id"),
        };
        let order = match projection {
            Projection::Fragments => format!("ORDER BY {alias}.id"),
            Projection::OwnerIds => format!("ORDER BY {alias}.owner_id"),
        };
        compiled.sql = format!("{with}{select} FROM {alias} WHERE {filter} {order}");

        if let Pagination::Page { size, .. } = pagination {
            let limit = compiled.bind(i64::from(size));
            let offset = compiled.bind(pagination.offset() as i64);
            compiled.sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        trace!(query = %query, sql = %compiled.sql, "compiled path query");
        Ok(compiled)
    }

    /// Conditions selecting the nodes the path itself names.
    fn node_conditions(
        &self,
        compiled: &mut CompiledQuery,
        query: &PathQuery,
        scope: &QueryScope,
        alias: &str,
    ) -> Result<String> {
        let mut conditions = vec![self.scope_clause(compiled, scope, alias)?];

        match query.prefix_type() {
            PrefixType::Absolute => {
                conditions.push(self.path_clause(compiled, alias, query.xpath_prefix(), false));
                conditions.push(self.parent_clause(compiled, query, scope, alias));
            }
            PrefixType::Descendant => {
                let name = query.descendant_name().unwrap_or_default();
                conditions.push(self.path_clause(compiled, alias, name, true));
            }
        }

        if let Some(leaves) = self.leaf_conditions(compiled, query, alias)? {
            conditions.push(leaves);
        }
        if let Some(text) = query.text_function_condition() {
            let leaf = compiled.bind(json_path(&text.leaf_name));
            let mut matches = format!("leaf_value.value = {}", compiled.bind(text.value.clone()));
            // Integer leaves are stored as JSON numbers.
            if let Ok(number) = text.value.parse::<i64>() {
                matches.push_str(&format!(" OR leaf_value.value = {}", compiled.bind(number)));
            }
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM json_each({alias}.attributes, {leaf}) AS leaf_value \
                 WHERE leaf_value.type NOT IN ('object', 'array') AND ({matches}))"
            ));
        }
        if let Some(contains) = query.contains_function_condition() {
            let leaf = compiled.bind(json_path(&contains.leaf_name));
            let value = compiled.bind(contains.value.clone());
            conditions.push(format!(
                "instr(CAST(json_extract({alias}.attributes, {leaf}) AS TEXT), {value}) > 0"
            ));
        }
        Ok(conditions.join(" AND "))
    }

    fn scope_clause(
        &self,
        compiled: &mut CompiledQuery,
        scope: &QueryScope,
        alias: &str,
    ) -> Result<String> {
        Ok(match scope {
            QueryScope::Owner(owner_id) => {
                format!("{alias}.owner_id = {}", compiled.bind(*owner_id))
            }
            QueryScope::Dataspace(dataspace_id) => format!(
                "{alias}.owner_id IN (SELECT owner.id FROM owner WHERE owner.dataspace_id = {})",
                compiled.bind(*dataspace_id)
            ),
            QueryScope::Owners(owner_ids) => format!(
                "{alias}.owner_id IN (SELECT value FROM json_each({}))",
                compiled.bind(json_array(owner_ids)?)
            ),
        })
    }

    fn path_clause(
        &self,
        compiled: &mut CompiledQuery,
        alias: &str,
        target: &str,
        descendant: bool,
    ) -> String {
        format!(
            "{PATH_MATCH_FUNCTION}({alias}.path, {}, {})",
            compiled.bind(target.to_string()),
            i64::from(descendant)
        )
    }

    /// Absolute queries also pin the parent row, which the `parent_id`
    /// index answers without scanning the owner's rows.
    fn parent_clause(
        &self,
        compiled: &mut CompiledQuery,
        query: &PathQuery,
        scope: &QueryScope,
        alias: &str,
    ) -> String {
        let parent_path = query.normalized_parent_path();
        if parent_path.is_empty() {
            return format!("{alias}.parent_id IS NULL");
        }
        let parent_path = compiled.bind(parent_path.to_string());
        match scope {
            QueryScope::Owner(owner_id) => format!(
                "{alias}.parent_id = (SELECT parent.id FROM fragment parent \
                 WHERE parent.owner_id = {} AND parent.path = {parent_path})",
                compiled.bind(*owner_id)
            ),
            QueryScope::Dataspace(_) | QueryScope::Owners(_) => format!(
                "{alias}.parent_id IN (SELECT parent.id FROM fragment parent \
                 WHERE parent.path = {parent_path})"
            ),
        }
    }

    /// Fold the conditions strictly left to right: `a or b and c` is
    /// `((a or b) and c)`.
    fn leaf_conditions(
        &self,
        compiled: &mut CompiledQuery,
        query: &PathQuery,
        alias: &str,
    ) -> Result<Option<String>> {
        let mut folded: Option<String> = None;
        for (i, condition) in query.leaf_conditions().iter().enumerate() {
            let predicate = self.leaf_predicate(compiled, condition, alias)?;
            folded = Some(match folded {
                None => predicate,
                Some(previous) => {
                    let operator = match query.boolean_operators().get(i - 1) {
                        Some(BooleanOperator::Or) => "OR",
                        _ => "AND",
                    };
                    format!("({previous} {operator} {predicate})")
                }
            });
        }
        Ok(folded.map(|sql| format!("({sql})")))
    }

    /// Quoted values match the leaf's text form, so `'1'` matches both `"1"`
    /// and `1`. Integers compare numerically against JSON numbers and against
    /// strings that hold an integer.
    fn leaf_predicate(
        &self,
        compiled: &mut CompiledQuery,
        condition: &LeafCondition,
        alias: &str,
    ) -> Result<String> {
        let operator = condition.operator.as_str();
        match &condition.value {
            ComparisonValue::Integer(number) => {
                let leaf = compiled.bind(json_path(&condition.name));
                let value = compiled.bind(*number);
                let stored = format!("json_extract({alias}.attributes, {leaf})");
                Ok(format!(
                    "((CASE json_type({alias}.attributes, {leaf}) \
                     WHEN 'integer' THEN {stored} \
                     WHEN 'real' THEN {stored} \
                     WHEN 'text' THEN CASE WHEN CAST(CAST({stored} AS INTEGER) AS TEXT) = {stored} \
                     THEN CAST({stored} AS INTEGER) END \
                     END) {operator} {value})"
                ))
            }
            ComparisonValue::Text(text) if condition.operator == ComparisonOperator::Eq => {
                let leaf = compiled.bind(json_path(&condition.name));
                let value = compiled.bind(text.clone());
                Ok(format!(
                    "((CASE json_type({alias}.attributes, {leaf}) \
                     WHEN 'object' THEN NULL WHEN 'array' THEN NULL \
                     WHEN 'true' THEN 'true' WHEN 'false' THEN 'false' \
                     ELSE CAST(json_extract({alias}.attributes, {leaf}) AS TEXT) \
                     END) = {value})"
                ))
            }
            ComparisonValue::Text(_) => Err(PathError::InvalidComparison {
                leaf: condition.name.clone(),
                operator: condition.operator,
            }
            .into()),
        }
    }

    /// Walk up from the parents of the matched nodes until a row matches the
    /// ancestor path; those rows are the result.
    fn ancestor_walk(
        &self,
        compiled: &mut CompiledQuery,
        ancestor: &PathQuery,
        matches: &str,
    ) -> Result<(String, String)> {
        let target = ancestor.descendant_name().unwrap_or_default();
        let stop = self.path_clause(compiled, "ancestors", target, true);
        let with = format!(
            "WITH RECURSIVE ancestors(id, owner_id, path, parent_id, attributes) AS (\
             SELECT parent.id, parent.owner_id, parent.path, parent.parent_id, parent.attributes \
             FROM fragment parent \
             WHERE parent.id IN (SELECT fragment.parent_id FROM fragment WHERE {matches}) \
             UNION \
             SELECT fragment.id, fragment.owner_id, fragment.path, fragment.parent_id, fragment.attributes \
             FROM fragment JOIN ancestors ON ancestors.parent_id = fragment.id \
             WHERE NOT {stop}) "
        );
        let mut filter = vec![self.path_clause(compiled, "ancestors", target, true)];
        if let Some(leaves) = self.leaf_conditions(compiled, ancestor, "ancestors")? {
            filter.push(leaves);
        }
        Ok((with, filter.join(" AND ")))
    }
}
