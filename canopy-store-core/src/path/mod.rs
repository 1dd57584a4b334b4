// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Path expressions addressing nodes of a tree.
//!
//! A path is a `/` separated list of node names. List elements carry their
//! key predicates (`/bookstore/categories[@code='1']`). A query path may in
//! addition start with `//` (match anywhere), filter the final step with leaf
//! conditions, `contains()` or `text()` functions, and select an ancestor of
//! the matches with a trailing `/ancestor::name` axis.
//!
//! ```
//! use canopy_store_core::path::{PathQuery, PrefixType};
//!
//! let query: PathQuery = "//books[@price>10 and @lang=\"en\"]/ancestor::categories"
//!     .parse()
//!     .unwrap();
//! assert_eq!(query.prefix_type(), PrefixType::Descendant);
//! assert_eq!(query.descendant_name(), Some("books"));
//! assert_eq!(query.leaf_conditions().len(), 2);
//! assert_eq!(query.ancestor_schema_node_identifier(), Some("categories"));
//! ```

mod parser;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Reserved path of a tree's root marker.
pub const ROOT_PATH: &str = "/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("failed to parse path '{path}': {reason}")]
    Syntax { path: String, reason: String },

    #[error("operator '{operator}' on leaf '{leaf}' can only be used with an integer value")]
    InvalidComparison {
        leaf: String,
        operator: ComparisonOperator,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefixType {
    /// `/a/b`: anchored at the tree roots.
    Absolute,
    /// `//b`: matches at any depth.
    Descendant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
}

impl ComparisonOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Ge => ">=",
            ComparisonOperator::Le => "<=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BooleanOperator {
    And,
    Or,
}

impl BooleanOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            BooleanOperator::And => "and",
            BooleanOperator::Or => "or",
        }
    }
}

impl fmt::Display for BooleanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal on the right hand side of a leaf condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComparisonValue {
    Integer(i64),
    Text(String),
}

impl fmt::Display for ComparisonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonValue::Integer(n) => write!(f, "{n}"),
            ComparisonValue::Text(s) => f.write_str(&quote(s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeafCondition {
    pub name: String,
    pub operator: ComparisonOperator,
    pub value: ComparisonValue,
}

impl fmt::Display for LeafCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}{}{}", self.name, self.operator, self.value)
    }
}

/// `/leaf[text()='value']`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextFunctionCondition {
    pub leaf_name: String,
    pub value: String,
}

/// `[contains(@leaf,'value')]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainsFunctionCondition {
    pub leaf_name: String,
    pub value: String,
}

/// Parsed form of a query path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuery {
    pub(crate) prefix_type: PrefixType,
    pub(crate) xpath_prefix: String,
    pub(crate) normalized_xpath: String,
    pub(crate) normalized_parent_path: String,
    pub(crate) descendant_name: Option<String>,
    pub(crate) leaf_conditions: Vec<LeafCondition>,
    pub(crate) boolean_operators: Vec<BooleanOperator>,
    pub(crate) ancestor_schema_node_identifier: Option<String>,
    pub(crate) text_function_condition: Option<TextFunctionCondition>,
    pub(crate) contains_function_condition: Option<ContainsFunctionCondition>,
}

impl PathQuery {
    /// Parse and normalize a query path.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        parser::parse(path)
    }

    pub fn prefix_type(&self) -> PrefixType {
        self.prefix_type
    }

    pub fn is_absolute(&self) -> bool {
        self.prefix_type == PrefixType::Absolute
    }

    /// The path of the matched nodes without their final-step conditions,
    /// e.g. `/a/b[@k='1']/c` for `/a/b[@k='1']/c[@x=2]`.
    pub fn xpath_prefix(&self) -> &str {
        &self.xpath_prefix
    }

    /// The complete path in canonical form.
    pub fn normalized_xpath(&self) -> &str {
        &self.normalized_xpath
    }

    /// Path of the parent of the matched nodes; empty for top-level nodes and
    /// descendant queries.
    pub fn normalized_parent_path(&self) -> &str {
        &self.normalized_parent_path
    }

    /// For `//b/c` this is `b/c`; `None` for absolute queries.
    pub fn descendant_name(&self) -> Option<&str> {
        self.descendant_name.as_deref()
    }

    pub fn leaf_conditions(&self) -> &[LeafCondition] {
        &self.leaf_conditions
    }

    /// Connectives between consecutive leaf conditions, in query order.
    pub fn boolean_operators(&self) -> &[BooleanOperator] {
        &self.boolean_operators
    }

    pub fn ancestor_schema_node_identifier(&self) -> Option<&str> {
        self.ancestor_schema_node_identifier.as_deref()
    }

    pub fn text_function_condition(&self) -> Option<&TextFunctionCondition> {
        self.text_function_condition.as_ref()
    }

    pub fn contains_function_condition(&self) -> Option<&ContainsFunctionCondition> {
        self.contains_function_condition.as_ref()
    }

    pub fn has_ancestor_axis(&self) -> bool {
        self.ancestor_schema_node_identifier.is_some()
    }

    pub fn has_leaf_conditions(&self) -> bool {
        !self.leaf_conditions.is_empty()
    }

    pub fn has_text_function_condition(&self) -> bool {
        self.text_function_condition.is_some()
    }

    pub fn has_contains_function_condition(&self) -> bool {
        self.contains_function_condition.is_some()
    }

    /// The ancestor axis target as a descendant query (`//identifier`).
    pub fn ancestor_query(&self) -> Option<Result<PathQuery, PathError>> {
        self.ancestor_schema_node_identifier
            .as_ref()
            .map(|identifier| PathQuery::parse(&format!("//{identifier}")))
    }

    /// Whether the path addresses a single list element, e.g. `/a/b[@k='1']`.
    pub fn is_path_to_list_element(&self) -> bool {
        self.is_absolute()
            && self.has_leaf_conditions()
            && !self.has_text_function_condition()
            && !self.has_contains_function_condition()
            && !self.has_ancestor_axis()
    }
}

impl FromStr for PathQuery {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathQuery::parse(s)
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized_xpath)
    }
}

/// Whether `path` is the root marker (`/` or empty).
pub fn is_root_path(path: &str) -> bool {
    path.is_empty() || path == ROOT_PATH
}

/// Canonical form of a path; the root marker normalizes to [`ROOT_PATH`].
pub fn normalize_path(path: &str) -> Result<String, PathError> {
    if is_root_path(path) {
        return Ok(ROOT_PATH.to_string());
    }
    Ok(PathQuery::parse(path)?.normalized_xpath)
}

/// Whether `path` parses to an absolute path ending in a key predicate.
pub fn is_path_to_list_element(path: &str) -> bool {
    PathQuery::parse(path).is_ok_and(|query| query.is_path_to_list_element())
}

pub(crate) fn quote(value: &str) -> String {
    if value.contains('\'') {
        format!("\"{value}\"")
    } else {
        format!("'{value}'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case::root("/", "/")]
    #[case::empty("", "/")]
    #[case::container("/bookstore", "/bookstore")]
    #[case::double_quotes("/bookstore/categories[@code=\"1\"]", "/bookstore/categories[@code='1']")]
    #[case::spaces("/bookstore/categories[ @code = '1' ]", "/bookstore/categories[@code='1']")]
    #[case::integer_key("/a/b[@id=2]/c", "/a/b[@id=2]/c")]
    #[case::quote_inside("/a/b[@name=\"O'Neil\"]", "/a/b[@name=\"O'Neil\"]")]
    #[case::multiple_keys(
        "/a/b[@k1='x'   and @k2=\"y\"]",
        "/a/b[@k1='x' and @k2='y']"
    )]
    fn test_normalize_path(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_path(input).unwrap(), expected);
    }

    #[rstest]
    #[case::element("/a/b[@k='1']", true)]
    #[case::container("/a/b", false)]
    #[case::nested_container("/a/b[@k='1']/c", false)]
    #[case::descendant("//b[@k='1']", false)]
    #[case::garbage("a/b", false)]
    fn test_is_path_to_list_element(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_path_to_list_element(path), expected);
    }

    #[test]
    fn test_ancestor_query() {
        let query = PathQuery::parse("//z/ancestor::x/y[@id='1']").unwrap();
        let ancestor = query.ancestor_query().unwrap().unwrap();
        assert_eq!(ancestor.prefix_type(), PrefixType::Descendant);
        assert_eq!(ancestor.descendant_name(), Some("x/y"));
        assert_eq!(ancestor.leaf_conditions().len(), 1);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(
            steps in prop::collection::vec("[a-z][a-z0-9_-]{0,6}", 1..4),
            key in "[a-z0-9 ]{0,5}",
            n in any::<i32>(),
        ) {
            let path = format!("/{}[ @k=\"{key}\"  and @n = {n}]", steps.join("/"));
            let once = normalize_path(&path).unwrap();
            prop_assert_eq!(normalize_path(&once).unwrap(), once);
        }
    }
}
