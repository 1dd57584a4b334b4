// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Read operations.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use canopy_store_core::path::{PathQuery, ROOT_PATH, is_root_path, normalize_path};
use canopy_store_core::{DataNode, FetchDescendants, Pagination};
use rusqlite::{Connection, OptionalExtension, named_params, params};
use tracing::{debug, warn};

use crate::compiler::{
    CompiledQuery, PATH_MATCH_FUNCTION, Projection, QueryCompiler, QueryScope, json_array,
};
use crate::connection::FragmentStore;
use crate::error::{Error, Result};
use crate::types::{Dataspace, FRAGMENT_COLUMNS, Fragment, OwnedDataNode, Owner};

/// Rows at a normalized `target`: the row stored at that path, or the
/// elements of the list it names.
///
/// Both are range lookups on the `(owner_id, path)` index. Elements of the
/// list `/a/b` sort between `/a/b[@` and `/a/b[A`, and only those rows reach
/// the path matching function.
pub(crate) fn fragments_at(conn: &Connection, owner_id: i64, target: &str) -> Result<Vec<Fragment>> {
    let first = format!("{target}[@");
    let last = format!("{target}[A");
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {FRAGMENT_COLUMNS}
        FROM fragment
        WHERE owner_id = :owner
          AND (path = :target
            OR (path >= :first AND path < :last AND {PATH_MATCH_FUNCTION}(path, :target, 0)))
        ORDER BY id
        "#
    ))?;
    let rows = stmt
        .query_map(
            named_params! {
                ":owner": owner_id,
                ":target": target,
                ":first": first,
                ":last": last,
            },
            Fragment::from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl FragmentStore {
    /// Nodes at `path`: the row itself, or every element when `path` names a
    /// list. The root marker returns all top-level nodes.
    ///
    /// Fails with [`Error::DataNodeNotFound`] when nothing matches.
    pub fn get_data_nodes(
        &self,
        owner: &Owner,
        path: &str,
        fetch: FetchDescendants,
    ) -> Result<Vec<DataNode>> {
        if !is_root_path(path) {
            normalize_path(path)?;
        }
        let nodes = self.get_data_nodes_for_paths(owner, [path], fetch)?;
        if nodes.is_empty() {
            return Err(Error::DataNodeNotFound {
                owner: owner.name.clone(),
                path: path.to_string(),
            });
        }
        Ok(nodes)
    }

    /// Best-effort lookup of many paths; unparsable and missing paths are
    /// left out of the result.
    pub fn get_data_nodes_for_paths<I, S>(
        &self,
        owner: &Owner,
        paths: I,
        fetch: FetchDescendants,
    ) -> Result<Vec<DataNode>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut include_roots = false;
        let mut targets = BTreeSet::new();
        for path in paths {
            let path = path.as_ref();
            if is_root_path(path) {
                include_roots = true;
                continue;
            }
            match normalize_path(path) {
                Ok(normalized) => {
                    targets.insert(normalized);
                }
                Err(e) => warn!(owner = %owner.name, path, error = %e, "skipping unparsable path"),
            }
        }
        if !include_roots && targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = BTreeMap::new();
        if include_roots {
            rows.extend(self.child_fragments(owner.id, None)?.into_iter().map(|f| (f.id, f)));
        }
        for target in &targets {
            rows.extend(
                fragments_at(&self.conn, owner.id, target)?
                    .into_iter()
                    .map(|f| (f.id, f)),
            );
        }

        self.materialize(rows.into_values().collect(), fetch)
    }

    /// Nodes of one owner matching a query path.
    pub fn query_data_nodes(
        &self,
        owner: &Owner,
        path: &str,
        fetch: FetchDescendants,
    ) -> Result<Vec<DataNode>> {
        if is_root_path(path) {
            return self.get_data_nodes_for_paths(owner, [ROOT_PATH], fetch);
        }
        let query = PathQuery::parse(path)?;
        let compiled = QueryCompiler::new().compile(
            &query,
            &QueryScope::Owner(owner.id),
            Projection::Fragments,
            Pagination::None,
        )?;
        let rows = self.query_fragments(&compiled)?;
        debug!(owner = %owner.name, %query, matches = rows.len(), "queried data nodes");
        self.materialize(rows, fetch)
    }

    /// Nodes matching a query path in every owner of a dataspace.
    ///
    /// Pages are made of owners: a page holds all matches of the owners it
    /// covers, taken in owner creation order.
    pub fn query_data_nodes_across_owners(
        &self,
        dataspace: &Dataspace,
        path: &str,
        fetch: FetchDescendants,
        pagination: Pagination,
    ) -> Result<Vec<OwnedDataNode>> {
        if !pagination.is_valid() {
            return Err(Error::Validation(format!(
                "invalid pagination {pagination:?}: page index and size start at 1"
            )));
        }
        let query = PathQuery::parse(path)?;
        let compiler = QueryCompiler::new();

        let scope = if pagination.is_paginated() {
            let compiled = compiler.compile(
                &query,
                &QueryScope::Dataspace(dataspace.id),
                Projection::OwnerIds,
                pagination,
            )?;
            let owner_ids = self.query_owner_ids(&compiled)?;
            if owner_ids.is_empty() {
                return Ok(Vec::new());
            }
            QueryScope::Owners(owner_ids)
        } else {
            QueryScope::Dataspace(dataspace.id)
        };

        let compiled = compiler.compile(&query, &scope, Projection::Fragments, Pagination::None)?;
        let rows = self.query_fragments(&compiled)?;
        let matched: Vec<(i64, i64)> = rows.iter().map(|f| (f.id, f.owner_id)).collect();
        let owner_ids: Vec<i64> = matched
            .iter()
            .map(|(_, owner_id)| *owner_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let names = self.owner_names(&owner_ids)?;
        debug!(
            dataspace = %dataspace.name,
            %query,
            matches = matched.len(),
            owners = owner_ids.len(),
            "queried data nodes across owners"
        );

        let tree = self.prefetch_descendants(rows, fetch)?;
        let mut nodes = Vec::with_capacity(matched.len());
        for (id, owner_id) in matched {
            if let Some(node) = tree.to_data_node(id, fetch)? {
                nodes.push(OwnedDataNode {
                    owner: names.get(&owner_id).cloned().unwrap_or_default(),
                    node,
                });
            }
        }
        Ok(nodes)
    }

    /// Number of owners in `dataspace` with at least one node matching `path`.
    ///
    /// Feed it to [`Pagination::page_count`] to get the number of pages.
    pub fn count_owners_for_path(&self, dataspace: &Dataspace, path: &str) -> Result<usize> {
        let query = PathQuery::parse(path)?;
        let compiled = QueryCompiler::new().compile(
            &query,
            &QueryScope::Dataspace(dataspace.id),
            Projection::OwnerIds,
            Pagination::None,
        )?;
        Ok(self.query_owner_ids(&compiled)?.len())
    }

    /// The row stored at exactly `path` (already normalized).
    pub(crate) fn find_fragment(&self, owner_id: i64, path: &str) -> Result<Option<Fragment>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM fragment WHERE owner_id = ?1 AND path = ?2"
        ))?;
        Ok(stmt
            .query_row(params![owner_id, path], Fragment::from_row)
            .optional()?)
    }

    /// Like [`find_fragment`](Self::find_fragment) for a caller-supplied
    /// path; a missing row is [`Error::DataNodeNotFound`].
    pub(crate) fn get_fragment(&self, owner: &Owner, path: &str) -> Result<Fragment> {
        let normalized = normalize_path(path)?;
        self.find_fragment(owner.id, &normalized)?
            .ok_or_else(|| Error::DataNodeNotFound {
                owner: owner.name.clone(),
                path: path.to_string(),
            })
    }

    /// Direct children of `parent_id`, or the owner's top-level rows.
    pub(crate) fn child_fragments(
        &self,
        owner_id: i64,
        parent_id: Option<i64>,
    ) -> Result<Vec<Fragment>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM fragment WHERE owner_id = ?1 AND parent_id IS ?2 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![owner_id, parent_id], Fragment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn query_fragments(&self, compiled: &CompiledQuery) -> Result<Vec<Fragment>> {
        let mut stmt = self.conn.prepare_cached(&compiled.sql)?;
        let params = compiled.named_params();
        let rows = stmt
            .query_map(&*params, Fragment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn query_owner_ids(&self, compiled: &CompiledQuery) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(&compiled.sql)?;
        let params = compiled.named_params();
        let ids = stmt
            .query_map(&*params, |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn owner_names(&self, owner_ids: &[i64]) -> Result<HashMap<i64, String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, name FROM owner WHERE id IN (SELECT value FROM json_each(?1))")?;
        let names = stmt
            .query_map(params![json_array(owner_ids)?], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn setup() -> (FragmentStore, Owner) {
        let mut store = FragmentStore::open_memory().unwrap();
        let dataspace = store.create_dataspace("test").unwrap();
        let owner = store.create_owner(&dataspace, "owner").unwrap();
        store
            .store_data_node(
                &owner,
                &DataNode::new("/a")
                    .with_child(DataNode::new("/a/b[@k='1']"))
                    .with_child(
                        DataNode::new("/a/b[@k='2']").with_child(DataNode::new("/a/b[@k='2']/c")),
                    )
                    .with_child(DataNode::new("/a/bc[@k='1']"))
                    .with_child(DataNode::new("/a/b-c")),
            )
            .unwrap();
        (store, owner)
    }

    #[rstest]
    #[case::container("/a", &["/a"])]
    #[case::list("/a/b", &["/a/b[@k='1']", "/a/b[@k='2']"])]
    #[case::element("/a/b[@k='2']", &["/a/b[@k='2']"])]
    #[case::longer_list_name("/a/bc", &["/a/bc[@k='1']"])]
    #[case::punctuation_after_name("/a/b-c", &["/a/b-c"])]
    #[case::child_of_element("/a/b[@k='2']/c", &["/a/b[@k='2']/c"])]
    #[case::missing("/a/d", &[])]
    fn test_fragments_at(#[case] target: &str, #[case] expected: &[&str]) {
        let (store, owner) = setup();
        let rows = fragments_at(&store.conn, owner.id, target).unwrap();
        let paths: Vec<&str> = rows.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn test_other_owner_rows_excluded() {
        let (mut store, owner) = setup();
        let dataspace = store.resolve_dataspace("test").unwrap();
        let other = store.create_owner(&dataspace, "other").unwrap();
        store
            .store_data_node(&other, &DataNode::new("/a").with_child(DataNode::new("/a/b[@k='9']")))
            .unwrap();
        assert_eq!(fragments_at(&store.conn, owner.id, "/a/b").unwrap().len(), 2);
        assert_eq!(fragments_at(&store.conn, other.id, "/a/b").unwrap().len(), 1);
    }
}
