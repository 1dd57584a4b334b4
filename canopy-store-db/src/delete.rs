// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Delete operations.
//!
//! Deleting a row removes its whole subtree through the `parent_id` cascade.
//! A path naming a list deletes every element of that list.

use std::collections::{BTreeMap, BTreeSet};

use canopy_store_core::path::{PathQuery, is_root_path, normalize_path};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::compiler::json_array;
use crate::connection::FragmentStore;
use crate::error::{Error, Result};
use crate::query::fragments_at;
use crate::types::{Dataspace, Owner, WriteSummary};

fn matching_rows(conn: &Connection, owner_id: i64, target: &str) -> Result<Vec<(i64, String)>> {
    Ok(fragments_at(conn, owner_id, target)?
        .into_iter()
        .map(|fragment| (fragment.id, fragment.path))
        .collect())
}

fn delete_ids(conn: &Connection, ids: &[i64]) -> Result<usize> {
    Ok(conn
        .prepare_cached("DELETE FROM fragment WHERE id IN (SELECT value FROM json_each(?1))")?
        .execute(params![json_array(ids)?])?)
}

impl FragmentStore {
    /// Delete every node addressed by `paths`, all or nothing.
    ///
    /// If any path is unparsable or matches nothing, no row is deleted and
    /// [`Error::DataNodesNotFound`] lists every such path. The root marker
    /// deletes the whole tree.
    pub fn delete_data_nodes<I, S>(&mut self, owner: &Owner, paths: I) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths: Vec<String> = paths.into_iter().map(|p| p.as_ref().to_string()).collect();
        if paths.iter().any(|p| is_root_path(p)) {
            return self.delete_all_data_nodes(owner);
        }

        let tx = self.conn.transaction()?;
        let mut ids = BTreeSet::new();
        let mut unresolved = BTreeSet::new();
        for path in &paths {
            let Ok(target) = normalize_path(path) else {
                unresolved.insert(path.clone());
                continue;
            };
            let rows = matching_rows(&tx, owner.id, &target)?;
            if rows.is_empty() {
                unresolved.insert(path.clone());
            }
            ids.extend(rows.into_iter().map(|(id, _)| id));
        }
        if !unresolved.is_empty() {
            return Err(Error::DataNodesNotFound {
                owner: owner.name.clone(),
                paths: unresolved,
            });
        }

        let ids: Vec<i64> = ids.into_iter().collect();
        let subtrees_deleted = delete_ids(&tx, &ids)?;
        tx.commit()?;
        debug!(owner = %owner.name, paths = paths.len(), subtrees_deleted, "deleted data nodes");
        Ok(WriteSummary {
            subtrees_deleted,
            ..WriteSummary::default()
        })
    }

    /// Delete one node, or every element of the list `path` names.
    pub fn delete_data_node(&mut self, owner: &Owner, path: &str) -> Result<WriteSummary> {
        if is_root_path(path) {
            return self.delete_all_data_nodes(owner);
        }
        let target = normalize_path(path)?;
        let rows = matching_rows(&self.conn, owner.id, &target)?;
        self.delete_matched(owner, path, rows)
    }

    /// Like [`delete_data_node`](Self::delete_data_node), but `path` must
    /// name a list element or a whole list.
    pub fn delete_list_data_node(&mut self, owner: &Owner, path: &str) -> Result<WriteSummary> {
        let query = PathQuery::parse(path)?;
        let target = query.normalized_xpath();
        let rows = matching_rows(&self.conn, owner.id, target)?;
        if !query.is_path_to_list_element() && rows.iter().any(|(_, p)| p == target) {
            return Err(Error::Validation(format!(
                "'{path}' is neither a list nor a list element"
            )));
        }
        self.delete_matched(owner, path, rows)
    }

    /// Delete every tree of `owner`; the owner itself is kept.
    pub fn delete_all_data_nodes(&mut self, owner: &Owner) -> Result<WriteSummary> {
        let subtrees_deleted = self
            .conn
            .prepare_cached("DELETE FROM fragment WHERE owner_id = ?1 AND parent_id IS NULL")?
            .execute(params![owner.id])?;
        info!(owner = %owner.name, subtrees_deleted, "deleted all data nodes");
        Ok(WriteSummary {
            subtrees_deleted,
            ..WriteSummary::default()
        })
    }

    /// Delete every tree of the named owners in `dataspace`, in one
    /// transaction. Names without an owner are ignored.
    ///
    /// Returns the summary per owner name that exists.
    pub fn delete_data_nodes_for_owners<I, S>(
        &mut self,
        dataspace: &Dataspace,
        names: I,
    ) -> Result<BTreeMap<String, WriteSummary>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        let tx = self.conn.transaction()?;
        let owners: Vec<(i64, String)> = tx
            .prepare_cached(
                r#"
                SELECT id, name FROM owner
                WHERE dataspace_id = ?1 AND name IN (SELECT value FROM json_each(?2))
                ORDER BY id
                "#,
            )?
            .query_map(params![dataspace.id, json_array(&names)?], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut summaries = BTreeMap::new();
        {
            let mut stmt = tx.prepare_cached(
                "DELETE FROM fragment WHERE owner_id = ?1 AND parent_id IS NULL",
            )?;
            for (id, name) in owners {
                let subtrees_deleted = stmt.execute(params![id])?;
                summaries.insert(
                    name,
                    WriteSummary {
                        subtrees_deleted,
                        ..WriteSummary::default()
                    },
                );
            }
        }
        tx.commit()?;
        info!(dataspace = %dataspace.name, requested = names.len(), owners = summaries.len(), "deleted data nodes of owners");
        Ok(summaries)
    }

    fn delete_matched(
        &mut self,
        owner: &Owner,
        path: &str,
        rows: Vec<(i64, String)>,
    ) -> Result<WriteSummary> {
        if rows.is_empty() {
            return Err(Error::DataNodeNotFound {
                owner: owner.name.clone(),
                path: path.to_string(),
            });
        }
        let ids: Vec<i64> = rows.into_iter().map(|(id, _)| id).collect();
        let tx = self.conn.transaction()?;
        let subtrees_deleted = delete_ids(&tx, &ids)?;
        tx.commit()?;
        debug!(owner = %owner.name, path, subtrees_deleted, "deleted data node");
        Ok(WriteSummary {
            subtrees_deleted,
            ..WriteSummary::default()
        })
    }
}
