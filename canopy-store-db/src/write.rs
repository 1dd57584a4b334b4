// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Write operations: storing, adding, updating and replacing nodes.

use std::collections::{BTreeMap, HashMap};

use canopy_store_core::path::{PathQuery, is_path_to_list_element, is_root_path, normalize_path};
use canopy_store_core::{DataNode, DataNodeError, FetchDescendants, Leaves};
use tracing::{debug, warn};

use crate::connection::FragmentStore;
use crate::error::{Error, Result};
use crate::mapping::{
    FragmentTree, PendingFragment, deserialize_leaves, serialize_leaves, to_pending_fragments,
};
use crate::retry::{WriteOp, apply_as_unit, apply_with_fallback};
use crate::types::{Owner, WriteSummary};

/// Queue the writes that turn the stored subtree at `id` into `incoming`.
///
/// Attributes are rewritten only when the leaves differ. Children are
/// matched by path: matches recurse, new children are inserted whole and
/// children missing from `incoming` are deleted.
fn reconcile(
    tree: &FragmentTree,
    id: i64,
    incoming: &PendingFragment,
    ops: &mut Vec<WriteOp>,
) -> Result<()> {
    let Some(existing) = tree.get(id) else {
        return Ok(());
    };
    if deserialize_leaves(&existing.attributes)? != deserialize_leaves(&incoming.attributes)? {
        ops.push(WriteOp::UpdateAttributes {
            id,
            path: existing.path.clone(),
            expected: existing.attributes.clone(),
            attributes: incoming.attributes.clone(),
        });
    }

    let mut existing_children: HashMap<&str, i64> = tree
        .children_of(id)
        .iter()
        .filter_map(|child| tree.get(*child))
        .map(|child| (child.path.as_str(), child.id))
        .collect();
    for child in &incoming.children {
        match existing_children.remove(child.path.as_str()) {
            Some(child_id) => reconcile(tree, child_id, child, ops)?,
            None => ops.push(WriteOp::Insert {
                parent_id: Some(id),
                fragment: child.clone(),
            }),
        }
    }
    let mut orphans: Vec<(&str, i64)> = existing_children.into_iter().collect();
    orphans.sort_unstable();
    for (path, child_id) in orphans {
        ops.push(WriteOp::Delete {
            id: child_id,
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Flatten `nodes` and check each lies under `parent` (normalized).
fn pending_children(parent: &str, nodes: &[DataNode]) -> Result<Vec<PendingFragment>> {
    let mut pending = Vec::new();
    for node in nodes {
        for fragment in to_pending_fragments(node)? {
            let inside = is_root_path(parent)
                || fragment
                    .path
                    .strip_prefix(parent)
                    .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'));
            if !inside {
                return Err(DataNodeError::ChildOutsideParent {
                    parent: parent.to_string(),
                    child: fragment.path,
                }
                .into());
            }
            pending.push(fragment);
        }
    }
    Ok(pending)
}

impl FragmentStore {
    /// Store one new tree; see [`store_data_nodes`](Self::store_data_nodes).
    pub fn store_data_node(&mut self, owner: &Owner, node: &DataNode) -> Result<WriteSummary> {
        self.store_data_nodes(owner, std::slice::from_ref(node))
    }

    /// Store new trees as top-level nodes of `owner`.
    ///
    /// Rows whose path already exists are reported together in
    /// [`Error::AlreadyExists`]; all other rows are stored.
    pub fn store_data_nodes(&mut self, owner: &Owner, nodes: &[DataNode]) -> Result<WriteSummary> {
        let mut ops = Vec::new();
        let mut rows = 0;
        for node in nodes {
            for fragment in to_pending_fragments(node)? {
                rows += fragment.row_count();
                ops.push(WriteOp::Insert {
                    parent_id: None,
                    fragment,
                });
            }
        }
        debug!(owner = %owner.name, trees = ops.len(), rows, "storing data nodes");
        apply_with_fallback(&mut self.conn, owner, ops)?.into_result(owner)
    }

    /// Insert new subtrees under the node at `parent_path` (`/` for new
    /// top-level nodes).
    pub fn add_child_data_nodes(
        &mut self,
        owner: &Owner,
        parent_path: &str,
        nodes: &[DataNode],
    ) -> Result<WriteSummary> {
        let (parent_id, parent) = if is_root_path(parent_path) {
            (None, parent_path.to_string())
        } else {
            let parent = self.get_fragment(owner, parent_path)?;
            (Some(parent.id), parent.path)
        };
        let ops = pending_children(&parent, nodes)?
            .into_iter()
            .map(|fragment| WriteOp::Insert {
                parent_id,
                fragment,
            })
            .collect();
        apply_with_fallback(&mut self.conn, owner, ops)?.into_result(owner)
    }

    /// Like [`add_child_data_nodes`](Self::add_child_data_nodes), for list
    /// elements only.
    pub fn add_list_elements(
        &mut self,
        owner: &Owner,
        parent_path: &str,
        elements: &[DataNode],
    ) -> Result<WriteSummary> {
        if let Some(node) = elements.iter().find(|n| !is_path_to_list_element(n.path())) {
            return Err(Error::Validation(format!(
                "'{}' is not a list element",
                node.path()
            )));
        }
        self.add_child_data_nodes(owner, parent_path, elements)
    }

    /// Merge `leaves` into the node at `path`; see
    /// [`batch_update_data_leaves`](Self::batch_update_data_leaves).
    pub fn update_data_leaves(
        &mut self,
        owner: &Owner,
        path: &str,
        leaves: Leaves,
    ) -> Result<WriteSummary> {
        let path = normalize_path(path)?;
        self.batch_update_data_leaves(owner, &BTreeMap::from([(path, leaves)]))
    }

    /// Merge leaves into existing nodes, keyed by node path.
    ///
    /// Supplied leaves replace stored values of the same name; other stored
    /// leaves are kept. Unparsable or missing paths are logged and skipped.
    pub fn batch_update_data_leaves(
        &mut self,
        owner: &Owner,
        updates: &BTreeMap<String, Leaves>,
    ) -> Result<WriteSummary> {
        let mut ops = Vec::new();
        for (path, leaves) in updates {
            let normalized = match normalize_path(path) {
                Ok(normalized) => normalized,
                Err(e) => {
                    warn!(owner = %owner.name, %path, error = %e, "skipping leaf update of unparsable path");
                    continue;
                }
            };
            let Some(fragment) = self.find_fragment(owner.id, &normalized)? else {
                warn!(owner = %owner.name, %path, "skipping leaf update of missing node");
                continue;
            };
            let existing = deserialize_leaves(&fragment.attributes)?;
            let mut merged = existing.clone();
            merged.extend(leaves.iter().map(|(k, v)| (k.clone(), v.clone())));
            if merged == existing {
                continue;
            }
            ops.push(WriteOp::UpdateAttributes {
                id: fragment.id,
                path: fragment.path,
                expected: fragment.attributes,
                attributes: serialize_leaves(&merged)?,
            });
        }
        apply_with_fallback(&mut self.conn, owner, ops)?.into_result(owner)
    }

    /// Make the stored subtrees equal to `nodes`.
    ///
    /// Each node must already exist; missing ones are logged and skipped.
    /// Unchanged rows are not written, so repeating a call rewrites nothing.
    pub fn update_data_nodes_and_descendants(
        &mut self,
        owner: &Owner,
        nodes: &[DataNode],
    ) -> Result<WriteSummary> {
        let mut targets = Vec::new();
        let mut roots = Vec::new();
        for node in nodes {
            for fragment in to_pending_fragments(node)? {
                match self.find_fragment(owner.id, &fragment.path)? {
                    Some(existing) => {
                        targets.push((existing.id, fragment));
                        roots.push(existing);
                    }
                    None => {
                        warn!(owner = %owner.name, path = %fragment.path, "skipping update of missing node");
                    }
                }
            }
        }

        let tree = self.prefetch_descendants(roots, FetchDescendants::All)?;
        let mut ops = Vec::new();
        for (id, fragment) in &targets {
            reconcile(&tree, *id, fragment, &mut ops)?;
        }
        debug!(
            owner = %owner.name,
            nodes = targets.len(),
            rows = tree.len(),
            operations = ops.len(),
            "reconciled update"
        );
        apply_with_fallback(&mut self.conn, owner, ops)?.into_result(owner)
    }

    /// Replace every element of one list under `parent_path` with `elements`.
    ///
    /// Elements whose path already exists are reconciled in place, other
    /// existing elements of the list are deleted and new ones inserted. The
    /// whole replacement commits or fails as one unit.
    pub fn replace_list_content(
        &mut self,
        owner: &Owner,
        parent_path: &str,
        elements: &[DataNode],
    ) -> Result<WriteSummary> {
        let Some(first) = elements.first() else {
            return Err(Error::Validation(
                "a list cannot be replaced with no elements".to_string(),
            ));
        };
        let (parent_id, parent) = if is_root_path(parent_path) {
            (None, parent_path.to_string())
        } else {
            let parent = self.get_fragment(owner, parent_path)?;
            (Some(parent.id), parent.path)
        };

        let pending = pending_children(&parent, elements)?;
        let first_query = PathQuery::parse(first.path())?;
        if !first_query.is_path_to_list_element() {
            return Err(Error::Validation(format!(
                "'{}' is not a list element",
                first.path()
            )));
        }
        let list_prefix = format!("{}[", first_query.xpath_prefix());
        if let Some(other) = pending.iter().find(|f| !f.path.starts_with(&list_prefix)) {
            return Err(Error::Validation(format!(
                "'{}' is not an element of the list '{}'",
                other.path,
                &list_prefix[..list_prefix.len() - 1]
            )));
        }

        let existing: Vec<_> = self
            .child_fragments(owner.id, parent_id)?
            .into_iter()
            .filter(|f| f.path.starts_with(&list_prefix))
            .collect();
        let mut existing_by_path: HashMap<String, i64> =
            existing.iter().map(|f| (f.path.clone(), f.id)).collect();
        let tree = self.prefetch_descendants(existing, FetchDescendants::All)?;

        let mut ops = Vec::new();
        for element in pending {
            match existing_by_path.remove(&element.path) {
                Some(id) => reconcile(&tree, id, &element, &mut ops)?,
                None => ops.push(WriteOp::Insert {
                    parent_id,
                    fragment: element,
                }),
            }
        }
        let mut removed: Vec<_> = existing_by_path.into_iter().collect();
        removed.sort_unstable();
        for (path, id) in removed {
            ops.push(WriteOp::Delete { id, path });
        }
        apply_as_unit(&mut self.conn, owner, ops)
    }
}
