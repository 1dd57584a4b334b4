// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Conversion between [`DataNode`] trees and fragment rows.
//!
//! Writing flattens a tree into [`PendingFragment`]s (normalized path plus
//! serialized leaves). Reading collects rows into a [`FragmentTree`], an arena
//! indexed by row id that links each row to its fetched children, and rebuilds
//! nodes from it up to a requested depth.

use std::collections::HashMap;

use canopy_store_core::path::{is_root_path, normalize_path};
use canopy_store_core::{DataNode, FetchDescendants, Leaves};

use crate::error::{Error, Result};
use crate::types::Fragment;

pub(crate) fn serialize_leaves(leaves: &Leaves) -> Result<String> {
    Ok(serde_json::to_string(leaves)?)
}

pub(crate) fn deserialize_leaves(attributes: &str) -> Result<Leaves> {
    if attributes.is_empty() {
        return Ok(Leaves::new());
    }
    Ok(serde_json::from_str(attributes)?)
}

/// A node about to be inserted, with its whole subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingFragment {
    pub(crate) path: String,
    pub(crate) attributes: String,
    pub(crate) children: Vec<PendingFragment>,
}

impl PendingFragment {
    /// Number of rows this subtree occupies.
    pub(crate) fn row_count(&self) -> usize {
        1 + self.children.iter().map(PendingFragment::row_count).sum::<usize>()
    }
}

/// Flatten a validated tree. The root marker contributes no row of its own;
/// its children become top-level fragments.
pub(crate) fn to_pending_fragments(node: &DataNode) -> Result<Vec<PendingFragment>> {
    node.validate()?;
    if is_root_path(node.path()) {
        if !node.leaves().is_empty() {
            return Err(Error::Validation(
                "the root marker cannot carry leaves".to_string(),
            ));
        }
        return node.children().map(to_pending_fragment).collect();
    }
    Ok(vec![to_pending_fragment(node)?])
}

fn to_pending_fragment(node: &DataNode) -> Result<PendingFragment> {
    Ok(PendingFragment {
        path: normalize_path(node.path())?,
        attributes: serialize_leaves(node.leaves())?,
        children: node
            .children()
            .map(to_pending_fragment)
            .collect::<Result<_>>()?,
    })
}

/// Rows of one or more subtrees, linked parent to child in memory.
#[derive(Debug, Default)]
pub(crate) struct FragmentTree {
    fragments: HashMap<i64, Fragment>,
    children: HashMap<i64, Vec<i64>>,
    /// Rows whose parent was not fetched, in row order.
    roots: Vec<i64>,
}

impl FragmentTree {
    pub(crate) fn from_rows(rows: Vec<Fragment>) -> Self {
        let mut tree = FragmentTree::default();
        let mut order = Vec::with_capacity(rows.len());
        for row in rows {
            order.push(row.id);
            tree.fragments.insert(row.id, row);
        }
        for id in order {
            let parent = tree.fragments[&id]
                .parent_id
                .filter(|parent| tree.fragments.contains_key(parent));
            match parent {
                Some(parent) => tree.children.entry(parent).or_default().push(id),
                None => tree.roots.push(id),
            }
        }
        tree
    }

    pub(crate) fn get(&self, id: i64) -> Option<&Fragment> {
        self.fragments.get(&id)
    }

    pub(crate) fn children_of(&self, id: i64) -> &[i64] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn roots(&self) -> &[i64] {
        &self.roots
    }

    pub(crate) fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Rebuild the node stored in row `id`, descending as far as `fetch` allows.
    pub(crate) fn to_data_node(&self, id: i64, fetch: FetchDescendants) -> Result<Option<DataNode>> {
        let Some(fragment) = self.get(id) else {
            return Ok(None);
        };
        let mut node =
            DataNode::new(fragment.path.clone()).with_leaves(deserialize_leaves(&fragment.attributes)?);
        if fetch.has_next() {
            for &child in self.children_of(id) {
                if let Some(child) = self.to_data_node(child, fetch.next())? {
                    node.add_child(child);
                }
            }
        }
        Ok(Some(node))
    }

    /// Rebuild every node in `ids`; ids that were not fetched are skipped.
    pub(crate) fn to_data_nodes(&self, ids: &[i64], fetch: FetchDescendants) -> Result<Vec<DataNode>> {
        let mut nodes = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(node) = self.to_data_node(id, fetch)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}
