// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! In-memory hierarchical documents.
//!
//! A [`DataNode`] is identified by its path, carries a map of leaves and an
//! ordered set of children keyed by their own paths. Children are stored in a
//! `BTreeMap`, so no two children of one parent can share a path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::is_root_path;

/// Leaf values of a node, keyed by leaf name.
///
/// Values are scalars (string, number, boolean) or lists of scalars (leaf-lists).
pub type Leaves = BTreeMap<String, serde_json::Value>;

/// Structural problems found while validating an incoming tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataNodeError {
    #[error("data node path must not be empty")]
    EmptyPath,

    #[error("child '{child}' is not located under parent '{parent}'")]
    ChildOutsideParent { parent: String, child: String },

    #[error("leaf '{leaf}' of '{path}' is neither a scalar nor a list of scalars")]
    UnsupportedLeafValue { path: String, leaf: String },
}

/// One node of a configuration tree.
///
/// A node is addressed by its absolute path, holds named leaf values and
/// owns its child nodes, keyed by their paths.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataNode {
    path: String,
    #[serde(default)]
    leaves: Leaves,
    #[serde(default)]
    children: BTreeMap<String, DataNode>,
}

impl DataNode {
    /// A node with no leaves or children at `path`.
    ///
    /// The path is kept as given; writes normalize it.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            leaves: Leaves::new(),
            children: BTreeMap::new(),
        }
    }

    /// Set one leaf, replacing a previous value of the same name.
    pub fn with_leaf(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.leaves.insert(name.into(), value.into());
        self
    }

    /// Replace all leaves.
    pub fn with_leaves(mut self, leaves: Leaves) -> Self {
        self.leaves = leaves;
        self
    }

    /// Add a child; a child with the same path replaces the previous one.
    pub fn with_child(mut self, child: DataNode) -> Self {
        self.add_child(child);
        self
    }

    /// Add a child in place; see [`with_child`](Self::with_child).
    pub fn add_child(&mut self, child: DataNode) {
        self.children.insert(child.path.clone(), child);
    }

    /// The path as given at construction.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All leaves, ordered by name.
    pub fn leaves(&self) -> &Leaves {
        &self.leaves
    }

    /// The value of one leaf.
    pub fn leaf(&self, name: &str) -> Option<&serde_json::Value> {
        self.leaves.get(name)
    }

    /// Direct children, ordered by path.
    pub fn children(&self) -> impl ExactSizeIterator<Item = &DataNode> {
        self.children.values()
    }

    /// The direct child stored under exactly `path`.
    pub fn child(&self, path: &str) -> Option<&DataNode> {
        self.children.get(path)
    }

    /// Whether the node has any direct child.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_size(&self) -> usize {
        1 + self.children().map(DataNode::subtree_size).sum::<usize>()
    }

    /// Split into path, leaves and direct children.
    pub fn into_parts(self) -> (String, Leaves, Vec<DataNode>) {
        (self.path, self.leaves, self.children.into_values().collect())
    }

    /// Check the structural invariants of the whole subtree.
    ///
    /// Every child path must extend its parent's path with a `/` separated
    /// suffix (children of the root marker may have any absolute path), and
    /// every leaf must hold a scalar or a list of scalars.
    pub fn validate(&self) -> Result<(), DataNodeError> {
        if self.path.is_empty() {
            return Err(DataNodeError::EmptyPath);
        }
        for (name, value) in &self.leaves {
            if !is_leaf_value(value) {
                return Err(DataNodeError::UnsupportedLeafValue {
                    path: self.path.clone(),
                    leaf: name.clone(),
                });
            }
        }
        for child in self.children() {
            if !is_child_path(&self.path, &child.path) {
                return Err(DataNodeError::ChildOutsideParent {
                    parent: self.path.clone(),
                    child: child.path.clone(),
                });
            }
            child.validate()?;
        }
        Ok(())
    }
}

fn is_scalar(value: &serde_json::Value) -> bool {
    !matches!(
        value,
        serde_json::Value::Array(_) | serde_json::Value::Object(_)
    )
}

fn is_leaf_value(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Array(items) => items.iter().all(is_scalar),
        other => is_scalar(other),
    }
}

fn is_child_path(parent: &str, child: &str) -> bool {
    if is_root_path(parent) {
        return child.starts_with('/') && child.len() > 1;
    }
    child
        .strip_prefix(parent)
        .and_then(|suffix| suffix.strip_prefix('/'))
        .is_some_and(|suffix| !suffix.is_empty())
}
