// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Core data model for hierarchical configuration trees.
//!
//! This crate provides the types and pure logic shared by every storage
//! backend. It performs no IO.
//!
//! # Key Modules
//!
//! - `data_node` - In-memory trees of nodes with leaves and children
//! - `path` - Path expressions, their parser and canonical form
//! - `fetch` - How many descendant levels a read materializes
//! - `pagination` - Owner-granular paging of cross-tree queries

pub mod data_node;
pub mod fetch;
pub mod pagination;
pub mod path;

pub use data_node::{DataNode, DataNodeError, Leaves};
pub use fetch::FetchDescendants;
pub use pagination::Pagination;
pub use path::{PathError, PathQuery};
