// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! SQLite storage engine for hierarchical configuration trees.
//!
//! Trees of [`DataNode`]s are stored as one `fragment` row per node, grouped
//! by owner. Owners live inside dataspaces, which bound cross-owner queries.
//!
//! # Key Features
//!
//! - Path queries with leaf conditions, `text()`, `contains()`, descendant
//!   and ancestor axes, compiled to a single SQL statement
//! - Depth-bounded reads that fetch all descendants in one recursive query
//! - Bulk writes that fall back to row-by-row retry on conflict and report
//!   every conflicting path
//! - Advisory owner locks shared by every connection to a database file
//! - In-memory database for testing
//!
//! # Example
//!
//! ```no_run
//! use canopy_store_db::{DataNode, FetchDescendants, FragmentStore};
//!
//! # fn main() -> canopy_store_db::Result<()> {
//! let mut store = FragmentStore::open_memory()?;
//! let dataspace = store.create_dataspace("bookstore")?;
//! let owner = store.create_owner(&dataspace, "shop-1")?;
//!
//! store.store_data_node(
//!     &owner,
//!     &DataNode::new("/bookstore")
//!         .with_child(DataNode::new("/bookstore/categories[@code='1']").with_leaf("code", "1")),
//! )?;
//!
//! let found = store.query_data_nodes(
//!     &owner,
//!     "//categories[@code='1']",
//!     FetchDescendants::All,
//! )?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

mod admin;
mod compiler;
mod config;
mod connection;
mod delete;
mod error;
mod mapping;
mod prefetch;
mod query;
mod retry;
mod schema;
mod session;
mod types;
mod write;

pub use canopy_store_core::{
    DataNode, DataNodeError, FetchDescendants, Leaves, Pagination, PathError, PathQuery,
};
pub use config::{CONFIG_FILE_ENV, ConfigError, DEFAULT_CONFIG_FILE, StoreConfig};
pub use connection::{FragmentStore, OpenMode};
pub use error::{Error, Result};
pub use schema::SCHEMA_VERSION;
pub use session::SessionId;
pub use types::*;
