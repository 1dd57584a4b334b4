// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Error types for fragment store operations.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use canopy_store_core::{DataNodeError, PathError};
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for fragment store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during fragment store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to open database with context
    #[error("Failed to open database at '{path}': {source}")]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Database file not found
    #[error("Database not found at: {0}")]
    DatabaseNotFound(PathBuf),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: i32, found: i32 },

    #[error("Dataspace not found: {0}")]
    DataspaceNotFound(String),

    #[error("Dataspace already exists: {0}")]
    DataspaceAlreadyExists(String),

    #[error("Owner '{owner}' not found in dataspace '{dataspace}'")]
    OwnerNotFound { dataspace: String, owner: String },

    #[error("Owner '{owner}' already exists in dataspace '{dataspace}'")]
    OwnerAlreadyExists { dataspace: String, owner: String },

    /// A single addressed node does not exist
    #[error("Data node '{path}' not found for owner '{owner}'")]
    DataNodeNotFound { owner: String, path: String },

    /// Some of several addressed nodes do not exist
    #[error("Data nodes not found for owner '{owner}': {}", join(paths))]
    DataNodesNotFound {
        owner: String,
        paths: BTreeSet<String>,
    },

    /// Inserting would duplicate the path of an existing node
    #[error("Data nodes already exist for owner '{owner}': {}", join(paths))]
    AlreadyExists {
        owner: String,
        paths: BTreeSet<String>,
    },

    /// Rows changed underneath a write
    #[error("Concurrent modification of data nodes for owner '{owner}': {}", join(paths))]
    Concurrency {
        owner: String,
        paths: BTreeSet<String>,
    },

    /// Malformed path or query
    #[error(transparent)]
    Path(#[from] PathError),

    /// Structurally invalid incoming tree
    #[error("Invalid data node: {0}")]
    InvalidDataNode(#[from] DataNodeError),

    #[error("Invalid request: {0}")]
    Validation(String),

    /// Stored attributes could not be (de)serialized
    #[error("Attribute serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Timed out after {timeout:?} waiting for the lock on owner '{owner}'")]
    LockTimeout { owner: String, timeout: Duration },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to generate a session id: {0}")]
    Entropy(#[from] getrandom::Error),
}

fn join(paths: &BTreeSet<String>) -> String {
    paths.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl Error {
    /// Whether this is a SQLite UNIQUE constraint violation.
    pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}
