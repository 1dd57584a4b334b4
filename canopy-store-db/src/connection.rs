// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Database connection management.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use tracing::debug;

use crate::compiler::{PATH_MATCH_FUNCTION, path_matches};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::schema::{LOCK_SCHEMA_SQL, SCHEMA_SQL, SCHEMA_VERSION};
use crate::session::SessionId;

/// Database open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenMode {
    /// Read-only access; every write fails
    ReadOnly,
    /// Read-write access to an existing database
    ReadWrite,
    /// Create new database if it doesn't exist
    Create,
}

/// SQLite-backed store of data node trees.
pub struct FragmentStore {
    pub(crate) conn: Connection,
    pub(crate) lock_poll_interval: Duration,
    pub(crate) lock_lease: Duration,
    /// Sessions started through this handle and not yet closed.
    pub(crate) sessions: BTreeSet<SessionId>,
}

impl FragmentStore {
    /// Open or create a database at a custom path with default settings.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let config = StoreConfig {
            database_path: Some(path.as_ref().to_owned()),
            open_mode: mode,
            ..StoreConfig::default()
        };
        Self::open_with_config(&config)
    }

    /// Open the database described by `config`.
    pub fn open_with_config(config: &StoreConfig) -> Result<Self> {
        let Some(path) = config.database_path.as_deref() else {
            let mut db = Self::open_memory()?;
            db.conn.busy_timeout(config.busy_timeout())?;
            db.lock_poll_interval = config.lock_poll_interval();
            db.lock_lease = config.lock_lease();
            return Ok(db);
        };

        let mode = config.open_mode;
        let flags = match mode {
            OpenMode::ReadOnly => {
                if !path.exists() {
                    return Err(Error::DatabaseNotFound(path.to_owned()));
                }
                OpenFlags::SQLITE_OPEN_READ_ONLY
            }
            OpenMode::ReadWrite => {
                if !path.exists() {
                    return Err(Error::DatabaseNotFound(path.to_owned()));
                }
                OpenFlags::SQLITE_OPEN_READ_WRITE
            }
            OpenMode::Create => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };

        let conn = Connection::open_with_flags(path, flags).map_err(|e| Error::DatabaseOpen {
            path: path.to_owned(),
            source: e,
        })?;
        conn.busy_timeout(config.busy_timeout())?;
        let db = Self {
            conn,
            lock_poll_interval: config.lock_poll_interval(),
            lock_lease: config.lock_lease(),
            sessions: BTreeSet::new(),
        };

        db.configure_pragmas(mode != OpenMode::ReadOnly)?;
        db.register_functions()?;
        match db.schema_version()? {
            0 if mode == OpenMode::Create => db.create_schema()?,
            SCHEMA_VERSION => {}
            found => {
                return Err(Error::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION,
                    found,
                });
            }
        }

        debug!("Opened database at {} ({:?})", path.display(), mode);
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    ///
    /// The database is initialized with the full schema.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            lock_poll_interval: StoreConfig::default().lock_poll_interval(),
            lock_lease: StoreConfig::default().lock_lease(),
            sessions: BTreeSet::new(),
        };
        db.configure_pragmas(true)?;
        db.register_functions()?;
        db.create_schema()?;
        debug!("Created in-memory database");
        Ok(db)
    }

    /// Configure SQLite pragmas; foreign keys carry the cascading deletes.
    fn configure_pragmas(&self, writable: bool) -> Result<()> {
        if writable {
            self.conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                "#,
            )?;
        }
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;
        Ok(())
    }

    fn register_functions(&self) -> Result<()> {
        self.conn.create_scalar_function(
            PATH_MATCH_FUNCTION,
            3,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let path = ctx.get::<String>(0)?;
                let target = ctx.get::<String>(1)?;
                let descendant = ctx.get::<bool>(2)?;
                Ok(path_matches(&path, &target, descendant))
            },
        )?;
        Ok(())
    }

    /// Create the database schema and stamp its version.
    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        self.conn.execute_batch(LOCK_SCHEMA_SQL)?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!("Created database schema (version {SCHEMA_VERSION})");
        Ok(())
    }

    /// The version stamped in `PRAGMA user_version`; 0 for a new file.
    pub fn schema_version(&self) -> Result<i32> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Get raw connection (for advanced usage).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Check if the database has the expected schema tables.
    pub fn has_schema(&self) -> Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('dataspace', 'owner', 'fragment', 'owner_lock')",
            [],
            |row| row.get(0),
        )?;
        Ok(count == 4)
    }
}
