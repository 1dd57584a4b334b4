// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Dataspace and owner administration.

use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

use crate::connection::FragmentStore;
use crate::error::{Error, Result};
use crate::types::{Dataspace, Owner};

impl FragmentStore {
    /// Create an empty dataspace; fails with
    /// [`Error::DataspaceAlreadyExists`] when the name is taken.
    pub fn create_dataspace(&self, name: &str) -> Result<Dataspace> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO dataspace (name) VALUES (?1)")?;
        match stmt.execute(params![name]) {
            Ok(_) => {}
            Err(e) if Error::is_unique_violation(&e) => {
                return Err(Error::DataspaceAlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        info!(dataspace = name, "created dataspace");
        Ok(Dataspace {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    /// Look up a dataspace by name.
    pub fn resolve_dataspace(&self, name: &str) -> Result<Dataspace> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, name FROM dataspace WHERE name = ?1")?;
        stmt.query_row(params![name], |row| {
            Ok(Dataspace {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .optional()?
        .ok_or_else(|| Error::DataspaceNotFound(name.to_string()))
    }

    /// Create an empty tree collection named `name` in `dataspace`.
    pub fn create_owner(&self, dataspace: &Dataspace, name: &str) -> Result<Owner> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO owner (dataspace_id, name) VALUES (?1, ?2)")?;
        match stmt.execute(params![dataspace.id, name]) {
            Ok(_) => {}
            Err(e) if Error::is_unique_violation(&e) => {
                return Err(Error::OwnerAlreadyExists {
                    dataspace: dataspace.name.clone(),
                    owner: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        debug!(dataspace = %dataspace.name, owner = name, "created owner");
        Ok(Owner {
            id: self.conn.last_insert_rowid(),
            dataspace_id: dataspace.id,
            dataspace: dataspace.name.clone(),
            name: name.to_string(),
        })
    }

    /// Look up an owner by dataspace name and owner name; fails with
    /// [`Error::OwnerNotFound`] when either is absent.
    pub fn resolve_owner(&self, dataspace: &str, name: &str) -> Result<Owner> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT owner.id, owner.dataspace_id, dataspace.name, owner.name
            FROM owner
            JOIN dataspace ON dataspace.id = owner.dataspace_id
            WHERE dataspace.name = ?1 AND owner.name = ?2
            "#,
        )?;
        stmt.query_row(params![dataspace, name], owner_from_row)
            .optional()?
            .ok_or_else(|| Error::OwnerNotFound {
                dataspace: dataspace.to_string(),
                owner: name.to_string(),
            })
    }

    /// Owners of `dataspace` in creation order.
    pub fn list_owners(&self, dataspace: &Dataspace) -> Result<Vec<Owner>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT owner.id, owner.dataspace_id, dataspace.name, owner.name
            FROM owner
            JOIN dataspace ON dataspace.id = owner.dataspace_id
            WHERE owner.dataspace_id = ?1
            ORDER BY owner.id
            "#,
        )?;
        let owners = stmt
            .query_map(params![dataspace.id], owner_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(owners)
    }

    /// Remove an owner with all of its rows and any lock on it.
    pub fn delete_owner(&self, owner: &Owner) -> Result<()> {
        let deleted = self
            .conn
            .prepare_cached("DELETE FROM owner WHERE id = ?1")?
            .execute(params![owner.id])?;
        if deleted == 0 {
            return Err(Error::OwnerNotFound {
                dataspace: owner.dataspace.clone(),
                owner: owner.name.clone(),
            });
        }
        info!(dataspace = %owner.dataspace, owner = %owner.name, "deleted owner");
        Ok(())
    }
}

fn owner_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Owner> {
    Ok(Owner {
        id: row.get(0)?,
        dataspace_id: row.get(1)?,
        dataspace: row.get(2)?,
        name: row.get(3)?,
    })
}
