// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Applying row writes with conflict recovery.
//!
//! A write is a list of [`WriteOp`]s. [`apply_with_fallback`] first applies
//! all of them in one transaction. If any row conflicts (a duplicate path or
//! a row changed since it was read) that transaction is rolled back and every
//! operation is retried in a transaction of its own, so the conflicting rows
//! can be named and everything else is kept.

use std::collections::BTreeMap;

use rusqlite::{Connection, Transaction, params};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mapping::PendingFragment;
use crate::types::{Owner, WriteSummary};

/// One row-level change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WriteOp {
    /// Delete a row and, by cascade, its descendants.
    Delete { id: i64, path: String },
    /// Replace a row's attributes if they are still `expected`.
    UpdateAttributes {
        id: i64,
        path: String,
        expected: String,
        attributes: String,
    },
    /// Insert a subtree under `parent_id` (a top-level node when `None`).
    Insert {
        parent_id: Option<i64>,
        fragment: PendingFragment,
    },
}

impl WriteOp {
    /// Deletes run first so that replaced rows free their paths.
    fn rank(&self) -> u8 {
        match self {
            WriteOp::Delete { .. } => 0,
            WriteOp::UpdateAttributes { .. } => 1,
            WriteOp::Insert { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowConflict {
    /// The row changed or disappeared since it was read
    Stale,
    /// Another row already has the path
    Duplicate,
}

#[derive(Debug)]
pub(crate) enum BatchOutcome {
    Complete(WriteSummary),
    Partial {
        summary: WriteSummary,
        failures: BTreeMap<String, RowConflict>,
    },
}

impl BatchOutcome {
    /// Raise the failures as one error naming every conflicting path.
    ///
    /// Duplicates take precedence when both kinds occurred.
    pub(crate) fn into_result(self, owner: &Owner) -> Result<WriteSummary> {
        let (summary, failures) = match self {
            BatchOutcome::Complete(summary) => return Ok(summary),
            BatchOutcome::Partial { summary, failures } => (summary, failures),
        };
        let (duplicates, stale): (Vec<_>, Vec<_>) = failures
            .into_iter()
            .partition(|(_, conflict)| *conflict == RowConflict::Duplicate);
        debug!(owner = %owner.name, ?summary, "rows kept despite conflicts");
        if !duplicates.is_empty() {
            if !stale.is_empty() {
                warn!(
                    owner = %owner.name,
                    stale = ?stale.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
                    "stale rows also failed"
                );
            }
            return Err(Error::AlreadyExists {
                owner: owner.name.clone(),
                paths: duplicates.into_iter().map(|(path, _)| path).collect(),
            });
        }
        Err(Error::Concurrency {
            owner: owner.name.clone(),
            paths: stale.into_iter().map(|(path, _)| path).collect(),
        })
    }
}

enum OpError {
    Conflict { path: String, conflict: RowConflict },
    Fatal(Error),
}

impl From<rusqlite::Error> for OpError {
    fn from(e: rusqlite::Error) -> Self {
        OpError::Fatal(e.into())
    }
}

fn insert_subtree(
    tx: &Transaction<'_>,
    owner_id: i64,
    parent_id: Option<i64>,
    fragment: &PendingFragment,
    summary: &mut WriteSummary,
) -> std::result::Result<(), OpError> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO fragment (owner_id, path, parent_id, attributes) VALUES (?1, ?2, ?3, ?4)",
    )?;
    match stmt.execute(params![owner_id, fragment.path, parent_id, fragment.attributes]) {
        Ok(_) => {}
        Err(e) if Error::is_unique_violation(&e) => {
            return Err(OpError::Conflict {
                path: fragment.path.clone(),
                conflict: RowConflict::Duplicate,
            });
        }
        Err(e) => return Err(e.into()),
    }
    let id = tx.last_insert_rowid();
    summary.fragments_inserted += 1;
    for child in &fragment.children {
        insert_subtree(tx, owner_id, Some(id), child, summary)?;
    }
    Ok(())
}

fn apply_op(
    tx: &Transaction<'_>,
    owner_id: i64,
    op: &WriteOp,
    summary: &mut WriteSummary,
) -> std::result::Result<(), OpError> {
    match op {
        WriteOp::Delete { id, path } => {
            let deleted = tx
                .prepare_cached("DELETE FROM fragment WHERE id = ?1")?
                .execute(params![id])?;
            if deleted == 0 {
                return Err(OpError::Conflict {
                    path: path.clone(),
                    conflict: RowConflict::Stale,
                });
            }
            summary.subtrees_deleted += 1;
        }
        WriteOp::UpdateAttributes {
            id,
            path,
            expected,
            attributes,
        } => {
            let updated = tx
                .prepare_cached(
                    "UPDATE fragment SET attributes = ?1 WHERE id = ?2 AND attributes IS ?3",
                )?
                .execute(params![attributes, id, expected])?;
            if updated == 0 {
                return Err(OpError::Conflict {
                    path: path.clone(),
                    conflict: RowConflict::Stale,
                });
            }
            summary.attributes_rewritten += 1;
        }
        WriteOp::Insert {
            parent_id,
            fragment,
        } => insert_subtree(tx, owner_id, *parent_id, fragment, summary)?,
    }
    Ok(())
}

fn sorted(mut ops: Vec<WriteOp>) -> Vec<WriteOp> {
    ops.sort_by_key(WriteOp::rank);
    ops
}

/// Apply `ops` in one transaction, falling back to one transaction per
/// operation when any row conflicts.
pub(crate) fn apply_with_fallback(
    conn: &mut Connection,
    owner: &Owner,
    ops: Vec<WriteOp>,
) -> Result<BatchOutcome> {
    let ops = sorted(ops);
    if ops.is_empty() {
        return Ok(BatchOutcome::Complete(WriteSummary::default()));
    }

    let first_conflict = {
        let tx = conn.transaction()?;
        let mut summary = WriteSummary::default();
        let mut first_conflict = None;
        for op in &ops {
            match apply_op(&tx, owner.id, op, &mut summary) {
                Ok(()) => {}
                Err(OpError::Conflict { path, .. }) => {
                    first_conflict = Some(path);
                    break;
                }
                Err(OpError::Fatal(e)) => return Err(e),
            }
        }
        match first_conflict {
            None => {
                tx.commit()?;
                debug!(owner = %owner.name, operations = ops.len(), ?summary, "bulk write applied");
                return Ok(BatchOutcome::Complete(summary));
            }
            // Dropping the transaction rolls it back.
            Some(path) => path,
        }
    };

    warn!(
        owner = %owner.name,
        operations = ops.len(),
        conflict = %first_conflict,
        "bulk write conflicted, retrying row by row"
    );

    let mut summary = WriteSummary::default();
    let mut failures = BTreeMap::new();
    for op in &ops {
        let tx = conn.transaction()?;
        let mut op_summary = WriteSummary::default();
        match apply_op(&tx, owner.id, op, &mut op_summary) {
            Ok(()) => {
                tx.commit()?;
                summary += op_summary;
            }
            Err(OpError::Conflict { path, conflict }) => {
                failures.insert(path, conflict);
            }
            Err(OpError::Fatal(e)) => return Err(e),
        }
    }

    if failures.is_empty() {
        Ok(BatchOutcome::Complete(summary))
    } else {
        Ok(BatchOutcome::Partial { summary, failures })
    }
}

/// Apply `ops` all or nothing; every conflict is collected before rolling
/// back.
pub(crate) fn apply_as_unit(
    conn: &mut Connection,
    owner: &Owner,
    ops: Vec<WriteOp>,
) -> Result<WriteSummary> {
    let ops = sorted(ops);
    let tx = conn.transaction()?;
    let mut summary = WriteSummary::default();
    let mut failures = BTreeMap::new();
    for op in &ops {
        match apply_op(&tx, owner.id, op, &mut summary) {
            Ok(()) => {}
            Err(OpError::Conflict { path, conflict }) => {
                failures.insert(path, conflict);
            }
            Err(OpError::Fatal(e)) => return Err(e),
        }
    }
    if !failures.is_empty() {
        drop(tx);
        return BatchOutcome::Partial {
            summary: WriteSummary::default(),
            failures,
        }
        .into_result(owner);
    }
    tx.commit()?;
    debug!(owner = %owner.name, operations = ops.len(), ?summary, "write applied as one unit");
    Ok(summary)
}
