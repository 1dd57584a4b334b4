// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Database row types.

use std::ops::AddAssign;
use std::time::{SystemTime, UNIX_EPOCH};

use canopy_store_core::DataNode;

/// Columns of `fragment` in the order [`Fragment::from_row`] reads them.
pub(crate) const FRAGMENT_COLUMNS: &str = "id, owner_id, path, parent_id, attributes";

/// One stored tree node.
///
/// This represents a row from the `fragment` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Database row ID
    pub id: i64,
    pub owner_id: i64,
    /// Normalized node path, unique per owner
    pub path: String,
    /// Row of the parent node; `None` for top-level nodes
    pub parent_id: Option<i64>,
    /// Leaves as a JSON object
    pub attributes: String,
}

impl Fragment {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            path: row.get(2)?,
            parent_id: row.get(3)?,
            attributes: row.get(4)?,
        })
    }
}

/// A named group of owners; the boundary of cross-owner queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub id: i64,
    pub name: String,
}

/// A named tree collection inside a dataspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub id: i64,
    pub dataspace_id: i64,
    pub dataspace: String,
    pub name: String,
}

/// A node returned by a cross-owner query, tagged with its owner's name.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedDataNode {
    pub owner: String,
    pub node: DataNode,
}

/// Row changes made by a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Existing rows whose attributes were replaced
    pub attributes_rewritten: usize,
    /// New rows, counting every descendant of an inserted subtree
    pub fragments_inserted: usize,
    /// Rows deleted directly; their descendants go with them
    pub subtrees_deleted: usize,
}

impl WriteSummary {
    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        *self == WriteSummary::default()
    }
}

impl AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.attributes_rewritten += other.attributes_rewritten;
        self.fragments_inserted += other.fragments_inserted;
        self.subtrees_deleted += other.subtrees_deleted;
    }
}

/// Convert SystemTime to Unix time in milliseconds.
pub(crate) fn system_time_to_unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_summary_accumulates() {
        let mut total = WriteSummary::default();
        assert!(total.is_empty());
        total += WriteSummary {
            attributes_rewritten: 1,
            fragments_inserted: 3,
            subtrees_deleted: 0,
        };
        total += WriteSummary {
            attributes_rewritten: 0,
            fragments_inserted: 1,
            subtrees_deleted: 2,
        };
        assert_eq!(
            total,
            WriteSummary {
                attributes_rewritten: 1,
                fragments_inserted: 4,
                subtrees_deleted: 2,
            }
        );
    }

    #[test]
    fn test_unix_time() {
        assert_eq!(system_time_to_unix_millis(UNIX_EPOCH + Duration::from_secs(42)), 42_000);
        assert_eq!(system_time_to_unix_millis(UNIX_EPOCH - Duration::from_millis(7)), -7);
    }
}
