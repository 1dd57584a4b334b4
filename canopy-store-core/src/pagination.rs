// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Paging over the owners matched by a cross-tree query.
//!
//! Pages are made of owners, not nodes: every node of an owner in the current
//! page is returned.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pagination {
    #[default]
    None,
    Page {
        /// 1-based page number.
        index: u32,
        /// Owners per page.
        size: u32,
    },
}

impl Pagination {
    /// Page `index` (from 1) of `size` owners.
    pub fn page(index: u32, size: u32) -> Self {
        Pagination::Page { index, size }
    }

    pub fn is_paginated(&self) -> bool {
        matches!(self, Pagination::Page { .. })
    }

    /// Whether index and size are both at least 1.
    pub fn is_valid(&self) -> bool {
        match self {
            Pagination::None => true,
            Pagination::Page { index, size } => *index > 0 && *size > 0,
        }
    }

    /// Number of owners to skip before this page.
    pub fn offset(&self) -> u64 {
        match self {
            Pagination::None => 0,
            Pagination::Page { index, size } => {
                u64::from(index.saturating_sub(1)) * u64::from(*size)
            }
        }
    }

    /// Number of pages needed for `total_owners` matching owners.
    pub fn page_count(&self, total_owners: usize) -> usize {
        match self {
            Pagination::None => usize::from(total_owners > 0),
            Pagination::Page { size, .. } if *size == 0 => 0,
            Pagination::Page { size, .. } => total_owners.div_ceil(*size as usize),
        }
    }
}
