// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! How many levels of descendants a read materializes.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' is not a valid fetch descendants option")]
pub struct ParseFetchDescendantsError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchDescendants {
    /// Only the matched nodes themselves.
    #[default]
    Omit,
    /// Matched nodes and their children.
    DirectChildren,
    /// A fixed number of levels below the matched nodes (always > 1).
    Depth(u32),
    /// The complete subtree.
    All,
}

impl FetchDescendants {
    /// Build a depth option, folding 0 and 1 into their named variants.
    pub fn depth(levels: u32) -> Self {
        match levels {
            0 => FetchDescendants::Omit,
            1 => FetchDescendants::DirectChildren,
            n => FetchDescendants::Depth(n),
        }
    }

    /// Maximum descendant depth, `None` when unbounded.
    pub fn max_depth(self) -> Option<u32> {
        match self {
            FetchDescendants::Omit => Some(0),
            FetchDescendants::DirectChildren => Some(1),
            FetchDescendants::Depth(n) => Some(n),
            FetchDescendants::All => None,
        }
    }

    /// Whether nodes read with this option carry any children.
    pub fn has_next(self) -> bool {
        self.max_depth() != Some(0)
    }

    /// Option to apply to the children of a node read with `self`.
    pub fn next(self) -> Self {
        match self {
            FetchDescendants::All => FetchDescendants::All,
            other => FetchDescendants::depth(other.max_depth().unwrap_or(0).saturating_sub(1)),
        }
    }
}

impl FromStr for FetchDescendants {
    type Err = ParseFetchDescendantsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" | "0" => Ok(FetchDescendants::Omit),
            "direct" | "1" => Ok(FetchDescendants::DirectChildren),
            "all" | "-1" => Ok(FetchDescendants::All),
            other if other.bytes().all(|b| b.is_ascii_digit()) => other
                .parse::<u32>()
                .map(FetchDescendants::depth)
                .map_err(|_| ParseFetchDescendantsError(s.to_string())),
            _ => Err(ParseFetchDescendantsError(s.to_string())),
        }
    }
}

impl fmt::Display for FetchDescendants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchDescendants::Omit => f.write_str("OmitDescendants"),
            FetchDescendants::DirectChildren => f.write_str("DirectChildrenOnly"),
            FetchDescendants::Depth(n) => write!(f, "Depth={n}"),
            FetchDescendants::All => f.write_str("IncludeAllDescendants"),
        }
    }
}
