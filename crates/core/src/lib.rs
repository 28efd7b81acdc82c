//! `sumrec-core`: shared types for the roster/summary reconciliation workflow.
//!
//! Cells, columnar tables, sheet sets and the header normalizer. No IO.

pub mod cell;
pub mod normalize;
pub mod table;

pub use cell::CellValue;
pub use normalize::{normalize, NormalizedKey};
pub use table::{Column, SheetSet, Table};

use serde::{Deserialize, Serialize};

/// Which input a piece of data (or an error) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Roster,
    Summary,
    MtmOverlay,
    /// Edited remarks fed back into the second step.
    Remarks,
    Ledger,
}

impl std::fmt::Display for FileRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Roster => write!(f, "usersetting"),
            Self::Summary => write!(f, "summary"),
            Self::MtmOverlay => write!(f, "saved MTM"),
            Self::Remarks => write!(f, "remarks"),
            Self::Ledger => write!(f, "ledger"),
        }
    }
}
