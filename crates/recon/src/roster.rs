//! Usersetting cleaning and the identifier lookup built from it.

use std::collections::HashMap;

use sumrec_core::normalize::{ROSTER_CANONICAL, ROSTER_SYNONYMS};
use sumrec_core::{normalize, CellValue, FileRole, NormalizedKey, Table};

use crate::error::ReconError;

/// Canonical usersetting columns, by role in the workflow.
pub const USER_ALIAS: &str = ROSTER_CANONICAL[0];
pub const USER_ID: &str = ROSTER_CANONICAL[1];
pub const MAX_LOSS: &str = ROSTER_CANONICAL[2];
pub const TELEGRAM: &str = ROSTER_CANONICAL[3];

/// Reduce a raw usersetting table to the four canonical columns, renamed and
/// in canonical order. Row order and count are preserved.
///
/// Fails on the first canonical column that no header resolves to.
pub fn clean_roster(raw: &Table) -> Result<Table, ReconError> {
    let mut resolved: Vec<&str> = Vec::with_capacity(ROSTER_CANONICAL.len());
    for canonical in ROSTER_CANONICAL {
        let original = ROSTER_SYNONYMS
            .resolve(canonical, raw.column_names())
            .ok_or_else(|| ReconError::MissingColumn {
                role: FileRole::Roster,
                column: canonical.to_string(),
            })?;
        log::debug!("usersetting: '{canonical}' <- '{original}'");
        resolved.push(original);
    }

    let mut cleaned = raw
        .select(&resolved)
        .ok_or_else(|| ReconError::MissingColumn {
            role: FileRole::Roster,
            column: resolved.join(", "),
        })?;

    for (original, canonical) in resolved.iter().zip(ROSTER_CANONICAL) {
        cleaned.rename(original, canonical);
    }

    Ok(cleaned)
}

/// One cleaned usersetting row.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterRow {
    pub user_id: String,
    pub alias: String,
    pub max_loss: String,
    /// Messaging handle column; its value is what lands in ALLOCATION.
    pub telegram: String,
}

/// Iterate a cleaned roster as typed rows.
pub fn roster_rows(clean: &Table) -> impl Iterator<Item = RosterRow> + '_ {
    let cell = move |row: usize, name: &str| {
        clean.get(row, name).map(CellValue::display).unwrap_or_default()
    };
    (0..clean.len()).map(move |row| RosterRow {
        user_id: cell(row, USER_ID),
        alias: cell(row, USER_ALIAS),
        max_loss: cell(row, MAX_LOSS),
        telegram: cell(row, TELEGRAM),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupEntry {
    pub allocation: String,
    pub max_loss: String,
}

/// Normalized user id → (allocation, max loss).
pub type Lookup = HashMap<NormalizedKey, LookupEntry>;

/// Build the identifier lookup. Rows with a blank User ID are skipped; when two
/// rows normalize to the same id the later row wins.
pub fn build_lookup(clean: &Table) -> Lookup {
    let mut lookup = Lookup::new();
    let mut skipped = 0usize;

    for row in roster_rows(clean) {
        let key = normalize(&row.user_id);
        if key.is_empty() {
            skipped += 1;
            continue;
        }
        if let Some(prev) = lookup.insert(
            key.clone(),
            LookupEntry { allocation: row.telegram, max_loss: row.max_loss },
        ) {
            log::debug!("usersetting: duplicate id '{key}', replacing {prev:?}");
        }
    }

    log::info!("usersetting lookup: {} ids ({} rows without id)", lookup.len(), skipped);
    lookup
}
