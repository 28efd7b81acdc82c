//! Header and identifier normalization.
//!
//! Two spellings are "the same" when they agree after trimming, lowercasing
//! and dropping everything that is not alphanumeric. `"Telegram ID(s)"`,
//! `"telegram ids"` and `" TELEGRAM_IDS "` all reduce to `telegramids`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cell::CellValue;

/// A string reduced to lowercase alphanumerics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize any string. Total: empty input yields the empty key.
pub fn normalize(s: &str) -> NormalizedKey {
    let mut out = String::with_capacity(s.len());
    for ch in s.trim().chars() {
        for lower in ch.to_lowercase() {
            if lower.is_alphanumeric() {
                out.push(lower);
            }
        }
    }
    NormalizedKey(out)
}

/// Normalize a cell through its display string.
pub fn normalize_cell(cell: &CellValue) -> NormalizedKey {
    match cell {
        CellValue::Empty => NormalizedKey::default(),
        other => normalize(&other.display()),
    }
}

/// Ordered alias → canonical label table.
///
/// Lookups walk the entries in slice order, so when several aliases of one
/// canonical label are present in a header row the earliest entry wins.
#[derive(Debug, Clone, Copy)]
pub struct SynonymTable {
    entries: &'static [(&'static str, &'static str)],
}

impl SynonymTable {
    pub const fn new(entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { entries }
    }

    /// Find the actual header (as spelled in `headers`) that stands for `canonical`.
    ///
    /// When two headers normalize to the same key, the later one is the candidate.
    pub fn resolve<'h, I>(&self, canonical: &str, headers: I) -> Option<&'h str>
    where
        I: IntoIterator<Item = &'h str>,
    {
        let norm_to_orig: HashMap<NormalizedKey, &'h str> =
            headers.into_iter().map(|h| (normalize(h), h)).collect();

        self.entries
            .iter()
            .filter(|(_, c)| *c == canonical)
            .find_map(|(alias, _)| norm_to_orig.get(&normalize(alias)).copied())
    }
}

/// Canonical usersetting labels, in output order.
pub const ROSTER_CANONICAL: [&str; 4] = ["User Alias", "User ID", "Max Loss", "Telegram"];

pub const ROSTER_SYNONYMS: SynonymTable = SynonymTable::new(&[
    ("User Alias", "User Alias"),
    ("User ID", "User ID"),
    ("Max Loss", "Max Loss"),
    ("Telegram", "Telegram"),
    ("Telegram ID", "Telegram"),
    ("Telegram IDs", "Telegram"),
    ("Telegram ID(s)", "Telegram"),
]);

/// Identifier / realized-MTM columns of a saved-MTM export.
pub const OVERLAY_USER_ID: &str = "User ID";
pub const OVERLAY_REALIZED_MTM: &str = "realizedMTM";

pub const OVERLAY_SYNONYMS: SynonymTable = SynonymTable::new(&[
    ("User ID", OVERLAY_USER_ID),
    ("UserID", OVERLAY_USER_ID),
    ("User_ID", OVERLAY_USER_ID),
    ("Client ID", OVERLAY_USER_ID),
    ("realizedMTM", OVERLAY_REALIZED_MTM),
    ("Realized MTM", OVERLAY_REALIZED_MTM),
    ("Realised MTM", OVERLAY_REALIZED_MTM),
    ("Realized PnL", OVERLAY_REALIZED_MTM),
]);
