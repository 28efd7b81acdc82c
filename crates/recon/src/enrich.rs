//! Summary enrichment: the ordered stages that turn the first Summary sheet
//! into the canonical enriched sheet.
//!
//! Stages 1-5 and 7 run once when the preview is built. The second leg of the
//! workflow only runs [`finalize_remarks`] (stage 6 then 7); running the full
//! [`enrich`] twice over the same rows would append `Slippage` twice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sumrec_core::normalize::normalize_cell;
use sumrec_core::{CellValue, FileRole, NormalizedKey, Table};

use crate::columns::{
    ALGO, ALLOCATION, DESIRED_ORDER, EXPIRY, IDENTIFIER_COLUMNS, INJECT_AT, MAX_LOSS, MTM_ALL,
    OPERATOR, REMARK, SERVER,
};
use crate::constants::Constants;
use crate::error::ReconError;
use crate::overlay::MtmOverlay;
use crate::roster::Lookup;

/// Row index → replacement REMARK text.
pub type RemarkOverrides = BTreeMap<usize, String>;

/// Remark token appended when a row breaches its loss threshold.
pub const SLIPPAGE: &str = "Slippage";

/// Margin added to the max-loss ratio before comparing against realized loss.
const MAX_LOSS_MARGIN: f64 = 0.1;

/// Everything enrichment needs besides the sheet itself.
#[derive(Debug, Clone, Copy)]
pub struct EnrichRequest<'a> {
    pub lookup: &'a Lookup,
    pub constants: &'a Constants,
    pub overlay: Option<&'a MtmOverlay>,
    pub remark_overrides: Option<&'a RemarkOverrides>,
}

/// Counters reported alongside the enriched sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichSummary {
    pub rows: usize,
    /// Rows whose identifier was found in the usersetting lookup.
    pub matched: usize,
    /// Rows whose MTM (All) was replaced from the saved-MTM file.
    pub overlaid: usize,
    /// Rows flagged with the slippage token.
    pub slippage: usize,
    pub overrides_applied: usize,
}

#[derive(Debug, Clone)]
pub struct Enriched {
    pub table: Table,
    pub summary: EnrichSummary,
}

/// Run every enrichment stage over a copy of `first_sheet`.
///
/// Fails only when the constants demand a saved-MTM file and none was given.
/// Per-row problems (unknown id, non-numeric cell) leave that row untouched.
pub fn enrich(first_sheet: &Table, req: &EnrichRequest<'_>) -> Result<Enriched, ReconError> {
    if req.constants.requires_mtm_overlay() && req.overlay.is_none() {
        return Err(ReconError::MissingInput(FileRole::MtmOverlay));
    }
    if req.overlay.is_some() && !req.constants.requires_mtm_overlay() {
        log::info!("saved MTM supplied for ALGO {} / {}; applying anyway", req.constants.algo, req.constants.expiry);
    }

    let mut table = first_sheet.clone();
    let mut summary = EnrichSummary { rows: table.len(), ..Default::default() };

    let id_column = identifier_column(&table);
    let ids = row_keys(&table, id_column.as_deref());

    summary.matched = inject_lookup(&mut table, &ids, req.lookup);
    broadcast_constants(&mut table, req.constants);

    if let Some(overlay) = req.overlay {
        summary.overlaid = apply_overlay(&mut table, &ids, overlay);
    }

    summary.slippage = apply_slippage(&mut table);

    if let Some(overrides) = req.remark_overrides {
        summary.overrides_applied = apply_remark_overrides(&mut table, overrides);
    }

    reorder_canonical(&mut table);

    log::info!(
        "enriched {} rows: {} matched, {} overlaid, {} slippage",
        summary.rows,
        summary.matched,
        summary.overlaid,
        summary.slippage
    );
    Ok(Enriched { table, summary })
}

/// Second leg: apply human-edited remarks, then restore the canonical layout.
/// Returns the number of overrides applied.
pub fn finalize_remarks(table: &mut Table, overrides: &RemarkOverrides) -> usize {
    let applied = apply_remark_overrides(table, overrides);
    reorder_canonical(table);
    applied
}

// ---------------------------------------------------------------------------
// Stage 1: identifier detection
// ---------------------------------------------------------------------------

fn identifier_column(table: &Table) -> Option<String> {
    let found = IDENTIFIER_COLUMNS.iter().find(|c| table.has_column(c));
    if found.is_none() {
        log::warn!("summary has no UserID column; ALLOCATION/MAX_LOSS left empty");
    }
    found.map(|c| c.to_string())
}

/// Normalized identifier per row. Empty keys when there is no identifier column.
fn row_keys(table: &Table, id_column: Option<&str>) -> Vec<NormalizedKey> {
    match id_column.and_then(|c| table.column(c)) {
        Some(column) => column.values.iter().map(normalize_cell).collect(),
        None => vec![NormalizedKey::default(); table.len()],
    }
}

// ---------------------------------------------------------------------------
// Stage 2: ALLOCATION / MAX_LOSS
// ---------------------------------------------------------------------------

fn inject_lookup(table: &mut Table, ids: &[NormalizedKey], lookup: &Lookup) -> usize {
    let mut allocation = Vec::with_capacity(ids.len());
    let mut max_loss = Vec::with_capacity(ids.len());
    let mut matched = 0;

    for key in ids {
        match lookup.get(key).filter(|_| !key.is_empty()) {
            Some(entry) => {
                matched += 1;
                allocation.push(CellValue::text(entry.allocation.clone()));
                max_loss.push(CellValue::text(entry.max_loss.clone()));
            }
            None => {
                allocation.push(CellValue::text(""));
                max_loss.push(CellValue::text(""));
            }
        }
    }

    for name in [ALLOCATION, MAX_LOSS] {
        if table.remove_column(name).is_some() {
            log::warn!("summary already has a {name} column; replacing it with usersetting values");
        }
    }
    let at = INJECT_AT.min(table.width());
    table.insert_column(at, ALLOCATION, allocation);
    table.insert_column(at + 1, MAX_LOSS, max_loss);
    log::debug!("injected {ALLOCATION}/{MAX_LOSS} at {at}, {matched} matched");
    matched
}

// ---------------------------------------------------------------------------
// Stage 3: constants
// ---------------------------------------------------------------------------

fn broadcast_constants(table: &mut Table, constants: &Constants) {
    table.fill_column(SERVER, CellValue::text(constants.server.clone()));
    table.fill_column(ALGO, CellValue::text(constants.algo.clone()));
    table.fill_column(OPERATOR, CellValue::text(constants.operator.clone()));
    table.fill_column(EXPIRY, CellValue::text(constants.expiry.label()));

    if !table.has_column(REMARK) {
        table.fill_column(REMARK, CellValue::text(""));
    }
    if let Some(seed) = &constants.remark_seed {
        for row in 0..table.len() {
            append_remark(table, row, seed);
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 4: saved-MTM overlay
// ---------------------------------------------------------------------------

fn apply_overlay(table: &mut Table, ids: &[NormalizedKey], overlay: &MtmOverlay) -> usize {
    if !table.has_column(MTM_ALL) {
        log::warn!("summary has no '{MTM_ALL}' column; saved MTM not applied");
        return 0;
    }

    let mut overlaid = 0;
    for (row, key) in ids.iter().enumerate() {
        if key.is_empty() {
            continue;
        }
        let Some(value) = overlay.get(key) else {
            continue;
        };

        let old = table.get(row, MTM_ALL).map(CellValue::display).unwrap_or_default();
        if !old.trim().is_empty() {
            append_remark(table, row, &format!("MTM={old}"));
        }
        table.set(row, MTM_ALL, value.clone());
        overlaid += 1;
    }
    overlaid
}

// ---------------------------------------------------------------------------
// Stage 5: slippage
// ---------------------------------------------------------------------------

/// True when `max_loss / allocation + 0.1 <= -(mtm / allocation)`.
/// Any operand missing, non-numeric or a zero allocation gives false.
pub fn is_slippage(allocation: &CellValue, max_loss: &CellValue, mtm: &CellValue) -> bool {
    let (Some(alloc), Some(loss), Some(mtm)) =
        (allocation.as_number(), max_loss.as_number(), mtm.as_number())
    else {
        return false;
    };
    if alloc == 0.0 {
        return false;
    }

    let max_loss_ratio = loss / alloc + MAX_LOSS_MARGIN;
    let mtm_ratio = -(mtm / alloc);
    max_loss_ratio.is_finite() && mtm_ratio.is_finite() && max_loss_ratio <= mtm_ratio
}

fn apply_slippage(table: &mut Table) -> usize {
    let mut flagged = 0;
    for row in 0..table.len() {
        let cell = |name: &str| table.get(row, name).cloned().unwrap_or_default();
        if is_slippage(&cell(ALLOCATION), &cell(MAX_LOSS), &cell(MTM_ALL)) {
            append_remark(table, row, SLIPPAGE);
            flagged += 1;
        }
    }
    flagged
}

// ---------------------------------------------------------------------------
// Stage 6: remark overrides
// ---------------------------------------------------------------------------

/// Replace REMARK wholesale for each in-bounds row index. Returns how many
/// rows were written.
pub fn apply_remark_overrides(table: &mut Table, overrides: &RemarkOverrides) -> usize {
    if !table.has_column(REMARK) {
        table.fill_column(REMARK, CellValue::text(""));
    }

    let mut applied = 0;
    for (&row, text) in overrides {
        if table.set(row, REMARK, CellValue::text(text.clone())) {
            applied += 1;
        } else {
            log::warn!("remark for row {row} dropped: sheet has {} rows", table.len());
        }
    }
    applied
}

// ---------------------------------------------------------------------------
// Stage 7: canonical order
// ---------------------------------------------------------------------------

pub fn reorder_canonical(table: &mut Table) {
    table.reorder(&DESIRED_ORDER);
}

// ---------------------------------------------------------------------------
// Remark helpers
// ---------------------------------------------------------------------------

/// Append `token` to `existing` after one space. `existing` is kept as
/// written unless it is blank, in which case it is replaced.
pub fn append_token(existing: &str, token: &str) -> String {
    if existing.trim().is_empty() {
        token.to_string()
    } else {
        format!("{existing} {token}")
    }
}

fn append_remark(table: &mut Table, row: usize, token: &str) {
    let current = table.get(row, REMARK).map(CellValue::display).unwrap_or_default();
    table.set(row, REMARK, CellValue::text(append_token(&current, token)));
}
