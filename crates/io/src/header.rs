//! Header-row location for usersetting exports whose header is not at a
//! fixed offset. The fixed-offset read is the default; this scan is the
//! alternate entry point.

use std::collections::HashSet;

use sumrec_core::normalize::normalize_cell;
use sumrec_core::{normalize, CellValue, NormalizedKey, Table};

/// How many leading rows the scan looks at by default.
pub const DEFAULT_SCAN_ROWS: usize = 30;

/// Labels that mark a usersetting header row.
pub const HEADER_MARKERS: [&str; 4] = ["Enabled", "User Alias", "User ID", "Max Loss"];

/// A row qualifies when at least this many markers appear in it.
const MIN_MARKERS: usize = 3;

/// Index of the first row (within `scan_rows`) that carries at least three of
/// the four marker labels, compared after normalization.
pub fn find_header_row(grid: &[Vec<CellValue>], scan_rows: usize) -> Option<usize> {
    let targets: Vec<NormalizedKey> = HEADER_MARKERS.iter().map(|s| normalize(s)).collect();

    grid.iter().take(scan_rows).position(|row| {
        let values: HashSet<NormalizedKey> = row.iter().map(normalize_cell).collect();
        if values.iter().all(|v| v.is_empty()) {
            return false;
        }
        targets.iter().filter(|t| values.contains(*t)).count() >= MIN_MARKERS
    })
}

/// Build a table from `header_row`, forward-filling blank header cells with
/// the last non-blank label to their left (merged header cells export that way).
pub fn coerce_header(mut grid: Vec<Vec<CellValue>>, header_row: usize) -> Table {
    if header_row >= grid.len() {
        return Table::default();
    }
    let data = grid.split_off(header_row + 1);
    let raw = grid.pop().unwrap_or_default();

    let mut last = String::new();
    let headers = raw
        .iter()
        .map(|cell| {
            let h = cell.display().trim().to_string();
            if !h.is_empty() {
                last = h.clone();
            }
            if h.is_empty() { last.clone() } else { h }
        })
        .collect();

    Table::from_rows(headers, data)
}
