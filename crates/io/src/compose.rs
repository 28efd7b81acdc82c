//! Workbook composer: the enriched first sheet plus every untouched sheet.

use sumrec_core::{SheetSet, Table};

use crate::error::IoError;
use crate::xlsx::write_workbook;

/// Emit `originals` in source order, substituting `enriched` for the sheet
/// named `first_sheet_name`. Other sheets are re-serialized as read.
pub fn compose(enriched: &Table, originals: &SheetSet, first_sheet_name: &str) -> Result<Vec<u8>, IoError> {
    let sheets = originals.iter().map(|(name, table)| {
        if name == first_sheet_name {
            (name, enriched)
        } else {
            (name, table)
        }
    });

    let bytes = write_workbook(sheets)?;
    log::info!(
        "composed workbook: {} sheet(s), {} bytes",
        originals.len(),
        bytes.len()
    );
    Ok(bytes)
}
