//! Saved-MTM overlay: realized MTM per user id from an external export.

use std::collections::HashMap;

use sumrec_core::normalize::{normalize_cell, OVERLAY_REALIZED_MTM, OVERLAY_SYNONYMS, OVERLAY_USER_ID};
use sumrec_core::{CellValue, FileRole, NormalizedKey, Table};

use crate::error::ReconError;

#[derive(Debug, Clone, Default)]
pub struct MtmOverlay {
    values: HashMap<NormalizedKey, CellValue>,
}

impl MtmOverlay {
    /// Build from the first sheet of a saved-MTM export.
    ///
    /// Both the user-id and realized-MTM columns must resolve. Rows with a
    /// blank id are skipped; a repeated id keeps its last value.
    pub fn from_table(table: &Table) -> Result<Self, ReconError> {
        let id_col = resolve(table, OVERLAY_USER_ID)?;
        let mtm_col = resolve(table, OVERLAY_REALIZED_MTM)?;

        let mut values = HashMap::new();
        for row in 0..table.len() {
            let key = table.get(row, id_col).map(normalize_cell).unwrap_or_default();
            if key.is_empty() {
                continue;
            }
            let value = table.get(row, mtm_col).cloned().unwrap_or_default();
            values.insert(key, value);
        }

        log::info!("saved MTM: {} ids", values.len());
        Ok(Self { values })
    }

    /// Overlay value for an id, if present and not blank.
    pub fn get(&self, key: &NormalizedKey) -> Option<&CellValue> {
        self.values.get(key).filter(|v| !v.is_blank())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn resolve<'t>(table: &'t Table, canonical: &str) -> Result<&'t str, ReconError> {
    OVERLAY_SYNONYMS
        .resolve(canonical, table.column_names())
        .ok_or_else(|| ReconError::MissingColumn {
            role: FileRole::MtmOverlay,
            column: canonical.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sumrec_core::normalize;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::from_rows(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| CellValue::infer(s)).collect())
                .collect(),
        )
    }

    #[test]
    fn builds_with_flexible_headers() {
        let t = table(&["user_id", "Realized MTM"], &[&["u1", "7777"], &["", "1"], &["U2", ""]]);
        let overlay = MtmOverlay::from_table(&t).unwrap();
        assert_eq!(overlay.len(), 2);
        assert_eq!(overlay.get(&normalize("U1")), Some(&CellValue::Number(7777.0)));
        // blank overlay values are treated as absent
        assert_eq!(overlay.get(&normalize("u2")), None);
    }

    #[test]
    fn missing_columns_are_fatal() {
        let err = MtmOverlay::from_table(&table(&["UserID", "PnL"], &[])).unwrap_err();
        assert_eq!(
            err,
            ReconError::MissingColumn { role: FileRole::MtmOverlay, column: OVERLAY_REALIZED_MTM.into() }
        );

        let err = MtmOverlay::from_table(&table(&["Account", "realizedMTM"], &[])).unwrap_err();
        assert_eq!(
            err,
            ReconError::MissingColumn { role: FileRole::MtmOverlay, column: OVERLAY_USER_ID.into() }
        );
    }
}
