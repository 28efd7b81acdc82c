//! File I/O: delimited and Excel readers, header-row scan, workbook composer.
//!
//! Everything works on in-memory bytes; the codec is picked once per upload
//! from its extension ([`SourceFormat`]).

pub mod compose;
pub mod csv;
pub mod error;
pub mod header;
pub mod source;
pub mod xlsx;

pub use compose::compose;
pub use error::IoError;
pub use source::{SourceFormat, Upload};
pub use xlsx::{truncate_sheet_name, write_table, write_workbook, MAX_SHEET_NAME_CHARS};

use sumrec_core::{CellValue, SheetSet, Table};

/// Sheet name given to the single implicit sheet of a delimited file.
pub const DELIMITED_SHEET_NAME: &str = "Sheet1";

/// How cells are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Every cell is text; blank cells are empty strings.
    RawText,
    /// Numbers, booleans and dates keep their type; blank cells are `Empty`.
    Typed,
}

/// Where the header row of a sheet is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRow {
    /// 0-indexed physical row.
    Fixed(usize),
    /// Scan the first `scan_rows` rows for the usersetting marker labels.
    Detect { scan_rows: usize },
}

/// Read the first sheet of an upload as a table.
pub fn read_table(upload: &Upload, header: HeaderRow, mode: ReadMode) -> Result<Table, IoError> {
    let role = upload.role();
    let grid = first_grid(upload, mode)?;

    let table = match header {
        HeaderRow::Fixed(row) => {
            if row >= grid.len() {
                return Err(IoError::malformed(
                    role,
                    format!("expected a header on row {}, but the sheet has {} row(s)", row + 1, grid.len()),
                ));
            }
            Table::from_grid(grid, row)
        }
        HeaderRow::Detect { scan_rows } => {
            let row = header::find_header_row(&grid, scan_rows)
                .ok_or(IoError::HeaderNotFound { role, scanned: scan_rows })?;
            log::debug!("{role}: detected header on row {}", row + 1);
            header::coerce_header(grid, row)
        }
    };

    log::info!("{role}: {} rows x {} columns from '{}'", table.len(), table.width(), upload.filename());
    Ok(table)
}

/// Read every sheet with its first non-blank row as the header, preserving
/// sheet order and names. A delimited file is one sheet named
/// [`DELIMITED_SHEET_NAME`].
pub fn read_sheets(upload: &Upload, mode: ReadMode) -> Result<SheetSet, IoError> {
    let mut set = SheetSet::new();
    match upload.format() {
        SourceFormat::Delimited => {
            let grid = csv::read_grid(upload.bytes(), upload.role(), mode)?;
            set.push(DELIMITED_SHEET_NAME, table_below_blank_rows(grid));
        }
        SourceFormat::Workbook => {
            for (name, grid) in xlsx::read_grids(upload.bytes(), upload.role(), mode)? {
                set.push(name, table_below_blank_rows(grid));
            }
        }
    }
    log::info!("{}: {} sheet(s) from '{}'", upload.role(), set.len(), upload.filename());
    Ok(set)
}

/// Header = first row with any non-blank cell. Sheets whose used range starts
/// below A1 come back padded with empty rows; those are not the header.
fn table_below_blank_rows(grid: Vec<Vec<CellValue>>) -> Table {
    let grid: Vec<Vec<CellValue>> = grid
        .into_iter()
        .skip_while(|row| row.iter().all(CellValue::is_blank))
        .collect();
    Table::from_grid(grid, 0)
}

fn first_grid(upload: &Upload, mode: ReadMode) -> Result<Vec<Vec<CellValue>>, IoError> {
    match upload.format() {
        SourceFormat::Delimited => csv::read_grid(upload.bytes(), upload.role(), mode),
        SourceFormat::Workbook => xlsx::read_grids(upload.bytes(), upload.role(), mode)?
            .into_iter()
            .next()
            .map(|(_, grid)| grid)
            .ok_or_else(|| IoError::malformed(upload.role(), "Excel file contains no sheets")),
    }
}
