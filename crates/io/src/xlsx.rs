// Excel workbook import (xlsx, xls) and export (xlsx only)
//
// Import: every sheet becomes a raw cell grid, in source order.
// Export: plain values, header row styled; no formulas or layout carried over.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader, Sheets};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook as XlsxWorkbook, Worksheet};
use sumrec_core::{CellValue, FileRole, Table};

use crate::error::IoError;
use crate::ReadMode;

/// Hard limit on worksheet names imposed by the format.
pub const MAX_SHEET_NAME_CHARS: usize = 31;

/// A named sheet as rows of cells, row 0 being the first physical row.
pub type SheetGrid = (String, Vec<Vec<CellValue>>);

/// Read every sheet of a workbook held in memory.
pub fn read_grids(bytes: &[u8], role: FileRole, mode: ReadMode) -> Result<Vec<SheetGrid>, IoError> {
    let mut workbook: Sheets<_> = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| IoError::malformed(role, format!("failed to open Excel file: {e}")))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(IoError::malformed(role, "Excel file contains no sheets"));
    }

    let mut grids = Vec::with_capacity(sheet_names.len());
    for sheet_name in sheet_names {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| IoError::malformed(role, format!("failed to read sheet '{sheet_name}': {e}")))?;

        // Range start offset (data may not begin at A1); pad so row/col
        // indices stay physical.
        let (start_row, start_col) = range.start().unwrap_or((0, 0));
        let mut grid: Vec<Vec<CellValue>> = vec![Vec::new(); start_row as usize];

        for row in range.rows() {
            let mut cells = vec![blank(mode); start_col as usize];
            cells.extend(row.iter().map(|cell| convert(cell, mode)));
            grid.push(cells);
        }

        log::debug!("{role}: sheet '{sheet_name}' has {} rows", grid.len());
        grids.push((sheet_name, grid));
    }

    Ok(grids)
}

fn blank(mode: ReadMode) -> CellValue {
    match mode {
        ReadMode::RawText => CellValue::text(""),
        ReadMode::Typed => CellValue::Empty,
    }
}

fn convert(cell: &Data, mode: ReadMode) -> CellValue {
    let typed = match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => {
            if s.is_empty() {
                CellValue::Empty
            } else {
                CellValue::Text(s.clone())
            }
        }
        Data::Float(n) => CellValue::Number(*n),
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        // Store error as text representation
        Data::Error(e) => CellValue::Text(format!("#{:?}", e)),
        Data::DateTime(dt) => CellValue::DateTime(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    };

    match mode {
        ReadMode::Typed => typed,
        ReadMode::RawText => CellValue::Text(typed.display()),
    }
}

/// Clip a sheet name to the format's limit (by characters, not bytes).
pub fn truncate_sheet_name(name: &str) -> String {
    name.chars().take(MAX_SHEET_NAME_CHARS).collect()
}

/// Serialize sheets, in the given order, into xlsx bytes.
///
/// Names are truncated to 31 characters. Two names that collide after
/// truncation are not renamed; the writer rejects them as an export error.
pub fn write_workbook<'a, I>(sheets: I) -> Result<Vec<u8>, IoError>
where
    I: IntoIterator<Item = (&'a str, &'a Table)>,
{
    let mut xlsx_workbook = XlsxWorkbook::new();
    let header_format = Format::new()
        .set_bold()
        .set_border(FormatBorder::Thin)
        .set_align(FormatAlign::Center);
    let date_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

    for (name, table) in sheets {
        let sheet_name = truncate_sheet_name(name);
        let worksheet = xlsx_workbook
            .add_worksheet()
            .set_name(&sheet_name)
            .map_err(|e| IoError::Export(format!("failed to create sheet '{sheet_name}': {e}")))?;
        write_sheet(worksheet, table, &header_format, &date_format)
            .map_err(|e| IoError::Export(format!("sheet '{sheet_name}': {e}")))?;
    }

    xlsx_workbook
        .save_to_buffer()
        .map_err(|e| IoError::Export(format!("failed to save XLSX: {e}")))
}

/// Single-sheet convenience wrapper around [`write_workbook`].
pub fn write_table(sheet_name: &str, table: &Table) -> Result<Vec<u8>, IoError> {
    write_workbook([(sheet_name, table)])
}

fn write_sheet(
    worksheet: &mut Worksheet,
    table: &Table,
    header_format: &Format,
    date_format: &Format,
) -> Result<(), rust_xlsxwriter::XlsxError> {
    for (col_idx, column) in table.columns().iter().enumerate() {
        let col = col_idx as u16;
        worksheet.write_string_with_format(0, col, &column.name, header_format)?;

        for (row_idx, cell) in column.values.iter().enumerate() {
            let row = row_idx as u32 + 1;
            match cell {
                CellValue::Empty => {}
                CellValue::Text(s) => {
                    if !s.is_empty() {
                        worksheet.write_string(row, col, s)?;
                    }
                }
                CellValue::Number(n) => {
                    worksheet.write_number(row, col, *n)?;
                }
                CellValue::Bool(b) => {
                    worksheet.write_boolean(row, col, *b)?;
                }
                CellValue::DateTime(serial) => {
                    worksheet.write_number_with_format(row, col, *serial, date_format)?;
                }
            }
        }
    }
    Ok(())
}
