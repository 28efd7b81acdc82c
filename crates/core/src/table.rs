//! Columnar tables and ordered sheet sets.
//!
//! Columns are addressed by name only. Inserting or removing a column never
//! moves another column's values, so callers never hold positional indices
//! across schema changes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cell::CellValue;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<CellValue>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<CellValue>) -> Self {
        Self { name: name.into(), values }
    }
}

/// Header row + data rows, stored column by column. Column names are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a header and row-major data.
    ///
    /// Headers are cleaned with [`dedupe_headers`]. Short rows are padded with
    /// `Empty`. A row with non-blank cells past the header widens the table;
    /// the added columns get blank labels and so come out as `Unnamed: i`.
    pub fn from_rows(mut headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let used = rows
            .iter()
            .filter_map(|row| row.iter().rposition(|c| !c.is_blank()))
            .map(|last| last + 1)
            .max()
            .unwrap_or(0);
        if used > headers.len() {
            headers.resize(used, String::new());
        }
        let headers = dedupe_headers(headers);
        let row_count = rows.len();
        let mut columns: Vec<Column> = headers
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(row_count)))
            .collect();

        for row in rows {
            let mut cells = row.into_iter();
            for column in columns.iter_mut() {
                column.values.push(cells.next().unwrap_or_default());
            }
        }

        Self { columns, row_count }
    }

    /// Build from a raw grid, taking `header_row` as the header and every later
    /// row as data. Labels are kept as written. A header row beyond the grid
    /// yields an empty table.
    pub fn from_grid(mut grid: Vec<Vec<CellValue>>, header_row: usize) -> Self {
        if header_row >= grid.len() {
            return Self::default();
        }
        let data = grid.split_off(header_row + 1);
        let headers = grid
            .pop()
            .unwrap_or_default()
            .iter()
            .map(CellValue::display)
            .collect();
        Self::from_rows(headers, data)
    }

    pub fn len(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn get(&self, row: usize, name: &str) -> Option<&CellValue> {
        self.column(name).and_then(|c| c.values.get(row))
    }

    /// Overwrite one cell. Returns false when the column or row does not exist.
    pub fn set(&mut self, row: usize, name: &str, value: CellValue) -> bool {
        match self.column_mut(name).and_then(|c| c.values.get_mut(row)) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Insert a column at `at` (clamped to the table width).
    ///
    /// An existing column with the same name is removed first. `values` is
    /// padded or truncated to the row count.
    pub fn insert_column(&mut self, at: usize, name: &str, values: Vec<CellValue>) {
        self.remove_column(name);
        let at = at.min(self.columns.len());
        let values = self.fit(values);
        self.columns.insert(at, Column::new(name, values));
    }

    /// Replace a column's values in place, or append it if absent.
    pub fn set_column(&mut self, name: &str, values: Vec<CellValue>) {
        let values = self.fit(values);
        match self.column_mut(name) {
            Some(column) => column.values = values,
            None => self.columns.push(Column::new(name, values)),
        }
    }

    /// Broadcast one value into every row of `name`.
    pub fn fill_column(&mut self, name: &str, value: CellValue) {
        let values = vec![value; self.row_count];
        self.set_column(name, values);
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.position(name)?;
        Some(self.columns.remove(idx))
    }

    /// Project onto `names` in the given order. `None` if any is missing.
    pub fn select(&self, names: &[&str]) -> Option<Table> {
        let columns = names
            .iter()
            .map(|n| self.column(n).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(Table { columns, row_count: self.row_count })
    }

    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        if from != to && self.has_column(to) {
            return false;
        }
        match self.column_mut(from) {
            Some(column) => {
                column.name = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Put the columns named in `order` first (skipping absent ones), then every
    /// other column in its current relative order.
    pub fn reorder(&mut self, order: &[&str]) {
        let mut remaining = std::mem::take(&mut self.columns);
        let mut ordered = Vec::with_capacity(remaining.len());
        for name in order {
            if let Some(idx) = remaining.iter().position(|c| c.name == *name) {
                ordered.push(remaining.remove(idx));
            }
        }
        ordered.extend(remaining);
        self.columns = ordered;
    }

    /// One row as cells, in column order.
    pub fn row(&self, row: usize) -> Vec<&CellValue> {
        self.columns.iter().filter_map(|c| c.values.get(row)).collect()
    }

    pub fn row_display(&self, row: usize) -> Vec<String> {
        self.row(row).into_iter().map(CellValue::display).collect()
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Table {
        let n = n.min(self.row_count);
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.values[..n].to_vec()))
            .collect();
        Table { columns, row_count: n }
    }

    /// Append `other`'s rows below this table, matching columns by name.
    ///
    /// Columns only `other` has are appended (earlier rows get `Empty`);
    /// columns only `self` has get `Empty` for the new rows.
    pub fn concat(&mut self, other: &Table) {
        for column in &other.columns {
            if !self.has_column(&column.name) {
                self.columns.push(Column::new(
                    column.name.clone(),
                    vec![CellValue::Empty; self.row_count],
                ));
            }
        }
        for column in self.columns.iter_mut() {
            match other.column(&column.name) {
                Some(src) => column.values.extend(src.values.iter().cloned()),
                None => column
                    .values
                    .extend(std::iter::repeat(CellValue::Empty).take(other.row_count)),
            }
        }
        self.row_count += other.row_count;
    }

    fn fit(&self, mut values: Vec<CellValue>) -> Vec<CellValue> {
        values.resize(self.row_count, CellValue::Empty);
        values
    }
}

/// Make header labels unique the way dataframe readers do.
///
/// A blank label at position `i` becomes `Unnamed: i`; a repeat of `X`
/// becomes `X.1`, `X.2`, ... skipping names already taken.
pub fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(headers.len());

    for (i, header) in headers.into_iter().enumerate() {
        let base = if header.trim().is_empty() {
            format!("Unnamed: {i}")
        } else {
            header
        };

        let mut name = base.clone();
        let mut n = 1;
        while seen.contains(&name) {
            name = format!("{base}.{n}");
            n += 1;
        }
        seen.insert(name.clone());
        out.push(name);
    }

    out
}

/// Sheets of one workbook in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetSet {
    sheets: Vec<(String, Table)>,
}

impl SheetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, table: Table) {
        self.sheets.push((name.into(), table));
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn first(&self) -> Option<(&str, &Table)> {
        self.sheets.first().map(|(n, t)| (n.as_str(), t))
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.sheets.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.sheets.iter().map(|(n, t)| (n.as_str(), t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_rows(rows: &[&[&str]]) -> Vec<Vec<CellValue>> {
        rows.iter()
            .map(|r| r.iter().map(|s| CellValue::text(*s)).collect())
            .collect()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn from_rows_pads_short_rows_and_widens_for_long_ones() {
        let t = Table::from_rows(
            headers(&["A", "B"]),
            text_rows(&[&["1"], &["2", "3", "extra"]]),
        );
        assert_eq!(t.len(), 2);
        assert_eq!(t.column_names().collect::<Vec<_>>(), vec!["A", "B", "Unnamed: 2"]);
        assert_eq!(t.get(0, "B"), Some(&CellValue::Empty));
        assert_eq!(t.get(1, "B"), Some(&CellValue::text("3")));
        assert_eq!(t.get(0, "Unnamed: 2"), Some(&CellValue::Empty));
        assert_eq!(t.get(1, "Unnamed: 2"), Some(&CellValue::text("extra")));
    }

    #[test]
    fn trailing_blank_cells_do_not_widen() {
        let t = Table::from_rows(headers(&["A"]), text_rows(&[&["1", "", " "]]));
        assert_eq!(t.width(), 1);
    }

    #[test]
    fn dedupes_blank_and_repeated_headers() {
        let names = dedupe_headers(headers(&["X", "", "X", "X.1", "X"]));
        assert_eq!(names, vec!["X", "Unnamed: 1", "X.1", "X.1.1", "X.2"]);
    }

    #[test]
    fn from_grid_uses_header_row() {
        let grid = text_rows(&[&["junk"], &["Name", "Qty"], &["a", "1"]]);
        let t = Table::from_grid(grid, 1);
        assert_eq!(t.column_names().collect::<Vec<_>>(), vec!["Name", "Qty"]);
        assert_eq!(t.len(), 1);

        let spaced = Table::from_grid(text_rows(&[&[" Name", "Qty "], &["a", "1"]]), 0);
        assert_eq!(spaced.column_names().collect::<Vec<_>>(), vec![" Name", "Qty "]);

        let empty = Table::from_grid(text_rows(&[&["only"]]), 5);
        assert_eq!(empty.width(), 0);
    }

    #[test]
    fn insert_does_not_shift_values() {
        let mut t = Table::from_rows(headers(&["A", "B"]), text_rows(&[&["a", "b"]]));
        t.insert_column(1, "NEW", vec![CellValue::text("n")]);
        assert_eq!(t.column_names().collect::<Vec<_>>(), vec!["A", "NEW", "B"]);
        assert_eq!(t.get(0, "B"), Some(&CellValue::text("b")));

        t.insert_column(99, "END", vec![]);
        assert_eq!(t.position("END"), Some(3));
        assert_eq!(t.get(0, "END"), Some(&CellValue::Empty));
    }

    #[test]
    fn reorder_keeps_unknown_columns_last() {
        let mut t = Table::from_rows(headers(&["X", "B", "Y", "A"]), vec![]);
        t.reorder(&["A", "B", "MISSING"]);
        assert_eq!(t.column_names().collect::<Vec<_>>(), vec!["A", "B", "X", "Y"]);
    }

    #[test]
    fn concat_unions_columns() {
        let mut a = Table::from_rows(headers(&["A", "B"]), text_rows(&[&["1", "2"]]));
        let b = Table::from_rows(headers(&["B", "C"]), text_rows(&[&["3", "4"]]));
        a.concat(&b);
        assert_eq!(a.column_names().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get(1, "A"), Some(&CellValue::Empty));
        assert_eq!(a.get(0, "C"), Some(&CellValue::Empty));
        assert_eq!(a.get(1, "B"), Some(&CellValue::text("3")));
    }

    #[test]
    fn select_and_rename() {
        let t = Table::from_rows(headers(&["a", "b", "c"]), text_rows(&[&["1", "2", "3"]]));
        assert!(t.select(&["c", "zz"]).is_none());
        let mut s = t.select(&["c", "a"]).unwrap();
        assert!(s.rename("c", "C"));
        assert!(!s.rename("a", "C"));
        assert_eq!(s.row_display(0), vec!["3", "1"]);
    }

    #[test]
    fn serde_roundtrip_preserves_types() {
        let t = Table::from_rows(
            headers(&["n", "t"]),
            vec![vec![CellValue::Number(1.5), CellValue::text("x")]],
        );
        let json = serde_json::to_string(&t).unwrap();
        let back: Table = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
