//! Master ledger: every finalized first sheet appended to one workbook.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sumrec_core::{FileRole, Table};
use sumrec_io::{read_sheets, write_table, ReadMode, Upload};

use crate::error::PipelineError;

pub const LEDGER_SHEET: &str = "Ledger";

/// Shared append-only workbook.
///
/// `append` holds one lock across read, append and write, so writers inside
/// this process never lose each other's rows. Other processes are not
/// coordinated. The new workbook is written to a temp file and renamed over
/// the old one; a crash mid-write leaves the previous ledger in place.
pub struct Ledger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Ledger {
    /// The path must name an `.xlsx` workbook; it need not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        let is_xlsx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
        if !is_xlsx {
            return Err(PipelineError::Ledger(format!("{} is not an .xlsx path", path.display())));
        }
        Ok(Self { path, lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `rows` under the ledger's columns. Columns the ledger lacks are
    /// added at the end; cells a side lacks stay empty. Returns rows appended.
    pub fn append(&self, rows: &Table) -> Result<usize, PipelineError> {
        let _guard = self.lock.lock();

        let mut ledger = self.read_existing()?;
        let before = ledger.len();
        ledger.concat(rows);

        let bytes = write_table(LEDGER_SHEET, &ledger)?;
        self.replace_file(&bytes)?;

        log::info!(
            "ledger {}: {} -> {} rows",
            self.path.display(),
            before,
            ledger.len()
        );
        Ok(rows.len())
    }

    /// Current ledger contents (empty when the file does not exist yet).
    pub fn read(&self) -> Result<Table, PipelineError> {
        let _guard = self.lock.lock();
        self.read_existing()
    }

    fn read_existing(&self) -> Result<Table, PipelineError> {
        if !self.path.exists() {
            return Ok(Table::new());
        }
        let upload = Upload::from_path(FileRole::Ledger, &self.path)?;
        let sheets = read_sheets(&upload, ReadMode::Typed)?;
        Ok(sheets.first().map(|(_, t)| t.clone()).unwrap_or_default())
    }

    fn replace_file(&self, bytes: &[u8]) -> Result<(), PipelineError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let fail = |e: std::io::Error| PipelineError::Ledger(format!("{}: {e}", self.path.display()));

        std::fs::create_dir_all(&dir).map_err(fail)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(fail)?;
        tmp.write_all(bytes).map_err(fail)?;
        tmp.flush().map_err(fail)?;
        tmp.persist(&self.path).map_err(|e| fail(e.error))?;
        Ok(())
    }
}
