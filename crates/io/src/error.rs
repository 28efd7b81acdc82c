use std::fmt;

use sumrec_core::FileRole;

#[derive(Debug, Clone, PartialEq)]
pub enum IoError {
    /// Upload extension outside `.csv` / `.xlsx` / `.xls`.
    UnsupportedFileType { role: FileRole, filename: String },
    /// The codec could not parse the bytes.
    MalformedInput { role: FileRole, detail: String },
    /// Header scan found no row carrying enough of the expected labels.
    HeaderNotFound { role: FileRole, scanned: usize },
    /// Workbook serialization failed (bad or duplicate sheet name, limits).
    Export(String),
}

impl IoError {
    pub fn malformed(role: FileRole, detail: impl Into<String>) -> Self {
        Self::MalformedInput { role, detail: detail.into() }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFileType { role, filename } => {
                write!(f, "{role} file '{filename}': unsupported file type (expected .csv, .xlsx or .xls)")
            }
            Self::MalformedInput { role, detail } => {
                write!(f, "{role} file could not be read: {detail}")
            }
            Self::HeaderNotFound { role, scanned } => {
                write!(f, "{role} file: no header row found in the first {scanned} rows")
            }
            Self::Export(msg) => write!(f, "workbook export failed: {msg}"),
        }
    }
}

impl std::error::Error for IoError {}
