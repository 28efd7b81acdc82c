//! Upload classification. The codec is chosen once, from the file extension.

use std::path::Path;

use sumrec_core::FileRole;

use crate::error::IoError;

/// How an upload's bytes are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// `.csv`, one implicit sheet.
    Delimited,
    /// `.xlsx` / `.xls`, one or more sheets.
    Workbook,
}

impl SourceFormat {
    pub fn from_filename(role: FileRole, filename: &str) -> Result<Self, IoError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("csv") => Ok(Self::Delimited),
            Some("xlsx") | Some("xls") => Ok(Self::Workbook),
            _ => Err(IoError::UnsupportedFileType {
                role,
                filename: filename.to_string(),
            }),
        }
    }
}

/// Raw bytes of one uploaded file plus what it is for.
#[derive(Debug, Clone)]
pub struct Upload {
    role: FileRole,
    filename: String,
    bytes: Vec<u8>,
    format: SourceFormat,
}

impl Upload {
    pub fn new(role: FileRole, filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, IoError> {
        let filename = filename.into();
        let format = SourceFormat::from_filename(role, &filename)?;
        Ok(Self { role, filename, bytes, format })
    }

    /// Read a file from disk; the upload name is the path's final component.
    pub fn from_path(role: FileRole, path: &Path) -> Result<Self, IoError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = SourceFormat::from_filename(role, &filename)?;
        let bytes = std::fs::read(path)
            .map_err(|e| IoError::malformed(role, format!("cannot read {}: {e}", path.display())))?;
        Ok(Self { role, filename, bytes, format })
    }

    pub fn role(&self) -> FileRole {
        self.role
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }
}
