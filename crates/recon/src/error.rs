use std::fmt;

use sumrec_core::FileRole;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconError {
    /// A required column could not be resolved, even through synonyms.
    MissingColumn { role: FileRole, column: String },
    /// A required input file was not supplied.
    MissingInput(FileRole),
    /// A form constant is empty or outside its allowed values.
    InvalidConstant { field: &'static str, value: String },
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingColumn { role, column } => {
                write!(f, "{role} file is missing column: {column}")
            }
            Self::MissingInput(role) => write!(f, "{role} file is required for this run"),
            Self::InvalidConstant { field, value } => {
                if value.is_empty() {
                    write!(f, "{field} is required")
                } else {
                    write!(f, "invalid {field}: '{value}'")
                }
            }
        }
    }
}

impl std::error::Error for ReconError {}
