//! CLI Exit Code Registry
//!
//! Single source of truth for `sumrec` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                         |
//! |------|-------------------------------------------------|
//! | 0    | Success                                         |
//! | 1    | General error (store failure, bad transition)   |
//! | 2    | Usage error (bad arguments, unreadable path)    |
//! | 3    | Upload has an unsupported file type             |
//! | 4    | Upload could not be parsed                      |
//! | 5    | Required column or input file missing           |
//! | 6    | Form constant empty or not allowed              |
//! | 7    | Job or download handle expired / unknown        |
//! | 8    | Workbook export or ledger update failed         |

use sumrec_cli::PipelineError;
use sumrec_io::IoError;
use sumrec_recon::ReconError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable input path.
pub const EXIT_USAGE: u8 = 2;

pub const EXIT_UNSUPPORTED_FILE: u8 = 3;

pub const EXIT_MALFORMED_INPUT: u8 = 4;

/// A canonical/overlay column could not be resolved, or the saved-MTM file
/// was required and not given.
pub const EXIT_MISSING_COLUMN: u8 = 5;

pub const EXIT_INVALID_CONSTANT: u8 = 6;

/// Job handle unknown, forged or past its TTL. Run `prepare` again.
pub const EXIT_SESSION_EXPIRED: u8 = 7;

pub const EXIT_EXPORT: u8 = 8;

/// Map a pipeline error to its exit code.
pub fn pipeline_exit_code(err: &PipelineError) -> u8 {
    match err {
        PipelineError::Io(IoError::UnsupportedFileType { .. }) => EXIT_UNSUPPORTED_FILE,
        PipelineError::Io(IoError::MalformedInput { .. } | IoError::HeaderNotFound { .. }) => EXIT_MALFORMED_INPUT,
        PipelineError::Io(IoError::Export(_)) => EXIT_EXPORT,
        PipelineError::Recon(ReconError::MissingColumn { .. } | ReconError::MissingInput(_)) => EXIT_MISSING_COLUMN,
        PipelineError::Recon(ReconError::InvalidConstant { .. }) => EXIT_INVALID_CONSTANT,
        PipelineError::SessionExpired(_) => EXIT_SESSION_EXPIRED,
        PipelineError::Ledger(_) => EXIT_EXPORT,
        PipelineError::InvalidTransition { .. } | PipelineError::Store(_) => EXIT_ERROR,
    }
}
