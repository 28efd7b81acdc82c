use std::fmt;

use sumrec_io::IoError;
use sumrec_recon::ReconError;

use crate::job::JobState;
use crate::store::StoreError;

/// Anything that aborts a run. Per-row anomalies never get here.
#[derive(Debug)]
pub enum PipelineError {
    Io(IoError),
    Recon(ReconError),
    /// The handle is unknown, stale, forged or past its TTL.
    SessionExpired(&'static str),
    InvalidTransition { from: JobState, to: JobState },
    Store(StoreError),
    Ledger(String),
}

pub const JOB_EXPIRED: &str = "Session expired. Please run again.";
pub const DOWNLOAD_EXPIRED: &str = "Download expired. Please re-upload.";

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Recon(e) => write!(f, "{e}"),
            Self::SessionExpired(msg) => f.write_str(msg),
            Self::InvalidTransition { from, to } => write!(f, "job cannot move from {from} to {to}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Ledger(msg) => write!(f, "ledger update failed: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Recon(e) => Some(e),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for PipelineError {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

impl From<ReconError> for PipelineError {
    fn from(e: ReconError) -> Self {
        Self::Recon(e)
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
