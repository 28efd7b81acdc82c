//! Library half of `sumrec`: the job/download stores, the job state machine,
//! the two-step pipeline and the shared ledger. The binary in `main.rs` is a
//! thin clap front end over these.

pub mod error;
pub mod job;
pub mod ledger;
pub mod pipeline;
pub mod store;

pub use error::PipelineError;
pub use job::{Job, JobState};
pub use ledger::Ledger;
pub use pipeline::{
    download, finalize, parse_remark_fields, prepare, remarks_from_table, DownloadArtifact, FinalOutput,
    PrepareRequest, Preview, PreviewRow, Stores,
};
pub use store::{FileStore, Handle, KvStore, MemoryStore, Slot, StoreError};
