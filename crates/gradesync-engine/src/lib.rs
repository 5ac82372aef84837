//! Wires the source crawler and the target store into one sync run:
//! preflight, crawl, build rows, check them against the live schema, wipe,
//! then write.

pub mod pipeline;
pub mod summary;

pub use pipeline::{RunOptions, SyncPipeline};
pub use summary::{FailedStudent, RunSummary};
