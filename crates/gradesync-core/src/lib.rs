//! Shared types for GradeSync: configuration, the error taxonomy, the
//! run-scoped record model and the row builder.

pub mod config;
pub mod error;
pub mod model;
pub mod rows;

pub use config::{
    CrawlConfig, LmsConfig, LoggingConfig, RetryConfig, SchemaConfig, StoreConfig, SyncConfig,
    TableRef, WipeConfig, WipeScope, WriterConfig, MAX_STORE_BATCH,
};
pub use error::*;
pub use model::*;
pub use rows::{build_rows, completion, StudentRows};
