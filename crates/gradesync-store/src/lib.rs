//! Target side of a sync run: the table store client, schema checks, the
//! resilient batch writer and the wipe engine.

pub mod client;
pub mod filter;
pub mod retry;
pub mod schema;
pub mod select;
pub mod wipe;
pub mod writer;

pub use client::{AirtableClient, ListOptions, RecordStore, MAX_PAGE_SIZE};
pub use filter::filter_writable;
pub use retry::RetryPolicy;
pub use schema::{BaseSchema, FieldSchema, TableSchema};
pub use select::{fallback_option, unknown_select_values, validate_selects, SelectPolicy, SelectReport};
pub use wipe::{student_filter_formula, WipeEngine, WipePhase, WipeReport};
pub use writer::BatchWriter;
