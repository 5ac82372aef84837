use crate::client::RecordStore;
use crate::retry::RetryPolicy;
use gradesync_core::{truncate_chars, Fields, Result, SyncError, WriterConfig, MAX_STORE_BATCH};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

const FIRST_ROW_PREVIEW_CHARS: usize = 500;

/// Creates rows in store-sized batches under the retry policy.
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    batch_size: usize,
    pacing: Duration,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn RecordStore>, retry: RetryPolicy, config: &WriterConfig) -> Self {
        Self {
            store,
            retry,
            batch_size: config.batch_size.clamp(1, MAX_STORE_BATCH),
            pacing: Duration::from_millis(config.pacing_ms),
        }
    }

    /// Insert every row; returns the number created. The first failing
    /// batch aborts the insert with a [`SyncError::BatchWrite`].
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn insert(&self, table: &str, rows: &[Fields]) -> Result<usize> {
        info!("Inserting {} rows into {}", rows.len(), table);
        let mut created = 0;

        for (index, chunk) in rows.chunks(self.batch_size).enumerate() {
            let batch = index + 1;
            if index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let what = format!("{table}: create batch {batch}");
            let result = self
                .retry
                .run(&what, || self.store.batch_create(table, chunk))
                .await;

            match result {
                Ok(_) => {
                    debug!("{}: batch {} ok ({} rows)", table, batch, chunk.len());
                    created += chunk.len();
                }
                Err(source) => {
                    let first_row = preview(&chunk[0]);
                    error!("{}: batch {} failed, first record: {}", table, batch, first_row);
                    return Err(SyncError::BatchWrite {
                        table: table.to_string(),
                        batch,
                        first_row,
                        source: Box::new(source),
                    });
                }
            }
        }

        Ok(created)
    }
}

fn preview(row: &Fields) -> String {
    let text = Value::Object(row.clone()).to_string();
    truncate_chars(&text, FIRST_ROW_PREVIEW_CHARS)
}
