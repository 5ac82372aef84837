//! Empty a table before it is rewritten.
//!
//! The store's list endpoint can lag behind deletes, so one delete-and-check
//! round is not enough. The engine runs up to `max_passes` rounds of
//!
//! ```text
//! COLLECT ── empty ──────────────────────────────► DONE
//!    │
//!    ▼
//! DELETE (batches ≤ 10, bounded pool, rate capped)
//!    │
//!    ▼
//! VERIFY ─── empty ──────────────────────────────► DONE
//!    │ survivors, passes left ──► COLLECT
//!    │ survivors, no passes left
//!    ▼
//! STRAGGLERS (one by one, under the retry policy) ► DONE
//! ```
//!
//! Failed delete batches are logged and left to VERIFY.

use crate::client::{ListOptions, RecordStore};
use crate::retry::RetryPolicy;
use gradesync_core::{ErrorKind, Result, SyncError, WipeConfig, MAX_STORE_BATCH};
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipePhase {
    Collect,
    Delete,
    Verify,
    Stragglers,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WipeReport {
    pub table: String,
    /// Delete passes started
    pub passes: usize,
    /// Records the store confirmed as deleted
    pub deleted: usize,
    pub failed_batches: usize,
    /// Ids left after the last pass and deleted one by one
    pub stragglers: usize,
    /// Ids that could not be deleted at all
    pub survivors: Vec<String>,
}

impl WipeReport {
    pub fn converged(&self) -> bool {
        self.survivors.is_empty()
    }
}

/// Store-side formula matching rows of the given students.
pub fn student_filter_formula(student_names: &[String]) -> Option<String> {
    if student_names.is_empty() {
        return None;
    }
    let clauses: Vec<String> = student_names
        .iter()
        .map(|name| format!("{{Student Name}} = \"{}\"", name.replace('"', "\\\"")))
        .collect();
    Some(format!("OR({})", clauses.join(",")))
}

pub struct WipeEngine {
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    max_passes: usize,
    batch_size: usize,
    concurrency: usize,
    page_size: u32,
    limiter: Arc<DirectLimiter>,
}

impl WipeEngine {
    pub fn new(store: Arc<dyn RecordStore>, retry: RetryPolicy, config: &WipeConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            store,
            retry,
            max_passes: config.max_passes.max(1),
            batch_size: config.batch_size.clamp(1, MAX_STORE_BATCH),
            concurrency: config.concurrency.max(1),
            page_size: config.page_size,
            // No burst: batches are spaced evenly, never more than the ceiling in any second.
            limiter: Arc::new(RateLimiter::direct(
                Quota::per_second(per_second).allow_burst(NonZeroU32::MIN),
            )),
        }
    }

    /// Delete every record of `table`.
    pub async fn wipe(&self, table: &str) -> Result<WipeReport> {
        self.wipe_matching(table, None).await
    }

    /// Delete the records of `table` matching `filter`, or all of them.
    #[instrument(skip(self))]
    pub async fn wipe_matching(&self, table: &str, filter: Option<String>) -> Result<WipeReport> {
        let options = ListOptions::paged(self.page_size).with_filter(filter);
        let mut report = WipeReport {
            table: table.to_string(),
            ..Default::default()
        };
        let mut ids: Vec<String> = Vec::new();
        let mut phase = WipePhase::Collect;

        loop {
            debug!("{}: {:?} (pass {})", table, phase, report.passes);
            phase = match phase {
                WipePhase::Collect => {
                    ids = self.list(table, &options).await?;
                    if ids.is_empty() {
                        WipePhase::Done
                    } else {
                        report.passes += 1;
                        info!(
                            "{}: pass {}/{}: deleting {} records",
                            table,
                            report.passes,
                            self.max_passes,
                            ids.len()
                        );
                        WipePhase::Delete
                    }
                }
                WipePhase::Delete => {
                    let (deleted, failed) = self.delete_batches(table, &ids).await?;
                    report.deleted += deleted;
                    report.failed_batches += failed;
                    WipePhase::Verify
                }
                WipePhase::Verify => {
                    ids = self.list(table, &options).await?;
                    if ids.is_empty() {
                        WipePhase::Done
                    } else if report.passes < self.max_passes {
                        info!("{}: {} records still listed; another pass", table, ids.len());
                        WipePhase::Collect
                    } else {
                        WipePhase::Stragglers
                    }
                }
                WipePhase::Stragglers => {
                    warn!(
                        "{}: {} records survived {} passes; deleting one by one",
                        table,
                        ids.len(),
                        report.passes
                    );
                    report.stragglers = ids.len();
                    for id in std::mem::take(&mut ids) {
                        match self.delete_one(table, &id).await {
                            Ok(true) => report.deleted += 1,
                            Ok(false) => {}
                            Err(e) => {
                                warn!("{}: could not delete record {}: {}", table, id, e);
                                report.survivors.push(id);
                            }
                        }
                    }
                    WipePhase::Done
                }
                WipePhase::Done => break,
            };
        }

        if report.converged() {
            info!(
                "{}: wipe complete ({} deleted over {} passes)",
                table, report.deleted, report.passes
            );
        } else {
            warn!(
                "{}: wipe left {} records behind: {:?}",
                table,
                report.survivors.len(),
                report.survivors
            );
        }
        Ok(report)
    }

    async fn list(&self, table: &str, options: &ListOptions) -> Result<Vec<String>> {
        let what = format!("{table}: list records");
        self.retry
            .run(&what, || self.store.list_record_ids(table, options))
            .await
    }

    /// Fan delete batches out to the worker pool, admitting at most
    /// `requests_per_second` batches per second. Returns (deleted, failed batches).
    async fn delete_batches(&self, table: &str, ids: &[String]) -> Result<(usize, usize)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            self.limiter.until_ready().await;
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SyncError::InvalidOperation(format!("delete pool closed: {e}")))?;

            let store = Arc::clone(&self.store);
            let retry = self.retry.clone();
            let table = table.to_string();
            let chunk = chunk.to_vec();
            let batch = index + 1;
            tasks.spawn(async move {
                let _permit = permit;
                let what = format!("{table}: delete batch {batch}");
                let result = retry
                    .run(&what, || store.batch_delete(&table, &chunk))
                    .await;
                (batch, result)
            });
        }

        let mut deleted = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(confirmed))) => deleted += confirmed.len(),
                Ok((batch, Err(e))) => {
                    warn!("{}: delete batch {} failed: {}", table, batch, e);
                    failed += 1;
                }
                Err(e) => {
                    warn!("{}: delete task aborted: {}", table, e);
                    failed += 1;
                }
            }
        }
        Ok((deleted, failed))
    }

    /// `Ok(false)` when the record was already gone.
    async fn delete_one(&self, table: &str, id: &str) -> Result<bool> {
        let what = format!("{table}: delete record {id}");
        match self.retry.run(&what, || self.store.delete(table, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
