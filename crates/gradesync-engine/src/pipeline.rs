use crate::summary::{FailedStudent, RunSummary};
use gradesync_core::{
    build_rows, to_fields, Fields, Result, StudentRows, SyncConfig, TableRef, WipeScope,
};
use gradesync_lms::{CanvasClient, Crawler, LmsApi};
use gradesync_store::{
    filter_writable, student_filter_formula, validate_selects, AirtableClient, BaseSchema,
    BatchWriter, ListOptions, RecordStore, RetryPolicy, SelectPolicy, TableSchema, WipeEngine,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Options shown for each select field when schema logging is on.
const SCHEMA_LOG_OPTIONS: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after validation; nothing is deleted or written
    pub dry_run: bool,
}

/// Rows for one target table, checked and ready to write.
struct PreparedTable<'a> {
    label: &'static str,
    table: &'a TableRef,
    rows: Vec<Fields>,
}

/// One sync run, from student ids to rewritten tables.
pub struct SyncPipeline {
    config: SyncConfig,
    lms: Arc<dyn LmsApi>,
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, lms: Arc<dyn LmsApi>, store: Arc<dyn RecordStore>) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            lms,
            store,
            retry,
        }
    }

    /// Pipeline over the real Canvas and Airtable clients.
    pub fn from_config(config: SyncConfig) -> Result<Self> {
        let lms = Arc::new(CanvasClient::new(&config.lms)?);
        let store = Arc::new(AirtableClient::new(&config.store)?);
        Ok(Self::new(config, lms, store))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn tables(&self) -> [(&'static str, &TableRef); 2] {
        [
            ("Detail table", &self.config.store.detail_table),
            ("Summary table", &self.config.store.summary_table),
        ]
    }

    /// Read one record from each target table.
    #[instrument(skip(self))]
    pub async fn preflight(&self) -> Result<()> {
        let [(_, detail), (_, summary)] = self.tables();
        info!(
            "Store target: base={} detail={} summary={}",
            self.config.store.base_id, detail, summary
        );
        let probe = ListOptions::first(1);
        for (label, table) in self.tables() {
            let what = format!("{label} preflight");
            self.retry
                .run(&what, || {
                    self.store.list_record_ids(table.selector(), &probe)
                })
                .await?;
        }
        info!("Store preflight OK (can read both tables)");
        Ok(())
    }

    /// Fresh schema of the target base.
    pub async fn fetch_schema(&self) -> Result<BaseSchema> {
        let tables = self
            .retry
            .run("fetch schema", || self.store.fetch_schema())
            .await?;
        Ok(BaseSchema::from_tables(tables))
    }

    /// Configured tables with their live definitions, if found.
    pub async fn describe_tables(&self) -> Result<Vec<(TableRef, Option<TableSchema>)>> {
        let schema = self.fetch_schema().await?;
        Ok(self
            .tables()
            .into_iter()
            .map(|(_, table)| (table.clone(), schema.get(table.selector()).cloned()))
            .collect())
    }

    #[instrument(skip(self, student_ids), fields(students = student_ids.len()))]
    pub async fn run(&self, student_ids: &[String], options: RunOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::new(student_ids.len(), options.dry_run);
        info!("Run {} started", summary.run_id);

        self.preflight().await?;

        let crawler = Crawler::new(Arc::clone(&self.lms), &self.config)?;
        let terms = crawler.fetch_term_map().await;
        if terms.is_empty() {
            info!("Proceeding without term names; courses are labelled 'Term <id>'");
        }
        let crawler = crawler.with_term_names(terms);

        let outcome = crawler.crawl_students(student_ids).await;
        summary.failed_students = outcome.failures.iter().map(FailedStudent::from).collect();
        summary.assignments_processed = outcome.stats.processed;
        summary.assignments_skipped = outcome.stats.skipped;
        summary.courses_excluded = outcome.stats.courses_excluded;
        summary.students_synced = outcome
            .students
            .iter()
            .map(|p| p.student_name().to_string())
            .collect();

        let mut rows = StudentRows::default();
        for progress in &outcome.students {
            rows.extend(build_rows(progress));
        }
        summary.detail_rows = rows.detail.len();
        summary.summary_rows = rows.summary.len();
        info!(
            "Built {} detail rows and {} summary rows for {} students",
            summary.detail_rows,
            summary.summary_rows,
            outcome.students.len()
        );

        let detail = rows.detail.iter().map(to_fields).collect::<Result<Vec<_>>>()?;
        let summary_fields = rows.summary.iter().map(to_fields).collect::<Result<Vec<_>>>()?;

        // Both tables are checked before anything is deleted or written.
        let schema = self.fetch_schema().await?;
        let [(detail_label, detail_ref), (summary_label, summary_ref)] = self.tables();
        let mut dropped = BTreeSet::new();
        let prepared = [
            self.prepare(&schema, detail_label, detail_ref, detail, &mut summary, &mut dropped)?,
            self.prepare(
                &schema,
                summary_label,
                summary_ref,
                summary_fields,
                &mut summary,
                &mut dropped,
            )?,
        ];
        summary.dropped_fields = dropped.into_iter().collect();

        if options.dry_run {
            info!("Dry run: skipping wipe and write");
            return Ok(summary.finish());
        }
        if outcome.students.is_empty() {
            warn!("No student was crawled successfully; leaving the tables untouched");
            return Ok(summary.finish());
        }

        let filter = match self.config.wipe.scope {
            WipeScope::All => None,
            WipeScope::Students => {
                info!(
                    "Deleting existing rows for {} student(s)",
                    summary.students_synced.len()
                );
                student_filter_formula(&summary.students_synced)
            }
        };
        let wipe = WipeEngine::new(Arc::clone(&self.store), self.retry.clone(), &self.config.wipe);
        for table in &prepared {
            let report = wipe
                .wipe_matching(table.table.selector(), filter.clone())
                .await?;
            summary.wipes.push(report);
        }

        let writer = BatchWriter::new(
            Arc::clone(&self.store),
            self.retry.clone(),
            &self.config.writer,
        );
        for table in &prepared {
            info!("Writing {}", table.label);
            summary.rows_written += writer.insert(table.table.selector(), &table.rows).await?;
        }

        let summary = summary.finish();
        info!(
            "Run {} finished in {:.1}s",
            summary.run_id,
            summary.duration_secs()
        );
        Ok(summary)
    }

    /// Validate select values, then strip fields the store will not accept.
    fn prepare<'a>(
        &self,
        schema: &BaseSchema,
        label: &'static str,
        table: &'a TableRef,
        mut rows: Vec<Fields>,
        summary: &mut RunSummary,
        dropped: &mut BTreeSet<String>,
    ) -> Result<PreparedTable<'a>> {
        let Some(definition) = schema.get(table.selector()) else {
            warn!(
                "{} {} not found in the base schema; writing rows unchecked",
                label, table
            );
            return Ok(PreparedTable { label, table, rows });
        };

        let options = definition.select_options();
        if self.config.schema.log_schema {
            for (field, choices) in &options {
                let shown: Vec<&String> = choices.iter().take(SCHEMA_LOG_OPTIONS).collect();
                info!("[schema] {}: '{}' options {:?}", label, field, shown);
            }
        }

        let policy = SelectPolicy::from_flag(self.config.schema.allow_select_fallback);
        let report = validate_selects(label, &mut rows, &options, policy)?;
        summary.coerced_values += report.coerced;

        let (rows, removed) = filter_writable(label, rows, &definition.writable_fields());
        dropped.extend(removed);
        Ok(PreparedTable { label, table, rows })
    }
}
