use chrono::{DateTime, Utc};
use gradesync_lms::StudentFailure;
use gradesync_store::WipeReport;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct FailedStudent {
    pub student_id: String,
    pub reason: String,
}

impl From<&StudentFailure> for FailedStudent {
    fn from(failure: &StudentFailure) -> Self {
        Self {
            student_id: failure.student_id.clone(),
            reason: failure.reason.clone(),
        }
    }
}

/// What one run did, or would have done under `dry_run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub students_requested: usize,
    /// Display names of students whose data made it into the rows
    pub students_synced: Vec<String>,
    pub failed_students: Vec<FailedStudent>,
    pub assignments_processed: usize,
    pub assignments_skipped: usize,
    pub courses_excluded: usize,
    pub detail_rows: usize,
    pub summary_rows: usize,
    pub coerced_values: usize,
    pub dropped_fields: Vec<String>,
    pub wipes: Vec<WipeReport>,
    /// Rows actually created
    pub rows_written: usize,
}

impl RunSummary {
    pub fn new(students_requested: usize, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            students_requested,
            students_synced: Vec::new(),
            failed_students: Vec::new(),
            assignments_processed: 0,
            assignments_skipped: 0,
            courses_excluded: 0,
            detail_rows: 0,
            summary_rows: 0,
            coerced_values: 0,
            dropped_fields: Vec::new(),
            wipes: Vec::new(),
            rows_written: 0,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Records still present after their table's wipe.
    pub fn wipe_survivors(&self) -> usize {
        self.wipes.iter().map(|w| w.survivors.len()).sum()
    }

    pub fn duration_secs(&self) -> f64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default()
    }
}
