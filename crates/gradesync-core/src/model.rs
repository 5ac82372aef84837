//! Run-scoped record types.
//!
//! Everything here lives for a single run: built from the crawl, turned into
//! rows, written to the target store and dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SyncError};

/// Field map in the target store's wire format.
pub type Fields = serde_json::Map<String, serde_json::Value>;

pub const UNKNOWN_TERM: &str = "Unknown Term";
pub const UNKNOWN_COURSE: &str = "Unknown Course";
pub const GRADE_NOT_AVAILABLE: &str = "N/A";
pub const GRADE_EXCUSED: &str = "Excused";

/// Student being synchronized, as resolved from the source profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
}

impl StudentRecord {
    /// Name used when the profile has none.
    pub fn fallback_name(id: &str) -> String {
        format!("User {}", id)
    }
}

/// (term, course) grouping key. Only unique within one student's run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CourseKey {
    pub term: String,
    pub course: String,
}

impl CourseKey {
    pub fn new(term: impl Into<String>, course: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            course: course.into(),
        }
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.term, self.course)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Graded,
    Excused,
    Unsubmitted,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Graded => "graded",
            SubmissionStatus::Excused => "excused",
            SubmissionStatus::Unsubmitted => "unsubmitted",
        }
    }

    /// Graded and excused work both count toward completion.
    pub fn is_completed(&self) -> bool {
        matches!(self, SubmissionStatus::Graded | SubmissionStatus::Excused)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retained assignment together with the student's submission state.
///
/// `grade` is always populated: `"N/A"` and `"Excused"` are real values here,
/// not missing-data markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentFact {
    pub name: String,
    pub due_at: Option<String>,
    pub status: SubmissionStatus,
    pub grade: String,
}

/// Crawl output for one student.
#[derive(Debug, Clone)]
pub struct StudentProgress {
    pub student: StudentRecord,
    pub courses: BTreeMap<CourseKey, Vec<AssignmentFact>>,
}

impl StudentProgress {
    pub fn new(student: StudentRecord) -> Self {
        Self {
            student,
            courses: BTreeMap::new(),
        }
    }

    pub fn student_name(&self) -> &str {
        &self.student.name
    }

    pub fn assignment_count(&self) -> usize {
        self.courses.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRow {
    #[serde(rename = "Student Name")]
    pub student_name: String,
    #[serde(rename = "Term Name")]
    pub term_name: String,
    #[serde(rename = "Course Name")]
    pub course_name: String,
    #[serde(rename = "Assignment Name")]
    pub assignment_name: String,
    #[serde(rename = "Due Date", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(rename = "Submission Status")]
    pub submission_status: SubmissionStatus,
    #[serde(rename = "Grade")]
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    #[serde(rename = "Student Name")]
    pub student_name: String,
    #[serde(rename = "Term Name")]
    pub term_name: String,
    #[serde(rename = "Course Name")]
    pub course_name: String,
    #[serde(rename = "Total Assignments")]
    pub total_assignments: usize,
    #[serde(rename = "Completed")]
    pub completed: usize,
    #[serde(rename = "Unsubmitted")]
    pub unsubmitted: usize,
    /// Fraction in `[0, 1]`, not a percentage.
    #[serde(rename = "Percentage Completed")]
    pub completion: f64,
}

/// Serialize a typed row into the store's field map.
pub fn to_fields<T: Serialize>(row: &T) -> Result<Fields> {
    match serde_json::to_value(row)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(SyncError::InvalidOperation(format!(
            "row did not serialize to an object: {}",
            other
        ))),
    }
}
