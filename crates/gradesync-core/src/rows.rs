use crate::model::{DetailRow, StudentProgress, SummaryRow};

/// Rows derived from one student's crawl.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentRows {
    pub detail: Vec<DetailRow>,
    pub summary: Vec<SummaryRow>,
}

impl StudentRows {
    pub fn extend(&mut self, other: StudentRows) {
        self.detail.extend(other.detail);
        self.summary.extend(other.summary);
    }
}

/// Completed count and completion fraction for a list of assignments.
///
/// `completed + unsubmitted == total`; the fraction is `0.0` for an empty
/// course. A `completed` above `total` counts as `total`.
pub fn completion(total: usize, completed: usize) -> (usize, f64) {
    let completed = completed.min(total);
    let unsubmitted = total - completed;
    let fraction = if total > 0 {
        completed as f64 / total as f64
    } else {
        0.0
    };
    (unsubmitted, fraction)
}

/// One detail row per assignment and one summary row per course key.
///
/// Pure and deterministic: course keys come out in key order and
/// assignments in crawl order.
pub fn build_rows(progress: &StudentProgress) -> StudentRows {
    let student_name = progress.student_name();
    let mut rows = StudentRows::default();

    for (key, assignments) in &progress.courses {
        let total = assignments.len();
        let completed = assignments
            .iter()
            .filter(|a| a.status.is_completed())
            .count();
        let (unsubmitted, fraction) = completion(total, completed);

        rows.detail.extend(assignments.iter().map(|a| DetailRow {
            student_name: student_name.to_string(),
            term_name: key.term.clone(),
            course_name: key.course.clone(),
            assignment_name: a.name.clone(),
            due_date: a.due_at.clone().filter(|d| !d.is_empty()),
            submission_status: a.status,
            grade: a.grade.clone(),
        }));

        rows.summary.push(SummaryRow {
            student_name: student_name.to_string(),
            term_name: key.term.clone(),
            course_name: key.course.clone(),
            total_assignments: total,
            completed,
            unsubmitted,
            completion: fraction,
        });
    }

    rows
}
