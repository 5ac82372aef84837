use gradesync_core::{SubmissionStatus, GRADE_EXCUSED, GRADE_NOT_AVAILABLE};

use crate::wire::Submission;

/// Collapse a submission into (status, grade).
///
/// Precedence: excused wins outright; a graded or submitted workflow with a
/// real grade is "graded"; everything else is "unsubmitted" with grade "N/A".
pub fn map_submission(
    excused: bool,
    workflow_state: Option<&str>,
    grade: Option<&str>,
) -> (SubmissionStatus, String) {
    if excused {
        return (SubmissionStatus::Excused, GRADE_EXCUSED.to_string());
    }

    let state = workflow_state.unwrap_or("unsubmitted");
    let has_grade = matches!(grade, Some(g) if !g.trim().is_empty() && g.trim() != "-");

    match (state, grade) {
        ("graded" | "submitted", Some(g)) if has_grade => (SubmissionStatus::Graded, g.to_string()),
        _ => (
            SubmissionStatus::Unsubmitted,
            GRADE_NOT_AVAILABLE.to_string(),
        ),
    }
}

impl Submission {
    pub fn status(&self) -> (SubmissionStatus, String) {
        map_submission(
            self.excused.unwrap_or(false),
            self.workflow_state.as_deref(),
            self.grade.as_deref(),
        )
    }
}

/// What a missing submission (404) means.
pub fn missing_submission() -> (SubmissionStatus, String) {
    (
        SubmissionStatus::Unsubmitted,
        GRADE_NOT_AVAILABLE.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graded_submission_keeps_its_grade() {
        assert_eq!(
            map_submission(false, Some("graded"), Some("B+")),
            (SubmissionStatus::Graded, "B+".to_string())
        );
        assert_eq!(
            map_submission(false, Some("submitted"), Some("92")),
            (SubmissionStatus::Graded, "92".to_string())
        );
    }

    #[test]
    fn unsubmitted_without_grade() {
        assert_eq!(
            map_submission(false, Some("unsubmitted"), None),
            (SubmissionStatus::Unsubmitted, "N/A".to_string())
        );
        assert_eq!(
            map_submission(false, None, None),
            (SubmissionStatus::Unsubmitted, "N/A".to_string())
        );
    }

    #[test]
    fn placeholder_grades_do_not_count() {
        for grade in ["", "-", "  "] {
            assert_eq!(
                map_submission(false, Some("graded"), Some(grade)).0,
                SubmissionStatus::Unsubmitted
            );
        }
        assert_eq!(
            map_submission(false, Some("pending_review"), Some("A")).0,
            SubmissionStatus::Unsubmitted
        );
    }

    #[test]
    fn excused_wins_over_everything() {
        let states = [None, Some("graded"), Some("submitted"), Some("unsubmitted")];
        let grades = [None, Some("A"), Some("-"), Some("")];
        for state in states {
            for grade in grades {
                assert_eq!(
                    map_submission(true, state, grade),
                    (SubmissionStatus::Excused, "Excused".to_string())
                );
            }
        }
    }

    #[test]
    fn wire_submission_maps_through() {
        let sub = Submission {
            workflow_state: Some("graded".into()),
            grade: Some("A-".into()),
            excused: Some(false),
        };
        assert_eq!(sub.status(), (SubmissionStatus::Graded, "A-".to_string()));
        assert_eq!(missing_submission().1, "N/A");
    }
}
