use crate::client::{act_as, paginate, paginate_field, LmsApi};
use crate::filters::{AssignmentFilter, CourseFilter};
use crate::sanitize::CourseNameSanitizer;
use crate::submission::missing_submission;
use crate::wire::{Assignment, CanvasId, Course, Profile, Submission, Term};
use gradesync_core::{
    AssignmentFact, CourseKey, ErrorKind, Result, StudentProgress, StudentRecord, SubmissionStatus,
    SyncConfig, SyncError, UNKNOWN_TERM,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Per-run assignment and course counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Published assignments kept for row building
    pub processed: usize,
    /// Published assignments dropped by the title skip-list
    pub skipped: usize,
    pub courses_excluded: usize,
}

impl CrawlStats {
    pub fn merge(&mut self, other: CrawlStats) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.courses_excluded += other.courses_excluded;
    }
}

/// A student dropped from the run, with the reason.
#[derive(Debug, Clone)]
pub struct StudentFailure {
    pub student_id: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub students: Vec<StudentProgress>,
    pub failures: Vec<StudentFailure>,
    pub stats: CrawlStats,
}

/// Walks one student's profile, courses, assignments and submissions.
pub struct Crawler {
    api: Arc<dyn LmsApi>,
    sanitizer: CourseNameSanitizer,
    courses: CourseFilter,
    assignments: AssignmentFilter,
    enrollment_states: Vec<String>,
    page_size: u32,
    account_id: Option<String>,
    term_names: HashMap<String, String>,
}

impl Crawler {
    pub fn new(api: Arc<dyn LmsApi>, config: &SyncConfig) -> Result<Self> {
        let account_id = Some(config.lms.account_id.trim().to_string()).filter(|a| !a.is_empty());
        Ok(Self {
            api,
            sanitizer: CourseNameSanitizer::from_config(&config.crawl),
            courses: CourseFilter::from_config(&config.crawl)?,
            assignments: AssignmentFilter::from_config(&config.crawl),
            enrollment_states: config.lms.enrollment_states.clone(),
            page_size: config.lms.page_size,
            account_id,
            term_names: HashMap::new(),
        })
    }

    /// Use a term-id → name map for courses that do not embed their term.
    pub fn with_term_names(mut self, term_names: HashMap<String, String>) -> Self {
        self.term_names = term_names;
        self
    }

    fn per_page(&self) -> (String, String) {
        ("per_page".to_string(), self.page_size.to_string())
    }

    /// Enrollment terms of the configured account. Never fails: a token
    /// without account access just means terms are labelled by id.
    #[instrument(skip(self))]
    pub async fn fetch_term_map(&self) -> HashMap<String, String> {
        let Some(account_id) = &self.account_id else {
            debug!("No account id configured; skipping term lookup");
            return HashMap::new();
        };
        let endpoint = format!("accounts/{account_id}/terms");
        let items = match paginate_field(
            self.api.as_ref(),
            &endpoint,
            &[self.per_page()],
            "enrollment_terms",
        )
        .await
        {
            Ok(items) => items,
            Err(e) if e.kind() == ErrorKind::Permission => {
                warn!("No permission to read {}; continuing without term names", endpoint);
                return HashMap::new();
            }
            Err(e) => {
                warn!("Term lookup failed ({}); continuing without term names", e);
                return HashMap::new();
            }
        };

        let terms = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<Term>(item).ok())
            .filter_map(|term| Some((term.id?.0, term.name?)))
            .collect::<HashMap<_, _>>();
        info!("Discovered {} enrollment terms", terms.len());
        terms
    }

    /// Crawl students in input order. A failing student is logged and left
    /// out; the rest carry on.
    pub async fn crawl_students(&self, student_ids: &[String]) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();
        for student_id in student_ids {
            match self.crawl_student(student_id).await {
                Ok((progress, stats)) => {
                    info!(
                        student_id = %student_id,
                        "Crawled {} ({} courses, {} assignments)",
                        progress.student_name(),
                        progress.courses.len(),
                        progress.assignment_count()
                    );
                    outcome.stats.merge(stats);
                    outcome.students.push(progress);
                }
                Err(e) => {
                    match e.kind() {
                        ErrorKind::Permission => error!(
                            student_id = %student_id,
                            "Student failed with HTTP {}; the token needs admin rights with masquerade: {}",
                            e.status().unwrap_or_default(),
                            e
                        ),
                        _ => error!(student_id = %student_id, "Student failed: {}", e),
                    }
                    outcome.failures.push(StudentFailure {
                        student_id: student_id.clone(),
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcome
    }

    #[instrument(skip(self))]
    pub async fn crawl_student(&self, student_id: &str) -> Result<(StudentProgress, CrawlStats)> {
        let student = self.fetch_profile(student_id).await?;
        let mut progress = StudentProgress::new(student);
        let mut stats = CrawlStats::default();

        for course in self.fetch_courses(student_id).await? {
            let course_name = self
                .sanitizer
                .sanitize(course.name.as_deref(), course.course_code.as_deref());
            if let Some(reason) = self.courses.exclusion_reason(&course_name) {
                info!(course_id = %course.id, "Excluding course '{}': {}", course_name, reason);
                stats.courses_excluded += 1;
                continue;
            }
            let term_name = self.term_name(&course);

            let assignments = self.fetch_assignments(&course.id, &mut stats).await?;
            let mut facts = Vec::with_capacity(assignments.len());
            for assignment in assignments {
                let (status, grade) = self
                    .fetch_submission(&course.id, &assignment.id, student_id)
                    .await?;
                facts.push(AssignmentFact {
                    name: assignment.name.unwrap_or_default(),
                    due_at: assignment.due_at,
                    status,
                    grade,
                });
            }

            // Distinct courses can collapse onto one key; keep both lists.
            progress
                .courses
                .entry(CourseKey::new(term_name, course_name))
                .or_default()
                .extend(facts);
        }

        Ok((progress, stats))
    }

    async fn fetch_profile(&self, student_id: &str) -> Result<StudentRecord> {
        let page = self
            .api
            .get_page("users/self/profile", &[act_as(student_id)])
            .await?;
        let profile: Profile = serde_json::from_value(page.body)?;
        let name = profile
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| StudentRecord::fallback_name(student_id));
        Ok(StudentRecord {
            id: student_id.to_string(),
            name,
        })
    }

    /// Courses across every configured enrollment state, first sighting wins.
    async fn fetch_courses(&self, student_id: &str) -> Result<Vec<Course>> {
        let mut seen = HashSet::new();
        let mut courses = Vec::new();
        for state in &self.enrollment_states {
            let query = [
                act_as(student_id),
                ("enrollment_state".to_string(), state.clone()),
                ("include[]".to_string(), "term".to_string()),
                self.per_page(),
            ];
            let items = paginate(self.api.as_ref(), "users/self/courses", &query).await?;
            for course in decode_all::<Course>(items)? {
                if seen.insert(course.id.clone()) {
                    courses.push(course);
                }
            }
        }
        debug!("{} distinct courses across {} states", courses.len(), self.enrollment_states.len());
        Ok(courses)
    }

    async fn fetch_assignments(
        &self,
        course_id: &CanvasId,
        stats: &mut CrawlStats,
    ) -> Result<Vec<Assignment>> {
        let endpoint = format!("courses/{course_id}/assignments");
        let items = paginate(self.api.as_ref(), &endpoint, &[self.per_page()]).await?;

        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for assignment in decode_all::<Assignment>(items)? {
            // Pages can shift while they are read; an id counts once.
            if !seen.insert(assignment.id.clone()) {
                debug!(course_id = %course_id, "Assignment {} listed twice", assignment.id);
                continue;
            }
            if !assignment.published {
                continue;
            }
            let title = assignment.name.as_deref().unwrap_or_default();
            if self.assignments.is_skipped(title) {
                debug!(course_id = %course_id, "Skipping assignment {} '{}'", assignment.id, title);
                stats.skipped += 1;
                continue;
            }
            stats.processed += 1;
            kept.push(assignment);
        }
        Ok(kept)
    }

    async fn fetch_submission(
        &self,
        course_id: &CanvasId,
        assignment_id: &CanvasId,
        student_id: &str,
    ) -> Result<(SubmissionStatus, String)> {
        let endpoint =
            format!("courses/{course_id}/assignments/{assignment_id}/submissions/{student_id}");
        match self.api.get_page(&endpoint, &[]).await {
            Ok(page) => {
                let submission: Submission = match page.body {
                    Value::Null => Submission::default(),
                    body => serde_json::from_value(body)?,
                };
                Ok(submission.status())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(missing_submission()),
            Err(e) => Err(e),
        }
    }

    /// Embedded term, then the account term map, then the bare id.
    fn term_name(&self, course: &Course) -> String {
        if let Some(name) = course
            .term
            .as_ref()
            .and_then(|t| t.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            return name.to_string();
        }
        let term_id = course
            .enrollment_term_id
            .as_ref()
            .or_else(|| course.term.as_ref().and_then(|t| t.id.as_ref()));
        match term_id {
            Some(id) => self
                .term_names
                .get(&id.0)
                .cloned()
                .unwrap_or_else(|| format!("Term {id}")),
            None => UNKNOWN_TERM.to_string(),
        }
    }
}

fn decode_all<T: DeserializeOwned>(items: Vec<Value>) -> Result<Vec<T>> {
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(SyncError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Page;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticApi(HashMap<String, Value>);

    #[async_trait]
    impl LmsApi for StaticApi {
        async fn get_page(&self, endpoint: &str, _query: &[(String, String)]) -> Result<Page> {
            match self.0.get(endpoint) {
                Some(body) => Ok(Page {
                    body: body.clone(),
                    next: None,
                }),
                None => Err(SyncError::http(404, endpoint, "not found")),
            }
        }
    }

    fn crawler(routes: &[(&str, Value)]) -> Crawler {
        let api = StaticApi(
            routes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        Crawler::new(Arc::new(api), &SyncConfig::default()).unwrap()
    }

    fn course(value: Value) -> Course {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn term_name_precedence() {
        let c = crawler(&[]).with_term_names(HashMap::from([("7".to_string(), "Fall 2024".to_string())]));
        assert_eq!(
            c.term_name(&course(json!({"id": 1, "enrollment_term_id": 7, "term": {"id": 7, "name": "Spring"}}))),
            "Spring"
        );
        assert_eq!(
            c.term_name(&course(json!({"id": 1, "enrollment_term_id": 7}))),
            "Fall 2024"
        );
        assert_eq!(
            c.term_name(&course(json!({"id": 1, "enrollment_term_id": 9}))),
            "Term 9"
        );
        assert_eq!(c.term_name(&course(json!({"id": 1}))), "Unknown Term");
    }

    #[tokio::test]
    async fn missing_profile_name_falls_back() {
        let c = crawler(&[("users/self/profile", json!({"id": 5}))]);
        let student = c.fetch_profile("5").await.unwrap();
        assert_eq!(student.name, "User 5");
    }

    #[tokio::test]
    async fn terms_permission_error_degrades_to_empty() {
        struct Forbidden;

        #[async_trait]
        impl LmsApi for Forbidden {
            async fn get_page(&self, endpoint: &str, _q: &[(String, String)]) -> Result<Page> {
                Err(SyncError::http(403, endpoint, "forbidden"))
            }
        }

        let c = Crawler::new(Arc::new(Forbidden), &SyncConfig::default()).unwrap();
        assert!(c.fetch_term_map().await.is_empty());
    }

    #[tokio::test]
    async fn term_map_reads_wrapped_list() {
        let c = crawler(&[(
            "accounts/1/terms",
            json!({"enrollment_terms": [{"id": 3, "name": "Spring 2025"}, {"id": 4}]}),
        )]);
        let terms = c.fetch_term_map().await;
        assert_eq!(terms.len(), 1);
        assert_eq!(terms["3"], "Spring 2025");
    }
}
