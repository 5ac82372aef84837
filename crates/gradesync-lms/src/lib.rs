//! Source side of a sync run: the paginated LMS client and the crawler that
//! turns one student id into a [`gradesync_core::StudentProgress`].

pub mod client;
pub mod crawler;
pub mod filters;
pub mod sanitize;
pub mod submission;
pub mod wire;

pub use client::{act_as, paginate, paginate_field, parse_next_link, CanvasClient, LmsApi, Page};
pub use crawler::{CrawlOutcome, CrawlStats, Crawler, StudentFailure};
pub use filters::{AssignmentFilter, CourseFilter};
pub use sanitize::CourseNameSanitizer;
pub use submission::map_submission;
