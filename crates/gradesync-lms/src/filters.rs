use gradesync_core::{CrawlConfig, Result, SyncError};
use regex::Regex;
use std::collections::HashSet;

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Drops courses by exact name (case-insensitive) or by pattern.
#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

impl CourseFilter {
    pub fn new(names: &[String], patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    SyncError::Config(format!("crawl.excluded_course_patterns: {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            names: names.iter().map(|n| normalize(n)).collect(),
            patterns,
        })
    }

    pub fn from_config(config: &CrawlConfig) -> Result<Self> {
        Self::new(&config.excluded_course_names, &config.excluded_course_patterns)
    }

    /// Why `course_name` is excluded, or `None` to keep it.
    pub fn exclusion_reason(&self, course_name: &str) -> Option<String> {
        if self.names.contains(&normalize(course_name)) {
            return Some("name is on the exclusion list".to_string());
        }
        self.patterns
            .iter()
            .find(|re| re.is_match(course_name))
            .map(|re| format!("name matches /{}/", re.as_str()))
    }

    pub fn is_excluded(&self, course_name: &str) -> bool {
        self.exclusion_reason(course_name).is_some()
    }
}

/// Drops non-academic assignments by title.
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    titles: HashSet<String>,
}

impl AssignmentFilter {
    pub fn new(titles: &[String]) -> Self {
        Self {
            titles: titles.iter().map(|t| normalize(t)).collect(),
        }
    }

    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(&config.skip_assignment_titles)
    }

    pub fn is_skipped(&self, title: &str) -> bool {
        self.titles.contains(&normalize(title))
    }
}
