//! Course-name cleanup.
//!
//! Some course lists return student-chosen nicknames or pasted text instead
//! of the canonical title. The rules here are deliberately narrow:
//!
//! 1. decode HTML entities and strip markup, repeated until nothing changes,
//! 2. drop control characters and collapse whitespace,
//! 3. reject names that look like conversation: a configured keyword,
//!    a trailing question mark, or too many words,
//! 4. cut names longer than the configured ceiling (ending in `…`) and
//!    check the cut name again.
//!
//! A rejected or empty name falls back to the course code, then to
//! "Unknown Course". Running the sanitizer on its own output is a no-op.

use gradesync_core::{CrawlConfig, UNKNOWN_COURSE};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>").expect("valid tag regex"));
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("valid entity regex")
});

/// Names with more words than this read as sentences, not titles.
pub const MAX_COURSE_NAME_WORDS: usize = 15;

#[derive(Debug, Clone)]
pub struct CourseNameSanitizer {
    keywords: Option<Regex>,
    max_len: usize,
}

impl CourseNameSanitizer {
    pub fn new(keywords: &[String], max_len: usize) -> Self {
        Self {
            keywords: keyword_regex(keywords),
            max_len: max_len.max(2),
        }
    }

    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(&config.suspicious_keywords, config.max_course_name_len)
    }

    /// Cleaned name, or `None` when nothing usable remains.
    pub fn clean(&self, raw: &str) -> Option<String> {
        let text = strip_markup(raw);
        let full = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if full.is_empty() || self.is_suspicious(&full) {
            return None;
        }
        // The cut can expose a keyword boundary the full name did not have.
        let text = self.truncate(full);
        if self.is_suspicious(&text) {
            return None;
        }
        Some(text)
    }

    /// Best available display name for a course.
    pub fn sanitize(&self, raw: Option<&str>, fallback: Option<&str>) -> String {
        raw.and_then(|r| self.clean(r))
            .or_else(|| fallback.and_then(|f| self.clean(f)))
            .unwrap_or_else(|| UNKNOWN_COURSE.to_string())
    }

    pub fn is_suspicious(&self, name: &str) -> bool {
        if name.ends_with('?') {
            return true;
        }
        if name.split_whitespace().count() > MAX_COURSE_NAME_WORDS {
            return true;
        }
        self.keywords
            .as_ref()
            .map(|re| re.is_match(name))
            .unwrap_or(false)
    }

    fn truncate(&self, text: String) -> String {
        if text.chars().count() <= self.max_len {
            return text;
        }
        let mut cut: String = text.chars().take(self.max_len - 1).collect();
        cut.truncate(cut.trim_end().len());
        cut.push('…');
        cut
    }
}

/// Case-insensitive alternation; word boundaries only where the keyword
/// itself starts or ends with a word character.
fn keyword_regex(keywords: &[String]) -> Option<Regex> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            let starts_word = k.chars().next().is_some_and(|c| c.is_alphanumeric());
            let ends_word = k.chars().last().is_some_and(|c| c.is_alphanumeric());
            format!(
                "{}{}{}",
                if starts_word { r"\b" } else { "" },
                regex::escape(k),
                if ends_word { r"\b" } else { "" }
            )
        })
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    Regex::new(&format!("(?i)(?:{})", alternatives.join("|"))).ok()
}

/// Decode entities, remove tags and blank out control characters until a
/// fixpoint.
fn strip_markup(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let decoded = decode_entities(&current);
        let stripped: String = TAG_RE
            .replace_all(&decoded, " ")
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let body = &caps[1];
            decode_entity(body).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(body: &str) -> Option<String> {
    if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match body {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "ndash" => "–",
        "mdash" => "—",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "hellip" => "…",
        _ => return None,
    };
    Some(decoded.to_string())
}
