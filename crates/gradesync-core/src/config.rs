use std::{
    collections::HashMap,
    env, fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config as cfg;
use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Source LMS connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmsConfig {
    /// API root, e.g. "https://school.instructure.com/api/v1"
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub access_token: Option<SecretString>,
    /// Account used for the term-name lookup; empty disables it
    #[serde(default = "LmsConfig::default_account_id")]
    pub account_id: String,
    /// Pause before every source request
    #[serde(default)]
    pub request_delay_ms: u64,
    #[serde(default = "LmsConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "LmsConfig::default_page_size")]
    pub page_size: u32,
    #[serde(default = "LmsConfig::default_enrollment_states")]
    pub enrollment_states: Vec<String>,
}

impl LmsConfig {
    fn default_account_id() -> String {
        "1".to_string()
    }

    fn default_timeout_secs() -> u64 {
        60
    }

    fn default_page_size() -> u32 {
        100
    }

    fn default_enrollment_states() -> Vec<String> {
        ["active", "invited_or_pending", "completed", "inactive"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: None,
            account_id: Self::default_account_id(),
            request_delay_ms: 0,
            timeout_secs: Self::default_timeout_secs(),
            page_size: Self::default_page_size(),
            enrollment_states: Self::default_enrollment_states(),
        }
    }
}

/// A target table, addressed by id when known and by name otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

impl TableRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    /// Identifier used in API paths and schema lookups.
    pub fn selector(&self) -> &str {
        match &self.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => &self.name,
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) if !id.trim().is_empty() => write!(f, "(table_id={})", id),
            _ => write!(f, "(table_name='{}')", self.name),
        }
    }
}

/// Target store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_api_base")]
    pub api_base: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub base_id: String,
    #[serde(default = "StoreConfig::default_detail_table")]
    pub detail_table: TableRef,
    #[serde(default = "StoreConfig::default_summary_table")]
    pub summary_table: TableRef,
    #[serde(default = "StoreConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl StoreConfig {
    fn default_api_base() -> String {
        "https://api.airtable.com/v0".to_string()
    }

    fn default_detail_table() -> TableRef {
        TableRef::named("Phoenix Student Assignment Details")
    }

    fn default_summary_table() -> TableRef {
        TableRef::named("Phoenix Christian Course Details")
    }

    fn default_timeout_secs() -> u64 {
        60
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            api_key: None,
            base_id: String::new(),
            detail_table: Self::default_detail_table(),
            summary_table: Self::default_summary_table(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

/// Which courses, assignments and names the crawler keeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Assignment titles dropped on case-insensitive exact match
    #[serde(default = "CrawlConfig::default_skip_titles")]
    pub skip_assignment_titles: Vec<String>,
    /// Course names dropped on case-insensitive exact match
    #[serde(default)]
    pub excluded_course_names: Vec<String>,
    /// Regexes; a course whose sanitized name matches any of them is dropped
    #[serde(default = "CrawlConfig::default_excluded_patterns")]
    pub excluded_course_patterns: Vec<String>,
    /// Course names containing any of these are treated as free text
    #[serde(default = "CrawlConfig::default_suspicious_keywords")]
    pub suspicious_keywords: Vec<String>,
    #[serde(default = "CrawlConfig::default_max_course_name_len")]
    pub max_course_name_len: usize,
}

impl CrawlConfig {
    fn default_skip_titles() -> Vec<String> {
        vec![
            "end of unit feedback".to_string(),
            "quarterly feedback".to_string(),
        ]
    }

    fn default_excluded_patterns() -> Vec<String> {
        vec![r"(?i)\blive\b".to_string()]
    }

    fn default_suspicious_keywords() -> Vec<String> {
        [
            "http://",
            "https://",
            "www.",
            "lol",
            "haha",
            "thank you",
            "thanks",
            "please",
            "i think",
            "can you",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn default_max_course_name_len() -> usize {
        100
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            skip_assignment_titles: Self::default_skip_titles(),
            excluded_course_names: Vec::new(),
            excluded_course_patterns: Self::default_excluded_patterns(),
            suspicious_keywords: Self::default_suspicious_keywords(),
            max_course_name_len: Self::default_max_course_name_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaConfig {
    /// Coerce unknown single-select values instead of aborting
    #[serde(default)]
    pub allow_select_fallback: bool,
    #[serde(default)]
    pub log_schema: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WipeScope {
    /// Delete every record in the table
    #[default]
    All,
    /// Delete only records belonging to students in this run
    Students,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeConfig {
    #[serde(default)]
    pub scope: WipeScope,
    #[serde(default = "WipeConfig::default_max_passes")]
    pub max_passes: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delete batches in flight at once
    #[serde(default = "WipeConfig::default_concurrency")]
    pub concurrency: usize,
    /// Delete batches dispatched per second
    #[serde(default = "WipeConfig::default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "WipeConfig::default_page_size")]
    pub page_size: u32,
}

impl WipeConfig {
    fn default_max_passes() -> usize {
        5
    }

    fn default_concurrency() -> usize {
        4
    }

    fn default_requests_per_second() -> u32 {
        5
    }

    fn default_page_size() -> u32 {
        100
    }
}

impl Default for WipeConfig {
    fn default() -> Self {
        Self {
            scope: WipeScope::default(),
            max_passes: Self::default_max_passes(),
            batch_size: default_batch_size(),
            concurrency: Self::default_concurrency(),
            requests_per_second: Self::default_requests_per_second(),
            page_size: Self::default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between create batches
    #[serde(default)]
    pub pacing_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pacing_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Sleep before each attempt; one attempt per entry
    #[serde(default = "RetryConfig::default_delays_ms")]
    pub delays_ms: Vec<u64>,
}

impl RetryConfig {
    fn default_delays_ms() -> Vec<u64> {
        vec![0, 1000, 2000, 4000]
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays_ms: Self::default_delays_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// Upper bound the target store accepts for batch create/delete.
pub const MAX_STORE_BATCH: usize = 10;

fn default_batch_size() -> usize {
    MAX_STORE_BATCH
}

/// Everything a run needs, built once at start-up and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub lms: LmsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub wipe: WipeConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

const ENV_PREFIX: &str = "GRADESYNC";
const DEFAULT_CONFIG_FILE: &str = "gradesync.toml";

impl SyncConfig {
    /// Load from an optional file plus the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        let vars: HashMap<String, String> = env::vars().collect();
        Self::load_with_env(file, &vars)
    }

    /// Load with an explicit environment map.
    ///
    /// Layering: defaults, config file, `GRADESYNC__*` variables, then the
    /// legacy `CANVAS_*` / `AIRTABLE_*` variable names.
    pub fn load_with_env(file: Option<&Path>, vars: &HashMap<String, String>) -> Result<Self> {
        let mut builder = cfg::Config::builder();

        match file {
            Some(path) => {
                builder = builder.add_source(cfg::File::from(path.to_path_buf()).required(true));
            }
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                builder = builder.add_source(cfg::File::from(local).required(false));
            }
        }

        let prefixed: HashMap<String, String> = vars
            .iter()
            .filter(|(k, _)| k.starts_with(&format!("{}__", ENV_PREFIX)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        builder = builder.add_source(
            cfg::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(Some(prefixed)),
        );

        builder = Self::apply_legacy_env(builder, vars)?;

        let settings: SyncConfig = builder
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }

    fn apply_legacy_env(
        builder: cfg::ConfigBuilder<cfg::builder::DefaultState>,
        vars: &HashMap<String, String>,
    ) -> Result<cfg::ConfigBuilder<cfg::builder::DefaultState>> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let flag = |key: &str| get(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let delay_ms = match get("SLEEP_BETWEEN_REQUESTS") {
            Some(secs) => {
                let secs: f64 = secs
                    .parse()
                    .with_context(|| format!("SLEEP_BETWEEN_REQUESTS is not a number: {secs}"))?;
                Some((secs.max(0.0) * 1000.0).round() as i64)
            }
            None => None,
        };

        let builder = builder
            .set_override_option(
                "lms.base_url",
                get("CANVAS_API_URL").map(|u| u.trim_end_matches('/').to_string()),
            )?
            .set_override_option("lms.access_token", get("CANVAS_ACCESS_TOKEN"))?
            .set_override_option("lms.account_id", get("CANVAS_ACCOUNT_ID"))?
            .set_override_option("lms.request_delay_ms", delay_ms)?
            .set_override_option("store.api_key", get("AIRTABLE_API_KEY"))?
            .set_override_option("store.base_id", get("AIRTABLE_BASE_ID"))?
            .set_override_option("store.detail_table.id", get("AIRTABLE_DETAILED_TABLE_ID"))?
            .set_override_option("store.detail_table.name", get("AIRTABLE_DETAILED_TABLE"))?
            .set_override_option("store.summary_table.id", get("AIRTABLE_SUMMARY_TABLE_ID"))?
            .set_override_option("store.summary_table.name", get("AIRTABLE_SUMMARY_TABLE"))?
            .set_override_option(
                "schema.allow_select_fallback",
                flag("ALLOW_SELECT_FALLBACK"),
            )?
            .set_override_option("schema.log_schema", flag("LOG_SCHEMA"))?;
        Ok(builder)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.lms.base_url.trim().is_empty(),
            "lms.base_url cannot be empty"
        );
        anyhow::ensure!(
            self.lms.access_token.is_some(),
            "lms.access_token must be set"
        );
        anyhow::ensure!(
            !self.lms.enrollment_states.is_empty(),
            "lms.enrollment_states cannot be empty"
        );
        anyhow::ensure!(self.lms.page_size > 0, "lms.page_size must be > 0");
        anyhow::ensure!(self.store.api_key.is_some(), "store.api_key must be set");
        anyhow::ensure!(
            !self.store.base_id.trim().is_empty(),
            "store.base_id cannot be empty"
        );
        for (label, table) in [
            ("store.detail_table", &self.store.detail_table),
            ("store.summary_table", &self.store.summary_table),
        ] {
            anyhow::ensure!(
                !table.selector().trim().is_empty(),
                "{label} needs an id or a name"
            );
        }
        anyhow::ensure!(
            (1..=MAX_STORE_BATCH).contains(&self.wipe.batch_size),
            "wipe.batch_size must be 1..={MAX_STORE_BATCH}"
        );
        anyhow::ensure!(
            (1..=MAX_STORE_BATCH).contains(&self.writer.batch_size),
            "writer.batch_size must be 1..={MAX_STORE_BATCH}"
        );
        anyhow::ensure!(self.wipe.concurrency > 0, "wipe.concurrency must be > 0");
        anyhow::ensure!(
            self.wipe.requests_per_second > 0,
            "wipe.requests_per_second must be > 0"
        );
        anyhow::ensure!(self.wipe.max_passes > 0, "wipe.max_passes must be > 0");
        anyhow::ensure!(self.wipe.page_size > 0, "wipe.page_size must be > 0");
        anyhow::ensure!(
            !self.retry.delays_ms.is_empty(),
            "retry.delays_ms needs at least one attempt"
        );
        anyhow::ensure!(
            self.crawl.max_course_name_len >= 8,
            "crawl.max_course_name_len must be >= 8"
        );
        for pattern in &self.crawl.excluded_course_patterns {
            Regex::new(pattern)
                .with_context(|| format!("crawl.excluded_course_patterns: bad regex {pattern:?}"))?;
        }
        Ok(())
    }
}
