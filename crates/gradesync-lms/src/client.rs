use async_trait::async_trait;
use gradesync_core::{LmsConfig, Result, SyncError};
use reqwest::header::LINK;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// One page of a list endpoint.
#[derive(Debug, Clone)]
pub struct Page {
    pub body: Value,
    /// Absolute URL of the next page, if the server advertised one
    pub next: Option<String>,
}

/// Read access to the source LMS.
///
/// `endpoint` is either a path relative to the API root or an absolute URL
/// taken from a previous page's `next` link.
#[async_trait]
pub trait LmsApi: Send + Sync {
    async fn get_page(&self, endpoint: &str, query: &[(String, String)]) -> Result<Page>;
}

/// Query parameter that makes an admin token read as another user.
pub fn act_as(user_id: &str) -> (String, String) {
    ("as_user_id".to_string(), user_id.to_string())
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            let Some(value) = param.strip_prefix("rel=") else {
                return false;
            };
            value
                .trim_matches('"')
                .split_whitespace()
                .any(|rel| rel.eq_ignore_ascii_case("next"))
        });
        if !is_next {
            return None;
        }
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        (!url.is_empty()).then(|| url.to_string())
    })
}

/// Collect every item of a paginated list endpoint whose pages are JSON arrays.
pub async fn paginate(api: &dyn LmsApi, endpoint: &str, query: &[(String, String)]) -> Result<Vec<Value>> {
    paginate_items(api, endpoint, query, None).await
}

/// Like [`paginate`], for endpoints that wrap each page's items in an object
/// under `key` (e.g. `{"enrollment_terms": [...]}`).
pub async fn paginate_field(
    api: &dyn LmsApi,
    endpoint: &str,
    query: &[(String, String)],
    key: &str,
) -> Result<Vec<Value>> {
    paginate_items(api, endpoint, query, Some(key)).await
}

async fn paginate_items(
    api: &dyn LmsApi,
    endpoint: &str,
    query: &[(String, String)],
    key: Option<&str>,
) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut page = api.get_page(endpoint, query).await?;
    let mut pages = 1usize;

    loop {
        let body = match key {
            Some(key) => page.body.get(key).cloned().unwrap_or(Value::Null),
            None => page.body,
        };
        match body {
            Value::Array(values) => items.extend(values),
            Value::Null => {}
            other => {
                return Err(SyncError::InvalidOperation(format!(
                    "{endpoint}: expected a JSON array page, got {}",
                    type_name(&other)
                )))
            }
        }

        let Some(next) = page.next else {
            break;
        };
        // Continuation URLs already carry the original query.
        if !visited.insert(next.clone()) {
            warn!("{}: pagination revisited {}; stopping", endpoint, next);
            break;
        }
        page = api.get_page(&next, &[]).await?;
        pages += 1;
    }

    debug!("{}: {} items over {} pages", endpoint, items.len(), pages);
    Ok(items)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Canvas REST client authenticated with a single bearer token.
#[derive(Clone)]
pub struct CanvasClient {
    client: Client,
    base: Url,
    token: SecretString,
    request_delay: Duration,
}

impl std::fmt::Debug for CanvasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasClient")
            .field("base", &self.base.as_str())
            .field("request_delay", &self.request_delay)
            .finish()
    }
}

impl CanvasClient {
    pub fn new(config: &LmsConfig) -> Result<Self> {
        let token = config
            .access_token
            .clone()
            .ok_or_else(|| SyncError::Config("lms.access_token is not set".to_string()))?;
        let base = normalize_base(&config.base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            token,
            request_delay: config.request_delay(),
        })
    }

    /// Absolute URLs pass through; relative endpoints hang off the API root.
    pub fn resolve(&self, endpoint: &str) -> Result<Url> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Url::parse(endpoint)
                .map_err(|e| SyncError::InvalidOperation(format!("bad URL {endpoint}: {e}")));
        }
        self.base
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| SyncError::InvalidOperation(format!("bad endpoint {endpoint}: {e}")))
    }
}

/// Parse the API root, making sure relative joins append to its path.
fn normalize_base(base_url: &str) -> Result<Url> {
    let trimmed = base_url.trim().trim_end_matches('/');
    Url::parse(&format!("{}/", trimmed))
        .map_err(|e| SyncError::Config(format!("lms.base_url {base_url:?} is not a URL: {e}")))
}

#[async_trait]
impl LmsApi for CanvasClient {
    async fn get_page(&self, endpoint: &str, query: &[(String, String)]) -> Result<Page> {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let url = self.resolve(endpoint)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| SyncError::transport(url.as_str(), e))?;

        let status = response.status();
        let final_url = response.url().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::http(status.as_u16(), final_url.as_str(), &body));
        }

        // Relative links resolve against the page that advertised them.
        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_link)
            .and_then(|link| final_url.join(&link).ok())
            .map(String::from);

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SyncError::transport(final_url.as_str(), e))?;

        Ok(Page { body, next })
    }
}
