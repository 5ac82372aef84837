use crate::schema::TableSchema;
use async_trait::async_trait;
use gradesync_core::{Fields, Result, StoreConfig, SyncError};
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Largest page the list endpoint returns.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Stop after this many records
    pub max_records: Option<usize>,
    /// Store-side filter formula
    pub filter_formula: Option<String>,
    pub page_size: Option<u32>,
}

impl ListOptions {
    pub fn first(max_records: usize) -> Self {
        Self {
            max_records: Some(max_records),
            ..Default::default()
        }
    }

    pub fn paged(page_size: u32) -> Self {
        Self {
            page_size: Some(page_size),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, formula: Option<String>) -> Self {
        self.filter_formula = formula;
        self
    }
}

/// Operations the engine needs from the tabular store. `table` is either a
/// table id or a table name.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_record_ids(&self, table: &str, options: &ListOptions) -> Result<Vec<String>>;

    /// Create up to ten records; returns their new ids.
    async fn batch_create(&self, table: &str, rows: &[Fields]) -> Result<Vec<String>>;

    /// Delete up to ten records; returns the ids the store confirmed.
    async fn batch_delete(&self, table: &str, ids: &[String]) -> Result<Vec<String>>;

    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    async fn fetch_schema(&self) -> Result<Vec<TableSchema>>;
}

#[derive(Debug, Deserialize)]
struct RecordRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    #[serde(default)]
    records: Vec<RecordRef>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    records: Vec<RecordRef>,
}

#[derive(Debug, Deserialize)]
struct TablesResponse {
    #[serde(default)]
    tables: Vec<TableSchema>,
}

/// Airtable REST client for one base.
#[derive(Clone)]
pub struct AirtableClient {
    client: Client,
    api_base: Url,
    base_id: String,
    api_key: SecretString,
}

impl std::fmt::Debug for AirtableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtableClient")
            .field("api_base", &self.api_base.as_str())
            .field("base_id", &self.base_id)
            .finish()
    }
}

impl AirtableClient {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SyncError::Config("store.api_key is not set".to_string()))?;
        let api_base = Url::parse(config.api_base.trim().trim_end_matches('/')).map_err(|e| {
            SyncError::Config(format!("store.api_base {:?} is not a URL: {e}", config.api_base))
        })?;
        if api_base.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "store.api_base {:?} cannot carry a path",
                config.api_base
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base,
            base_id: config.base_id.clone(),
            api_key,
        })
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    /// `api_base` with extra path segments, each percent-encoded.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn table_url(&self, table: &str) -> Url {
        self.url([self.base_id.as_str(), table])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.api_key.expose_secret())
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, url: &Url) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::transport(url.as_str(), e))?;
        let response = check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::transport(url.as_str(), e))
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::http(status.as_u16(), url, &body))
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn list_record_ids(&self, table: &str, options: &ListOptions) -> Result<Vec<String>> {
        let url = self.table_url(table);
        let page_size = options
            .page_size
            .unwrap_or(MAX_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let mut ids = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut query: Vec<(&str, String)> = vec![("pageSize", page_size.to_string())];
            if let Some(max) = options.max_records {
                query.push(("maxRecords", max.to_string()));
            }
            if let Some(formula) = &options.filter_formula {
                query.push(("filterByFormula", formula.clone()));
            }
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }

            let request = self.request(Method::GET, url.clone()).query(&query);
            let page: RecordPage = self.send(request, &url).await?;
            ids.extend(page.records.into_iter().map(|r| r.id));

            if options.max_records.is_some_and(|max| ids.len() >= max) {
                break;
            }
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        if let Some(max) = options.max_records {
            ids.truncate(max);
        }
        debug!("{}: listed {} record ids", table, ids.len());
        Ok(ids)
    }

    async fn batch_create(&self, table: &str, rows: &[Fields]) -> Result<Vec<String>> {
        let url = self.table_url(table);
        let records: Vec<_> = rows.iter().map(|fields| json!({ "fields": fields })).collect();
        let request = self
            .request(Method::POST, url.clone())
            .json(&json!({ "records": records }));
        let created: RecordList = self.send(request, &url).await?;
        Ok(created.records.into_iter().map(|r| r.id).collect())
    }

    async fn batch_delete(&self, table: &str, ids: &[String]) -> Result<Vec<String>> {
        let url = self.table_url(table);
        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("records[]", id.as_str())).collect();
        let request = self.request(Method::DELETE, url.clone()).query(&query);
        let deleted: RecordList = self.send(request, &url).await?;
        Ok(deleted.records.into_iter().map(|r| r.id).collect())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let url = self.url([self.base_id.as_str(), table, id]);
        let request = self.request(Method::DELETE, url.clone());
        let _: RecordRef = self.send(request, &url).await?;
        Ok(())
    }

    async fn fetch_schema(&self) -> Result<Vec<TableSchema>> {
        let url = self.url(["meta", "bases", self.base_id.as_str(), "tables"]);
        let request = self.request(Method::GET, url.clone());
        let response: TablesResponse = self.send(request, &url).await?;
        Ok(response.tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AirtableClient {
        let config = StoreConfig {
            api_key: Some(SecretString::from("key".to_string())),
            base_id: "appBase".into(),
            ..Default::default()
        };
        AirtableClient::new(&config).unwrap()
    }

    #[test]
    fn table_names_are_path_encoded() {
        let c = client();
        assert_eq!(
            c.table_url("Phoenix Student Assignment Details").as_str(),
            "https://api.airtable.com/v0/appBase/Phoenix%20Student%20Assignment%20Details"
        );
        assert_eq!(
            c.table_url("tblXYZ").as_str(),
            "https://api.airtable.com/v0/appBase/tblXYZ"
        );
    }

    #[test]
    fn schema_endpoint_lives_under_meta() {
        let c = client();
        assert_eq!(
            c.url(["meta", "bases", "appBase", "tables"]).as_str(),
            "https://api.airtable.com/v0/meta/bases/appBase/tables"
        );
    }

    #[test]
    fn key_is_required() {
        assert!(AirtableClient::new(&StoreConfig::default()).is_err());
    }

    #[test]
    fn list_options_builders() {
        let opts = ListOptions::paged(50).with_filter(Some("TRUE()".into()));
        assert_eq!(opts.page_size, Some(50));
        assert_eq!(opts.filter_formula.as_deref(), Some("TRUE()"));
        assert_eq!(ListOptions::first(1).max_records, Some(1));
    }
}
