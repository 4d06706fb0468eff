//! HTTP adapter for the Keel backend's row API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{RemoteClient, RemoteError, RemoteResult};
use crate::filter::{Condition, Filter};
use crate::record::Record;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the HTTP remote client
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Backend base URL (e.g. `https://api.keel.app`)
    pub base_url: String,
    /// Bearer token for row-level access
    pub api_key: String,
    /// Per-request timeout; bounds every engine suspension at the
    /// network boundary
    pub request_timeout: Duration,
}

impl RemoteConfig {
    /// Create a configuration with the default request timeout.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Row-level CRUD client for the Keel backend.
#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemoteClient {
    /// Build a client for the given backend.
    pub fn new(config: RemoteConfig) -> RemoteResult<Self> {
        let base_url = normalize_base_url(&config.base_url)?;
        if config.api_key.trim().is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "api key must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            base_url,
            api_key: config.api_key.trim().to_string(),
            client,
        })
    }

    /// Returns the normalized base URL used by this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn records_url(&self, table: &str) -> String {
        format!(
            "{}/v1/tables/{}/records",
            self.base_url,
            urlencoding::encode(table)
        )
    }

    fn record_url(&self, table: &str, id: &str) -> String {
        format!("{}/{}", self.records_url(table), urlencoding::encode(id))
    }

    async fn ensure_success(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api(parse_api_error(status, &body)))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn select(
        &self,
        table: &str,
        user_id: &str,
        filter: Option<&Filter>,
    ) -> RemoteResult<Vec<Record>> {
        let mut query = vec![("user_id".to_string(), user_id.to_string())];
        if let Some(filter) = filter {
            query.extend(filter_query_pairs(filter));
        }

        let response = self
            .client
            .get(self.records_url(table))
            .query(&query)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let rows = response.json::<Vec<Record>>().await?;
        Ok(rows)
    }

    async fn insert(
        &self,
        table: &str,
        user_id: &str,
        fields: &Map<String, Value>,
    ) -> RemoteResult<Record> {
        let mut body = fields.clone();
        body.insert("user_id".to_string(), Value::String(user_id.to_string()));

        let response = self
            .client
            .post(self.records_url(table))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let row = response.json::<Record>().await?;
        if row.id.trim().is_empty() {
            return Err(RemoteError::InvalidPayload(
                "inserted row is missing an id".to_string(),
            ));
        }
        Ok(row)
    }

    async fn update(&self, table: &str, id: &str, fields: &Map<String, Value>) -> RemoteResult<()> {
        let response = self
            .client
            .patch(self.record_url(table, id))
            .bearer_auth(&self.api_key)
            .json(fields)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.record_url(table, id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn upsert(&self, table: &str, record: &Record) -> RemoteResult<()> {
        let response = self
            .client
            .put(self.record_url(table, &record.id))
            .bearer_auth(&self.api_key)
            .json(&record.remote_row())
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Encode a filter as `field=op.value` query pairs.
fn filter_query_pairs(filter: &Filter) -> Vec<(String, String)> {
    filter
        .conditions()
        .iter()
        .map(|condition| match condition {
            Condition::Eq { field, value } => (field.clone(), format!("eq.{}", render(value))),
            Condition::Gte { field, value } => (field.clone(), format!("gte.{}", render(value))),
            Condition::Lte { field, value } => (field.clone(), format!("lte.{}", render(value))),
        })
        .collect()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: &str) -> RemoteResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "base URL must not be empty".to_string(),
        ));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> HttpRemoteClient {
        HttpRemoteClient::new(RemoteConfig::new("https://api.example.com/", "key")).unwrap()
    }

    #[test]
    fn new_rejects_invalid_configuration() {
        assert!(HttpRemoteClient::new(RemoteConfig::new("", "key")).is_err());
        assert!(HttpRemoteClient::new(RemoteConfig::new("api.example.com", "key")).is_err());
        assert!(HttpRemoteClient::new(RemoteConfig::new("https://api.example.com", "  ")).is_err());
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(client().base_url(), "https://api.example.com");
    }

    #[test]
    fn record_urls_encode_path_segments() {
        let client = client();
        assert_eq!(
            client.records_url("prayer_logs"),
            "https://api.example.com/v1/tables/prayer_logs/records"
        );
        assert_eq!(
            client.record_url("tasks", "a b"),
            "https://api.example.com/v1/tables/tasks/records/a%20b"
        );
    }

    #[test]
    fn filter_encodes_as_op_value_pairs() {
        let filter = Filter::new()
            .eq("category", "groceries")
            .gte("amount", 10)
            .lte("logged_at", "2026-08-07");
        let pairs = filter_query_pairs(&filter);
        assert_eq!(
            pairs,
            vec![
                ("category".to_string(), "eq.groceries".to_string()),
                ("amount".to_string(), "gte.10".to_string()),
                ("logged_at".to_string(), "lte.2026-08-07".to_string()),
            ]
        );
    }

    #[test]
    fn api_errors_prefer_structured_messages() {
        let status = StatusCode::UNPROCESSABLE_ENTITY;
        assert_eq!(
            parse_api_error(status, r#"{"message": "row rejected"}"#),
            "row rejected (422)"
        );
        assert_eq!(
            parse_api_error(status, r#"{"error": "bad row"}"#),
            "bad row (422)"
        );
        assert_eq!(parse_api_error(status, ""), "HTTP 422");
        assert_eq!(parse_api_error(status, "nope"), "nope (422)");
    }

    #[test]
    fn debug_redacts_api_key() {
        let client =
            HttpRemoteClient::new(RemoteConfig::new("https://api.example.com", "secret")).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn render_keeps_strings_raw() {
        assert_eq!(render(&json!("x y")), "x y");
        assert_eq!(render(&json!(3.5)), "3.5");
        assert_eq!(render(&json!(true)), "true");
    }
}
