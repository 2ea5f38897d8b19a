//! REST adapter for the remote canonical service

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

use super::{RemoteError, RemoteResult, RemoteService};

/// Remote service over a plain JSON REST API:
/// `POST /{table}`, `PUT|DELETE|GET /{table}/{id}`.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Create a client for the given endpoint base URL
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let base_url = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().build()?,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.base_url)
    }

    fn record_url(&self, table: &str, id: &str) -> String {
        format!("{}/{table}/{id}", self.base_url)
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn insert(&self, table: &str, record: &Value) -> RemoteResult<Value> {
        let response = self
            .client
            .post(self.table_url(table))
            .json(record)
            .send()
            .await
            .map_err(transport_error)?;
        read_record(response).await
    }

    async fn update(&self, table: &str, id: &str, record: &Value) -> RemoteResult<Value> {
        let response = self
            .client
            .put(self.record_url(table, id))
            .json(record)
            .send()
            .await
            .map_err(transport_error)?;
        read_record(response).await
    }

    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.record_url(table, id))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &parse_api_error(status, &body)))
    }

    async fn fetch(&self, table: &str, id: &str) -> RemoteResult<Option<Value>> {
        let response = self
            .client
            .get(self.record_url(table, id))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = read_record(response).await?;
        Ok(Some(record))
    }
}

/// Network-level failures are always retryable
fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Transient(err.to_string())
}

async fn read_record(response: reqwest::Response) -> RemoteResult<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &parse_api_error(status, &body)));
    }

    response
        .json::<Value>()
        .await
        .map_err(|err| RemoteError::Rejected(format!("invalid server record payload: {err}")))
}

/// Server-side unavailability and throttling retry; other client errors
/// mean the payload can never succeed
fn classify_status(status: StatusCode, message: &str) -> RemoteError {
    if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY | StatusCode::TOO_MANY_REQUESTS
        )
    {
        RemoteError::Transient(message.to_string())
    } else {
        RemoteError::Rejected(message.to_string())
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

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput("endpoint must not be empty".into()));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, "x").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "x").is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "x").is_transient());
        assert!(classify_status(StatusCode::TOO_EARLY, "x").is_transient());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, "x").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "x").is_transient());
    }

    #[test]
    fn test_parse_api_error_prefers_message_field() {
        let parsed = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"message": "missing field 'id'"}"#,
        );
        assert_eq!(parsed, "missing field 'id' (400)");

        let fallback = parse_api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(fallback, "HTTP 502");
    }

    #[test]
    fn test_record_url_layout() {
        let remote = HttpRemote::new("https://sync.example.com/v1").unwrap();
        assert_eq!(remote.table_url("tasks"), "https://sync.example.com/v1/tasks");
        assert_eq!(
            remote.record_url("tasks", "t1"),
            "https://sync.example.com/v1/tasks/t1"
        );
    }
}
