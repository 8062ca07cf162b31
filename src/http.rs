//! Shared reqwest plumbing for upstream services

use std::time::Duration;

use serde_json::Value;

use crate::error::{MemdcError, Result};

/// Default timeout for every upstream call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| MemdcError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-2xx response into `UpstreamHttp` carrying the body text
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MemdcError::UpstreamHttp {
        status: status.as_u16(),
        body,
    })
}

/// Read a JSON body; undecodable bodies are protocol errors
pub(crate) async fn read_json(response: reqwest::Response, what: &str) -> Result<Value> {
    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| MemdcError::UpstreamProtocol(format!("{} returned invalid JSON: {}", what, e)))
}

/// Read a string field from a JSON object, treating empty strings as absent
pub(crate) fn str_field<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
