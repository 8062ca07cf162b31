//! Salesforce Data Cloud mirror
//!
//! Ingestion goes to the tenant-scoped endpoint with the tenant token. The
//! supplementary vector search goes to the core Query API with the core
//! access token. Neither path is synchronized with the vector index.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::auth::AuthResult;
use crate::config::WarehouseSettings;
use crate::error::{MemdcError, Result};
use crate::http;
use crate::types::WarehouseHit;

/// Query API path, relative to the core instance URL
pub const QUERY_ENDPOINT: &str = "services/data/v63.0/ssot/queryv2";

/// Ingestion API path, relative to the tenant instance URL
pub const INGEST_ENDPOINT: &str = "api/v1/ingest/sources";

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Parameters of a warehouse vector search
///
/// Schema names left as `None` fall back to the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarehouseSearch {
    pub utterance: String,
    pub user_id: Option<String>,
    pub limit: usize,
    pub vector_index_dlm: Option<String>,
    pub chunk_dlm: Option<String>,
    pub dlo: Option<String>,
}

impl WarehouseSearch {
    pub fn new(utterance: impl Into<String>) -> Self {
        Self {
            utterance: utterance.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// External mirror store
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Post one ingestion payload; returns the upstream JSON response
    async fn ingest(
        &self,
        payload: &Value,
        connector: &str,
        dlo: &str,
        auth: &AuthResult,
    ) -> Result<Value>;

    /// Vector search over the mirrored memories
    async fn search(&self, request: &WarehouseSearch, auth: &AuthResult) -> Result<Vec<WarehouseHit>>;
}

pub struct WarehouseClient {
    client: reqwest::Client,
    settings: WarehouseSettings,
}

impl WarehouseClient {
    pub fn new(settings: WarehouseSettings, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            settings,
        })
    }

    async fn post_json(&self, url: &str, token: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        info!(url = %url, status = response.status().as_u16(), "Data Cloud response");

        let response = http::ensure_success(response).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| {
            json!({
                "status_code": status,
                "text": text,
            })
        }))
    }
}

#[async_trait]
impl Warehouse for WarehouseClient {
    async fn ingest(
        &self,
        payload: &Value,
        connector: &str,
        dlo: &str,
        auth: &AuthResult,
    ) -> Result<Value> {
        let connector = require("connector", Some(connector))?;
        let dlo = require("dlo", Some(dlo))?;
        let tenant = auth.tenant.as_ref().ok_or_else(|| {
            MemdcError::Validation("Tenant credentials are required for ingestion".to_string())
        })?;
        if tenant.instance_url.trim().is_empty() || tenant.token.is_empty() {
            return Err(MemdcError::Validation(
                "Tenant credentials are required for ingestion".to_string(),
            ));
        }

        let url = ingest_url(&tenant.instance_url, connector, dlo);
        info!(url = %url, connector, dlo, "POST Data Cloud ingest");
        self.post_json(&url, &tenant.token, payload).await
    }

    async fn search(&self, request: &WarehouseSearch, auth: &AuthResult) -> Result<Vec<WarehouseHit>> {
        let vector_index_dlm = require(
            "vector_index_dlm",
            request
                .vector_index_dlm
                .as_deref()
                .or(self.settings.vector_index_dlm.as_deref()),
        )?;
        let chunk_dlm = require(
            "chunk_dlm",
            request.chunk_dlm.as_deref().or(self.settings.chunk_dlm.as_deref()),
        )?;
        let dlo = require("dlo", request.dlo.as_deref().or(self.settings.dlo.as_deref()))?;

        let sql = build_search_sql(
            &request.utterance,
            request.user_id.as_deref(),
            request.limit,
            vector_index_dlm,
            chunk_dlm,
            dlo,
        )?;
        let url = query_url(&auth.instance_url);
        debug!(url = %url, sql = %sql, "POST Data Cloud query");

        let body = self.post_json(&url, &auth.access_token, &json!({ "sql": sql })).await?;
        parse_query_rows(&body)
    }
}

fn require<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MemdcError::Validation(format!("{} must be non-empty", name)))
}

/// Prefix `https://` unless the URL already has a scheme
fn with_scheme(instance: &str) -> String {
    let instance = instance.trim().trim_end_matches('/');
    if instance.starts_with("http://") || instance.starts_with("https://") {
        instance.to_string()
    } else {
        format!("https://{}", instance)
    }
}

pub fn ingest_url(tenant_instance: &str, connector: &str, dlo: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        with_scheme(tenant_instance),
        INGEST_ENDPOINT,
        connector.trim(),
        dlo.trim()
    )
}

pub fn query_url(instance: &str) -> String {
    format!("{}/{}", with_scheme(instance), QUERY_ENDPOINT)
}

/// Build the mirror payload for one memory
pub fn ingest_payload(
    id: &str,
    text: &str,
    user_id: &str,
    created_at: &str,
    title: Option<&str>,
) -> Value {
    json!({
        "data": [{
            "id": id,
            "text": text,
            "userId": user_id,
            "created_at": created_at,
            "title": title,
        }]
    })
}

/// Summarize an ingestion response
///
/// A boolean `accepted` wins, then the `status` field, then `"success"`.
pub fn derive_dc_status(response: &Value) -> String {
    if let Some(accepted) = response.get("accepted").and_then(Value::as_bool) {
        return if accepted { "accepted" } else { "rejected" }.to_string();
    }
    match response.get("status") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "success".to_string(),
        Some(other) => other.to_string(),
    }
}

fn check_identifier<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    if value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(value)
    } else {
        Err(MemdcError::Validation(format!(
            "{} may only contain letters, digits and underscores: '{}'",
            name, value
        )))
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// SQL for a Data Cloud vector search joined back to the source records
pub fn build_search_sql(
    utterance: &str,
    user_id: Option<&str>,
    limit: usize,
    vector_index_dlm: &str,
    chunk_dlm: &str,
    dlo: &str,
) -> Result<String> {
    let utterance = require("utterance", Some(utterance))?;
    if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
        return Err(MemdcError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_SEARCH_LIMIT
        )));
    }
    let index = check_identifier("vector_index_dlm", vector_index_dlm)?;
    let chunks = check_identifier("chunk_dlm", chunk_dlm)?;
    let source = check_identifier("dlo", dlo)?;

    let mut sql = format!(
        "SELECT v.RecordId__c AS RecordId__c, v.score__c AS score__c, \
         c.Chunk__c AS Chunk__c, s.text__c AS value__c \
         FROM vector_search(TABLE({index}), {utterance}, '', {limit}) v \
         JOIN {chunks} c ON c.RecordId__c = v.RecordId__c \
         JOIN {source} s ON s.id__c = c.SourceRecordId__c",
        index = index,
        utterance = quote_literal(utterance),
        limit = limit,
        chunks = chunks,
        source = source,
    );
    if let Some(user) = user_id.map(str::trim).filter(|u| !u.is_empty()) {
        sql.push_str(&format!(" WHERE s.userId__c = {}", quote_literal(user)));
    }
    sql.push_str(&format!(" ORDER BY v.score__c DESC LIMIT {}", limit));
    Ok(sql)
}

/// Column names in positional order, from the Query API `metadata`
fn column_names(metadata: Option<&Value>) -> Vec<String> {
    match metadata {
        Some(Value::Object(map)) => {
            let mut cols: Vec<(u64, &String)> = map
                .iter()
                .map(|(name, meta)| {
                    let place = meta
                        .get("placeInOrder")
                        .and_then(Value::as_u64)
                        .unwrap_or(u64::MAX);
                    (place, name)
                })
                .collect();
            cols.sort();
            cols.into_iter().map(|(_, name)| name.clone()).collect()
        }
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                item.as_str()
                    .or_else(|| item.get("name").and_then(Value::as_str))
                    .map(str::to_string)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_score(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn cell<'a>(row: &'a Value, columns: &[String], name: &str) -> Option<&'a Value> {
    match row {
        Value::Object(map) => map.get(name),
        Value::Array(cells) => columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| cells.get(i)),
        _ => None,
    }
}

/// Map Query API rows (objects or positional arrays) to hits
pub fn parse_query_rows(body: &Value) -> Result<Vec<WarehouseHit>> {
    let rows = body.get("data").and_then(Value::as_array).ok_or_else(|| {
        MemdcError::UpstreamProtocol("Query response missing data array".to_string())
    })?;
    let columns = column_names(body.get("metadata"));

    let hits = rows
        .iter()
        .map(|row| WarehouseHit {
            record_id: as_text(cell(row, &columns, "RecordId__c")),
            score: as_score(cell(row, &columns, "score__c")),
            chunk: as_text(cell(row, &columns, "Chunk__c")),
            source_value: as_text(cell(row, &columns, "value__c")),
        })
        .collect();
    Ok(hits)
}
