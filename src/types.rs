//! Core types for memdc

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Identifier for a memory (caller-supplied or generated hex UUID)
pub type MemoryId = String;

/// Default classification label
pub const DEFAULT_MEMORY_TYPE: &str = "generic";

/// Default lifecycle label
pub const DEFAULT_STATUS: &str = "active";

/// Owner used when neither the caller nor the identity provider supplies one
pub const UNKNOWN_USER: &str = "unknown";

/// Smallest accepted result count for a search
pub const MIN_K: usize = 1;

/// Largest accepted result count for a search
pub const MAX_K: usize = 20;

/// Default result count for a search
pub const DEFAULT_K: usize = 5;

/// A memory as held by the vector index (embedding excluded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub text: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub status: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub created_at: String,
    pub title: Option<String>,
}

/// A record plus its embedding, ready to be written to an index
#[derive(Debug, Clone)]
pub struct IndexedMemory {
    pub record: MemoryRecord,
    pub embedding: Vec<f32>,
}

/// Memory as returned to callers
///
/// `score` is only set on search results; id lookups serialize it as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryView {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: Option<String>,
    pub created_at: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub title: Option<String>,
    pub text: String,
    pub score: Option<f32>,
}

impl MemoryView {
    /// View of a record fetched by id
    pub fn from_record(record: MemoryRecord) -> Self {
        Self {
            id: Some(record.id),
            memory_type: Some(record.memory_type),
            created_at: Some(record.created_at),
            user_id: Some(record.user_id),
            status: Some(record.status),
            title: record.title,
            text: record.text,
            score: None,
        }
    }

    /// View of a search hit; the score is rounded to 4 decimals
    pub fn from_hit(record: MemoryRecord, score: f32) -> Self {
        let mut view = Self::from_record(record);
        view.score = Some(round_score(score));
        view
    }
}

/// Round a similarity score to 4 decimal places
pub fn round_score(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

/// Input for creating (or replacing) a memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub text: String,
    #[serde(rename = "type", default = "default_memory_type")]
    pub memory_type: String,
    #[serde(default)]
    pub memory_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

impl CreateMemoryInput {
    /// Input with default type and status
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            memory_type: default_memory_type(),
            status: default_status(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = memory_type.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.memory_id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

fn default_memory_type() -> String {
    DEFAULT_MEMORY_TYPE.to_string()
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

/// Combined outcome of writing to both stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMemoryOutcome {
    /// Status reported by the warehouse ingestion API
    pub dc_status: String,
    /// Id under which the vector index stored the memory
    pub redis_status: String,
}

/// Similarity search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(rename = "type", default)]
    pub memory_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            k: DEFAULT_K,
            memory_type: None,
            status: None,
            user_id: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = Some(memory_type.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

fn default_k() -> usize {
    DEFAULT_K
}

/// A row returned by the warehouse vector search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseHit {
    pub record_id: Option<String>,
    pub score: Option<f64>,
    pub chunk: Option<String>,
    pub source_value: Option<String>,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider to use: "tfidf", "openai", "gemini"
    pub model: String,
    /// API key for remote providers
    pub api_key: Option<String>,
    /// API base URL override
    pub base_url: Option<String>,
    /// Provider model name override (e.g. "text-embedding-3-small")
    pub embedding_model: Option<String>,
    /// Embedding dimensions (must match model output)
    pub dimensions: usize,
}

impl EmbeddingConfig {
    /// Output dimension of each provider's default model
    pub fn default_dimensions(provider: &str) -> usize {
        match provider {
            "openai" => 1536,
            "gemini" => 768,
            _ => 384,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "tfidf".to_string(),
            api_key: None,
            base_url: None,
            embedding_model: None,
            dimensions: 384,
        }
    }
}

/// Current time as an RFC 3339 UTC timestamp
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Generate a fresh memory id
pub fn generate_memory_id() -> MemoryId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Strip an index key prefix (`memories:<id>`) from a caller-supplied id
///
/// Only the segment after the last `:` is kept when the prefix is present;
/// other ids are returned trimmed but otherwise unchanged.
pub fn normalize_memory_id(id: &str, prefix: &str) -> String {
    let id = id.trim();
    let key_prefix = format!("{}:", prefix);
    if id.starts_with(&key_prefix) {
        id.rsplit(':').next().unwrap_or(id).to_string()
    } else {
        id.to_string()
    }
}

/// Whether `value` is absent or only whitespace
pub fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}
