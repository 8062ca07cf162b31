//! RediSearch-backed vector index
//!
//! Each memory is a HASH at `<index>:<id>` with fields `id`, `text`, `type`,
//! `status`, `userId`, `created_at`, optional `title`, and `embedding` as
//! little-endian FLOAT32 bytes. The index is created on connect when
//! `FT.INFO` reports it missing.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Value;
use tracing::{debug, info};

use super::{ScoredMemory, TagFilter, VectorIndex, TAG_SEPARATOR};
use crate::config::redact_url;
use crate::embedding::distance_to_score;
use crate::error::{MemdcError, Result};
use crate::types::{IndexedMemory, MemoryRecord, DEFAULT_MEMORY_TYPE, DEFAULT_STATUS, UNKNOWN_USER};

/// Alias of the KNN distance in search replies
const DISTANCE_FIELD: &str = "vector_distance";

/// Hash fields returned to callers, in HMGET order
const RECORD_FIELDS: [&str; 7] = ["id", "text", "type", "status", "userId", "created_at", "title"];

pub struct RedisIndex {
    conn: ConnectionManager,
    name: String,
    dimensions: usize,
}

impl RedisIndex {
    /// Connect, verify with PING and create the index if missing
    pub async fn connect(url: &str, name: &str, dimensions: usize) -> Result<Self> {
        info!("Connecting to Redis at {}", redact_url(url));

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let index = Self {
            conn,
            name: name.to_string(),
            dimensions,
        };

        index.ping().await?;
        index.ensure_index().await?;
        info!(index = %index.name, dimensions, "Redis vector index ready");
        Ok(index)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.name, id)
    }

    async fn ensure_index(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let info: redis::RedisResult<Value> = redis::cmd("FT.INFO")
            .arg(&self.name)
            .query_async(&mut conn)
            .await;

        match info {
            Ok(_) => {
                debug!(index = %self.name, "Index already exists");
                return Ok(());
            }
            Err(e) if is_missing_index(&e) => {}
            Err(e) => return Err(e.into()),
        }

        let mut cmd = redis::cmd("FT.CREATE");
        for arg in create_index_args(&self.name, self.dimensions) {
            cmd.arg(arg);
        }
        let _: Value = cmd.query_async(&mut conn).await?;
        info!(index = %self.name, "Created RediSearch index");
        Ok(())
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(MemdcError::Index(format!(
                "Vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for RedisIndex {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn upsert(&self, memory: IndexedMemory) -> Result<bool> {
        self.check_dimensions(&memory.embedding)?;
        let key = self.key(&memory.record.id);

        let mut hset = redis::cmd("HSET");
        hset.arg(&key);
        for (field, value) in record_fields(&memory.record) {
            hset.arg(field).arg(value);
        }
        hset.arg("embedding").arg(vector_to_bytes(&memory.embedding));

        // MULTI EXISTS DEL HSET EXEC: readers see either the old or the new hash
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("EXISTS")
            .arg(&key)
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .add_command(hset)
            .ignore();

        let mut conn = self.conn.clone();
        let (existed,): (bool,) = pipe.query_async(&mut conn).await?;
        debug!(key = %key, replaced = existed, "Upserted memory hash");
        Ok(existed)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.key(id))
            .arg(&RECORD_FIELDS[..])
            .query_async(&mut conn)
            .await?;

        if values.iter().all(Option::is_none) {
            return Ok(None);
        }

        let fields: HashMap<String, String> = RECORD_FIELDS
            .iter()
            .zip(values)
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
            .collect();
        Ok(Some(record_from_fields(id, &fields)))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&TagFilter>,
    ) -> Result<Vec<ScoredMemory>> {
        self.check_dimensions(vector)?;
        let query = knn_query(filter, k);
        debug!(index = %self.name, query = %query, k, "FT.SEARCH");

        let mut cmd = redis::cmd("FT.SEARCH");
        cmd.arg(&self.name)
            .arg(&query)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(vector_to_bytes(vector))
            .arg("SORTBY")
            .arg(DISTANCE_FIELD)
            .arg("ASC")
            .arg("RETURN")
            .arg(RECORD_FIELDS.len() + 1)
            .arg(&RECORD_FIELDS[..])
            .arg(DISTANCE_FIELD)
            .arg("LIMIT")
            .arg(0)
            .arg(k)
            .arg("DIALECT")
            .arg(2);

        let mut conn = self.conn.clone();
        let reply: Value = cmd.query_async(&mut conn).await?;
        let prefix = format!("{}:", self.name);

        parse_search_reply(&reply)?
            .into_iter()
            .map(|(key, fields)| {
                let id = key.strip_prefix(&prefix).unwrap_or(&key);
                let distance: f32 = fields
                    .get(DISTANCE_FIELD)
                    .and_then(|d| d.parse().ok())
                    .ok_or_else(|| {
                        MemdcError::Index(format!("Search hit {} has no distance", key))
                    })?;
                Ok(ScoredMemory {
                    record: record_from_fields(id, &fields),
                    score: distance_to_score(distance),
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(MemdcError::Index(format!(
                "Redis PING returned unexpected response: {}",
                pong
            )));
        }
        Ok(())
    }
}

fn is_missing_index(err: &redis::RedisError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("unknown index") || msg.contains("no such index")
}

/// Arguments following `FT.CREATE`
fn create_index_args(name: &str, dimensions: usize) -> Vec<String> {
    let mut args: Vec<String> = [name, "ON", "HASH", "PREFIX", "1"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(format!("{}:", name));
    args.push("SCHEMA".to_string());
    for field in ["text", "created_at", "title"] {
        args.push(field.to_string());
        args.push("TEXT".to_string());
    }
    // Exact, whole-value matching to agree with `TagFilter::matches`
    for field in ["id", "type", "status", "userId"] {
        args.extend([
            field.to_string(),
            "TAG".to_string(),
            "SEPARATOR".to_string(),
            TAG_SEPARATOR.to_string(),
            "CASESENSITIVE".to_string(),
        ]);
    }
    args.extend(
        [
            "embedding",
            "VECTOR",
            "FLAT",
            "6",
            "TYPE",
            "FLOAT32",
            "DIM",
            &dimensions.to_string(),
            "DISTANCE_METRIC",
            "COSINE",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

/// Hybrid KNN query string, `*` when unfiltered
fn knn_query(filter: Option<&TagFilter>, k: usize) -> String {
    let base = filter
        .map(|f| f.to_string())
        .unwrap_or_else(|| "*".to_string());
    format!(
        "{}=>[KNN {} @embedding $vec AS {}]",
        base, k, DISTANCE_FIELD
    )
}

fn record_fields(record: &MemoryRecord) -> Vec<(&'static str, &str)> {
    let mut fields = vec![
        ("id", record.id.as_str()),
        ("text", record.text.as_str()),
        ("type", record.memory_type.as_str()),
        ("status", record.status.as_str()),
        ("userId", record.user_id.as_str()),
        ("created_at", record.created_at.as_str()),
    ];
    if let Some(title) = &record.title {
        fields.push(("title", title.as_str()));
    }
    fields
}

fn record_from_fields(id: &str, fields: &HashMap<String, String>) -> MemoryRecord {
    let field = |name: &str, default: &str| {
        fields
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };
    MemoryRecord {
        id: field("id", id),
        text: field("text", ""),
        memory_type: field("type", DEFAULT_MEMORY_TYPE),
        status: field("status", DEFAULT_STATUS),
        user_id: field("userId", UNKNOWN_USER),
        created_at: field("created_at", ""),
        title: fields.get("title").cloned(),
    }
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::VerbatimString { text, .. } => Some(text.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

/// Parse an `FT.SEARCH` reply: `[total, key, [field, value, ...], ...]`
fn parse_search_reply(reply: &Value) -> Result<Vec<(String, HashMap<String, String>)>> {
    let items = match reply {
        Value::Array(items) => items,
        other => {
            return Err(MemdcError::Index(format!(
                "Unexpected FT.SEARCH reply: {:?}",
                other
            )))
        }
    };

    let mut hits = Vec::new();
    let mut rest = items.iter().skip(1);
    while let Some(key) = rest.next() {
        let key = value_to_string(key)
            .ok_or_else(|| MemdcError::Index("FT.SEARCH hit without key".to_string()))?;
        let mut fields = HashMap::new();
        if let Some(Value::Array(pairs)) = rest.next() {
            for pair in pairs.chunks(2) {
                if let [name, value] = pair {
                    if let (Some(name), Some(value)) = (value_to_string(name), value_to_string(value)) {
                        fields.insert(name, value);
                    }
                }
            }
        }
        hits.push((key, fields));
    }
    Ok(hits)
}
