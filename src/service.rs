//! Memory lifecycle orchestration
//!
//! [`MemoryService`] ties the credential provider, embedder, vector index and
//! warehouse together. All handles are injected once at startup; the only
//! mutable state is the per-id lock table that serializes concurrent writes
//! to the same memory across both stores.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthClient, CredentialProvider};
use crate::config::{IndexBackend, Settings, WarehouseSettings};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{MemdcError, Result};
use crate::index::{
    FilterBuilder, InMemoryIndex, RedisIndex, TagField, VectorIndex, TAG_SEPARATOR,
};
use crate::types::{
    generate_memory_id, is_blank, normalize_memory_id, now_timestamp, CreateMemoryInput,
    CreateMemoryOutcome, IndexedMemory, MemoryRecord, MemoryView, SearchQuery, WarehouseHit,
    MAX_K, MIN_K, UNKNOWN_USER,
};
use crate::warehouse::{
    derive_dc_status, ingest_payload, Warehouse, WarehouseClient, WarehouseSearch,
    MAX_SEARCH_LIMIT,
};

fn check_tag_value(field: &str, value: &str) -> Result<()> {
    if value.contains(TAG_SEPARATOR) {
        return Err(MemdcError::Validation(format!(
            "{} contains a reserved control character",
            field
        )));
    }
    Ok(())
}

/// Service health as reported by `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// "ok" or "degraded"
    pub status: String,
    pub index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_host: Option<String>,
}

/// Per-id async mutexes, dropped once nobody holds or waits on them
#[derive(Default)]
struct IdLocks {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

struct IdGuard<'a> {
    locks: &'a IdLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IdLocks {
    async fn lock(&self, id: &str) -> IdGuard<'_> {
        let mutex = self.inner.entry(id.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        IdGuard {
            locks: self,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl Drop for IdGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .inner
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct MemoryService {
    auth: Arc<dyn CredentialProvider>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    warehouse: Arc<dyn Warehouse>,
    warehouse_settings: WarehouseSettings,
    key_prefix: String,
    redis_host: Option<String>,
    locks: IdLocks,
}

impl MemoryService {
    pub fn builder() -> MemoryServiceBuilder {
        MemoryServiceBuilder::default()
    }

    /// Construct every dependency from settings
    ///
    /// Connects to Redis (creating the index if needed) unless the memory
    /// backend is selected.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let embedder = create_embedder(&settings.embedding, settings.http_timeout)?;
        info!(
            provider = %settings.embedding.model,
            model = embedder.model_name(),
            dimensions = embedder.dimensions(),
            "Embedder ready"
        );

        let (index, redis_host): (Arc<dyn VectorIndex>, Option<String>) =
            match settings.index_backend {
                IndexBackend::Redis => {
                    let index = RedisIndex::connect(
                        &settings.redis.url(),
                        &settings.index_name,
                        embedder.dimensions(),
                    )
                    .await?;
                    (Arc::new(index), settings.redis.display_host())
                }
                IndexBackend::Memory => {
                    warn!("Using the in-memory index; memories are lost on exit");
                    (Arc::new(InMemoryIndex::new(embedder.dimensions())), None)
                }
            };

        let auth = AuthClient::new(settings.auth.clone(), settings.http_timeout)?;
        let warehouse = WarehouseClient::new(settings.warehouse.clone(), settings.http_timeout)?;

        let mut builder = Self::builder()
            .auth(Arc::new(auth))
            .embedder(embedder)
            .index(index)
            .warehouse(Arc::new(warehouse))
            .warehouse_settings(settings.warehouse.clone())
            .key_prefix(&settings.index_name);
        if let Some(host) = redis_host {
            builder = builder.redis_host(host);
        }
        builder.build()
    }

    fn normalize_id(&self, id: &str) -> Result<String> {
        let id = normalize_memory_id(id, &self.key_prefix);
        if id.is_empty() {
            return Err(MemdcError::Validation("memory_id must be non-empty".to_string()));
        }
        Ok(id)
    }

    /// Ingestion connector and object, required before anything is written
    fn mirror_target(&self) -> Result<(&str, &str)> {
        fn configured<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str> {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| MemdcError::Config(format!("{} is not configured", name)))
        }
        Ok((
            configured("DC_CONNECTOR", self.warehouse_settings.connector.as_deref())?,
            configured("DC_DLO", self.warehouse_settings.dlo.as_deref())?,
        ))
    }

    /// Create a memory, or fully replace the one with the same id
    ///
    /// Blank text fails before any external call, and a missing mirror
    /// target fails before the index is touched. The index write and the
    /// warehouse write run under the id's lock; a warehouse failure after a
    /// successful index write is returned as an error and not rolled back.
    #[instrument(skip(self, input), fields(text_len = input.text.len()))]
    pub async fn create(&self, input: CreateMemoryInput) -> Result<CreateMemoryOutcome> {
        if input.text.trim().is_empty() {
            return Err(MemdcError::Validation("text must be non-empty".to_string()));
        }

        check_tag_value("type", &input.memory_type)?;
        check_tag_value("status", &input.status)?;
        let (connector, dlo) = self.mirror_target()?;

        let auth = self.auth.get_token().await?;
        let tenant_ready = auth
            .tenant
            .as_ref()
            .is_some_and(|t| !t.token.is_empty() && !t.instance_url.trim().is_empty());
        if !tenant_ready {
            return Err(MemdcError::Config(
                "Data Cloud tenant credentials are unavailable (is DC_TENANT_EXCHANGE disabled?)"
                    .to_string(),
            ));
        }

        let id = match input.memory_id.as_deref() {
            Some(raw) if !raw.trim().is_empty() => self.normalize_id(raw)?,
            _ => generate_memory_id(),
        };
        check_tag_value("memory_id", &id)?;
        let user_id = [input.user_id.as_deref(), Some(auth.user_id.as_str())]
            .into_iter()
            .find(|v| !is_blank(*v))
            .flatten()
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| UNKNOWN_USER.to_string());
        check_tag_value("userId", &user_id)?;

        let embedding = self.embedder.embed(&input.text).await?;

        let _guard = self.locks.lock(&id).await;

        let record = MemoryRecord {
            id: id.clone(),
            text: input.text,
            memory_type: input.memory_type,
            status: input.status,
            user_id,
            created_at: now_timestamp(),
            title: input.title.filter(|t| !t.trim().is_empty()),
        };
        let payload = ingest_payload(
            &record.id,
            &record.text,
            &record.user_id,
            &record.created_at,
            record.title.as_deref(),
        );

        let replaced = self
            .index
            .upsert(IndexedMemory { record, embedding })
            .await?;
        info!(id = %id, replaced, "Stored memory in vector index");

        let response = self
            .warehouse
            .ingest(&payload, connector, dlo, &auth)
            .await
            .inspect_err(|e| {
                warn!(id = %id, error = %e, "Warehouse ingest failed after index write")
            })?;

        let dc_status = derive_dc_status(&response);
        info!(id = %id, dc_status = %dc_status, "Mirrored memory to warehouse");
        Ok(CreateMemoryOutcome {
            dc_status,
            redis_status: id,
        })
    }

    /// Similarity search, best match first
    #[instrument(skip(self, query), fields(k = query.k))]
    pub async fn search(&self, query: SearchQuery) -> Result<Vec<MemoryView>> {
        if query.query.trim().is_empty() {
            return Err(MemdcError::Validation("query must be non-empty".to_string()));
        }
        if !(MIN_K..=MAX_K).contains(&query.k) {
            return Err(MemdcError::Validation(format!(
                "k must be between {} and {}",
                MIN_K, MAX_K
            )));
        }

        let filter = FilterBuilder::new()
            .with(TagField::Type, query.memory_type.as_deref())
            .with(TagField::Status, query.status.as_deref())
            .with(TagField::UserId, query.user_id.as_deref())
            .build();
        if let Some(filter) = &filter {
            debug!(filter = %filter, "Search filter");
        }

        let vector = self.embedder.embed(&query.query).await?;
        let hits = self.index.search(&vector, query.k, filter.as_ref()).await?;
        debug!(results = hits.len(), "Search complete");

        Ok(hits
            .into_iter()
            .map(|hit| MemoryView::from_hit(hit.record, hit.score))
            .collect())
    }

    /// Fetch a memory; `None` when no memory has this id
    pub async fn get_by_id(&self, memory_id: &str) -> Result<Option<MemoryView>> {
        let id = self.normalize_id(memory_id)?;
        let record = self.index.get(&id).await?;
        debug!(id = %id, found = record.is_some(), "Get memory");
        Ok(record.map(MemoryView::from_record))
    }

    /// Delete a memory; `false` when no memory has this id
    pub async fn delete_by_id(&self, memory_id: &str) -> Result<bool> {
        let id = self.normalize_id(memory_id)?;
        let _guard = self.locks.lock(&id).await;
        let deleted = self.index.delete(&id).await?;
        info!(id = %id, deleted, "Delete memory");
        Ok(deleted)
    }

    /// Vector search against the warehouse mirror
    #[instrument(skip(self, query, user_id))]
    pub async fn search_warehouse(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WarehouseHit>> {
        if query.trim().is_empty() {
            return Err(MemdcError::Validation("query must be non-empty".to_string()));
        }
        if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
            return Err(MemdcError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_SEARCH_LIMIT
            )));
        }

        let auth = self.auth.get_token().await?;
        let mut request = WarehouseSearch::new(query.trim()).with_limit(limit);
        if let Some(user) = user_id.filter(|u| !u.trim().is_empty()) {
            request = request.with_user(user.trim());
        }
        let hits = self.warehouse.search(&request, &auth).await?;
        info!(results = hits.len(), "Warehouse search complete");
        Ok(hits)
    }

    pub async fn health(&self) -> HealthReport {
        let status = match self.index.ping().await {
            Ok(()) => "ok",
            Err(e) => {
                warn!(error = %e, "Vector index ping failed");
                "degraded"
            }
        };
        HealthReport {
            status: status.to_string(),
            index: self.index.backend().to_string(),
            redis_host: self.redis_host.clone(),
        }
    }

    /// Number of ids with a live lock entry
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}

/// Builder for [`MemoryService`]; every dependency handle is required
#[derive(Default)]
pub struct MemoryServiceBuilder {
    auth: Option<Arc<dyn CredentialProvider>>,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn VectorIndex>>,
    warehouse: Option<Arc<dyn Warehouse>>,
    warehouse_settings: WarehouseSettings,
    key_prefix: Option<String>,
    redis_host: Option<String>,
}

impl MemoryServiceBuilder {
    pub fn auth(mut self, auth: Arc<dyn CredentialProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn warehouse(mut self, warehouse: Arc<dyn Warehouse>) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    pub fn warehouse_settings(mut self, settings: WarehouseSettings) -> Self {
        self.warehouse_settings = settings;
        self
    }

    /// Key prefix stripped from caller ids (defaults to "memories")
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn redis_host(mut self, host: impl Into<String>) -> Self {
        self.redis_host = Some(host.into());
        self
    }

    pub fn build(self) -> Result<MemoryService> {
        fn missing(what: &str) -> MemdcError {
            MemdcError::InternalState(format!("{} was not initialized", what))
        }

        Ok(MemoryService {
            auth: self.auth.ok_or_else(|| missing("credential provider"))?,
            embedder: self.embedder.ok_or_else(|| missing("embedder"))?,
            index: self.index.ok_or_else(|| missing("vector index"))?,
            warehouse: self.warehouse.ok_or_else(|| missing("warehouse client"))?,
            warehouse_settings: self.warehouse_settings,
            key_prefix: self.key_prefix.unwrap_or_else(|| "memories".to_string()),
            redis_host: self.redis_host,
            locks: IdLocks::default(),
        })
    }
}
