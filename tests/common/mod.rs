//! Shared fixtures: recording stand-ins for the upstream services

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use memdc::auth::{AuthResult, CredentialProvider};
use memdc::config::WarehouseSettings;
use memdc::embedding::{Embedder, TfIdfEmbedder};
use memdc::error::{MemdcError, Result};
use memdc::index::InMemoryIndex;
use memdc::warehouse::{Warehouse, WarehouseSearch};
use memdc::{MemoryService, WarehouseHit};

pub const DIMENSIONS: usize = 384;
pub const STUB_USER: &str = "005xx000001Sv6e";

pub struct StubAuth {
    pub user_id: String,
    tenant: bool,
    calls: AtomicUsize,
}

impl StubAuth {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            tenant: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Core login only, as with `DC_TENANT_EXCHANGE=false`
    pub fn without_tenant(user_id: &str) -> Self {
        Self {
            tenant: false,
            ..Self::new(user_id)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for StubAuth {
    async fn get_token(&self) -> Result<AuthResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let auth = AuthResult::new("core-token", "https://example.my.salesforce.com", &self.user_id);
        if self.tenant {
            Ok(auth.with_tenant("tenant-token", "tenant.c360a.salesforce.com"))
        } else {
            Ok(auth)
        }
    }
}

pub struct RecordingWarehouse {
    pub fail_ingest: bool,
    ingested: Mutex<Vec<Value>>,
    searches: Mutex<Vec<WarehouseSearch>>,
}

impl RecordingWarehouse {
    pub fn new(fail_ingest: bool) -> Self {
        Self {
            fail_ingest,
            ingested: Mutex::new(Vec::new()),
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn ingested(&self) -> Vec<Value> {
        self.ingested.lock().clone()
    }

    pub fn searches(&self) -> Vec<WarehouseSearch> {
        self.searches.lock().clone()
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn ingest(
        &self,
        payload: &Value,
        connector: &str,
        dlo: &str,
        auth: &AuthResult,
    ) -> Result<Value> {
        assert_eq!(connector, "memory_connector");
        assert_eq!(dlo, "Memory_dlo");
        assert!(auth.tenant.is_some());
        if self.fail_ingest {
            return Err(MemdcError::UpstreamHttp {
                status: 503,
                body: "ingestion unavailable".to_string(),
            });
        }
        self.ingested.lock().push(payload.clone());
        Ok(json!({ "accepted": true }))
    }

    async fn search(&self, request: &WarehouseSearch, _auth: &AuthResult) -> Result<Vec<WarehouseHit>> {
        self.searches.lock().push(request.clone());
        Ok(vec![WarehouseHit {
            record_id: Some("r1".to_string()),
            score: Some(0.87),
            chunk: Some("Alice loves".to_string()),
            source_value: Some("Alice loves hiking".to_string()),
        }])
    }
}

/// TF-IDF embedder that counts calls
pub struct CountingEmbedder {
    inner: TfIdfEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

pub struct Harness {
    pub service: Arc<MemoryService>,
    pub auth: Arc<StubAuth>,
    pub warehouse: Arc<RecordingWarehouse>,
    pub index: Arc<InMemoryIndex>,
    pub embedder: Arc<CountingEmbedder>,
}

pub fn harness() -> Harness {
    harness_with(STUB_USER, false)
}

pub fn warehouse_settings() -> WarehouseSettings {
    WarehouseSettings {
        connector: Some("memory_connector".to_string()),
        dlo: Some("Memory_dlo".to_string()),
        vector_index_dlm: Some("Memory_index_dlm".to_string()),
        chunk_dlm: Some("Memory_chunk_dlm".to_string()),
    }
}

pub fn harness_with(auth_user: &str, fail_ingest: bool) -> Harness {
    build_harness(StubAuth::new(auth_user), warehouse_settings(), fail_ingest)
}

pub fn build_harness(auth: StubAuth, settings: WarehouseSettings, fail_ingest: bool) -> Harness {
    let auth = Arc::new(auth);
    let warehouse = Arc::new(RecordingWarehouse::new(fail_ingest));
    let index = Arc::new(InMemoryIndex::new(DIMENSIONS));
    let embedder = Arc::new(CountingEmbedder {
        inner: TfIdfEmbedder::new(DIMENSIONS),
        calls: AtomicUsize::new(0),
    });

    let service = MemoryService::builder()
        .auth(auth.clone())
        .embedder(embedder.clone())
        .index(index.clone())
        .warehouse(warehouse.clone())
        .warehouse_settings(settings)
        .build()
        .expect("all dependencies provided");

    Harness {
        service: Arc::new(service),
        auth,
        warehouse,
        index,
        embedder,
    }
}
