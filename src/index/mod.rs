//! Vector index abstraction
//!
//! The index owns the durable copy of every memory: text, tag metadata and
//! embedding, keyed by memory id. Two implementations:
//!
//! - [`RedisIndex`]: RediSearch HASH index with a FLAT cosine vector field
//! - [`InMemoryIndex`]: brute-force cosine search, for tests and local runs
//!
//! Implementations must make [`VectorIndex::upsert`] a single atomic replace
//! so readers never observe a missing record between delete and insert.

mod filter;
mod memory;
mod redis;

pub use filter::{escape_tag_value, FilterBuilder, TagField, TagFilter, TAG_SEPARATOR};
pub use memory::InMemoryIndex;
pub use self::redis::RedisIndex;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{IndexedMemory, MemoryRecord};

/// A record returned by similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    /// Similarity in [0, 1], higher is closer
    pub score: f32,
}

/// Storage and KNN search over memories
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name ("redis", "memory")
    fn backend(&self) -> &'static str;

    /// Insert or replace the record with the same id
    ///
    /// Returns `true` when an existing record was replaced.
    async fn upsert(&self, memory: IndexedMemory) -> Result<bool>;

    /// Fetch a record by id
    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>>;

    /// Delete a record by id; `false` when nothing was stored under the id
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Up to `k` records closest to `vector`, best first
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&TagFilter>,
    ) -> Result<Vec<ScoredMemory>>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<()>;
}
