//! Process-local vector index

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ScoredMemory, TagFilter, VectorIndex};
use crate::embedding::{cosine_similarity, similarity_to_score};
use crate::error::{MemdcError, Result};
use crate::types::{IndexedMemory, MemoryRecord};

/// Brute-force cosine index held in memory
///
/// Every write takes the map's write lock, so an upsert replaces the old
/// record in one step.
pub struct InMemoryIndex {
    dimensions: usize,
    entries: RwLock<HashMap<String, IndexedMemory>>,
}

impl InMemoryIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of stored records carrying `id`
    pub fn count_id(&self, id: &str) -> usize {
        self.entries
            .read()
            .values()
            .filter(|m| m.record.id == id)
            .count()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, memory: IndexedMemory) -> Result<bool> {
        if memory.embedding.len() != self.dimensions {
            return Err(MemdcError::Index(format!(
                "Vector has {} dimensions, index expects {}",
                memory.embedding.len(),
                self.dimensions
            )));
        }
        let id = memory.record.id.clone();
        let replaced = self.entries.write().insert(id, memory).is_some();
        Ok(replaced)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.entries.read().get(id).map(|m| m.record.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.entries.write().remove(id).is_some())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&TagFilter>,
    ) -> Result<Vec<ScoredMemory>> {
        let entries = self.entries.read();
        let mut hits: Vec<ScoredMemory> = entries
            .values()
            .filter(|m| filter.map(|f| f.matches(&m.record)).unwrap_or(true))
            .map(|m| ScoredMemory {
                record: m.record.clone(),
                score: similarity_to_score(cosine_similarity(vector, &m.embedding)),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FilterBuilder, TagField};

    fn memory(id: &str, status: &str, embedding: Vec<f32>) -> IndexedMemory {
        IndexedMemory {
            record: MemoryRecord {
                id: id.to_string(),
                text: format!("text of {}", id),
                memory_type: "note".to_string(),
                status: status.to_string(),
                user_id: "alice".to_string(),
                created_at: "2024-01-01T00:00:00+00:00".to_string(),
                title: None,
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let index = InMemoryIndex::new(2);
        assert!(!index.upsert(memory("a", "active", vec![1.0, 0.0])).await.unwrap());
        assert!(index.upsert(memory("a", "archived", vec![0.0, 1.0])).await.unwrap());
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").await.unwrap().unwrap().status, "archived");
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = InMemoryIndex::new(3);
        let err = index.upsert(memory("a", "active", vec![1.0])).await.unwrap_err();
        assert!(matches!(err, MemdcError::Index(_)));
    }

    #[tokio::test]
    async fn test_search_orders_and_filters() {
        let index = InMemoryIndex::new(2);
        index.upsert(memory("close", "active", vec![1.0, 0.1])).await.unwrap();
        index.upsert(memory("far", "active", vec![0.0, 1.0])).await.unwrap();
        index.upsert(memory("closest", "archived", vec![1.0, 0.0])).await.unwrap();

        let all = index.search(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["closest", "close", "far"]);
        assert!(all.iter().all(|h| (0.0..=1.0).contains(&h.score)));

        let filter = FilterBuilder::new()
            .with(TagField::Status, Some("active"))
            .build();
        let active = index.search(&[1.0, 0.0], 1, filter.as_ref()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].record.id, "close");
    }

    #[tokio::test]
    async fn test_delete() {
        let index = InMemoryIndex::new(2);
        index.upsert(memory("a", "active", vec![1.0, 0.0])).await.unwrap();
        assert!(index.delete("a").await.unwrap());
        assert!(!index.delete("a").await.unwrap());
        assert!(index.get("a").await.unwrap().is_none());
    }
}
