//! Memory Store (C8, spec §4.9): an append-only `memories.jsonl` plus a
//! derived tag/keyword `index.json`, mutated behind a single lock (spec
//! "the store does not support concurrent mutators across processes").
//! Grounded on `conclave-core::checkpoint`'s rehydrate-then-mutate shape
//! for the load/append/rewrite cadence, generalized to the retrieval
//! filters (type/tags/keyword/similarity) spec §4.9 names; no direct
//! teacher analogue since `restflow-core`'s chat memory is message-history,
//! not a freestanding keyword-addressable note store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conclave_contracts::MemoryId;
use conclave_models::{Memory, RetrievalMode};
use conclave_storage::StorageLayout;
use conclave_traits::MemoryLookup;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

const MIN_KEYWORD_LEN: usize = 4;

fn keywords_of(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > MIN_KEYWORD_LEN - 1)
        .map(|w| w.to_lowercase())
        .collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryIndex {
    #[serde(default)]
    by_tag: HashMap<String, Vec<MemoryId>>,
    #[serde(default)]
    by_keyword: HashMap<String, Vec<MemoryId>>,
}

impl MemoryIndex {
    fn rebuild(memories: &[Memory]) -> Self {
        let mut index = MemoryIndex::default();
        for memory in memories {
            for tag in &memory.tags {
                index.by_tag.entry(tag.clone()).or_default().push(memory.memory_id.clone());
            }
            for word in keywords_of(&memory.content) {
                index.by_keyword.entry(word).or_default().push(memory.memory_id.clone());
            }
        }
        index
    }
}

/// An embedding-backed similarity provider (SPEC_FULL §4.9's
/// `EmbeddingProvider` seam). Provider SDKs are out of scope (spec §1), so
/// the only shipped implementation is network-free; an HTTP-backed one
/// would implement this same trait.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn jaccard_similarity(query_words: &std::collections::HashSet<String>, content_words: &std::collections::HashSet<String>) -> f32 {
    if query_words.is_empty() || content_words.is_empty() {
        return 0.0;
    }
    let intersection = query_words.intersection(content_words).count();
    let union = query_words.union(content_words).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

pub struct MemoryStore {
    layout: Arc<StorageLayout>,
    default_expiry_days: Option<i64>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(layout: Arc<StorageLayout>, default_expiry_days: Option<i64>) -> Self {
        Self {
            layout,
            default_expiry_days,
            embedding_provider: None,
            lock: Mutex::new(()),
        }
    }

    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    async fn load_all(&self) -> Result<Vec<Memory>> {
        Ok(conclave_storage::atomic::read_jsonl(&self.layout.memory_log_path()).await?)
    }

    async fn persist_index(&self, memories: &[Memory]) -> Result<()> {
        let index = MemoryIndex::rebuild(memories);
        conclave_storage::atomic::write_json_atomic(&self.layout.memory_index_path(), &index).await?;
        Ok(())
    }

    /// Appends a new memory (spec §4.9 `store`).
    pub async fn store(
        &self,
        memory_type: impl Into<String>,
        content: impl Into<String>,
        metadata: serde_json::Value,
        tags: Vec<String>,
        expires_in_days: Option<i64>,
    ) -> Result<Memory> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();
        let expiry_days = expires_in_days.or(self.default_expiry_days);
        let memory = Memory {
            memory_id: MemoryId::new(conclave_contracts::new_event_id(now)),
            created_at: now,
            expires_at: expiry_days.map(|days| now + chrono::Duration::days(days)),
            memory_type: memory_type.into(),
            content: content.into(),
            metadata,
            tags,
        };
        conclave_storage::atomic::append_jsonl_locked(&self.layout.memory_log_path(), &memory).await?;
        let mut all = self.load_all().await?;
        all.push(memory.clone());
        self.persist_index(&all).await?;
        Ok(memory)
    }

    /// Filters by non-expired, then explicit `memory_type`/`tags`, then
    /// case-insensitive keyword containment in content+metadata, sorted by
    /// `created_at` descending and truncated to `limit` (spec §4.9
    /// `retrieve`). `mode` is currently informational: both reactive (an
    /// agent-attached `memory_query`) and proactive (input-synthesized
    /// query) retrieval share this same filter/rank/truncate shape, per
    /// spec §4.4's `memory_retriever` description of the two modes.
    pub async fn retrieve(
        &self,
        query: Option<&str>,
        memory_type: Option<&str>,
        tags: &[String],
        limit: usize,
        _mode: RetrievalMode,
    ) -> Result<Vec<Memory>> {
        let now = Utc::now();
        let mut memories: Vec<Memory> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|m| !m.is_expired(now))
            .filter(|m| memory_type.map(|t| m.memory_type == t).unwrap_or(true))
            .filter(|m| tags.iter().all(|t| m.tags.iter().any(|mt| mt == t)))
            .filter(|m| match query {
                None => true,
                Some(q) => {
                    let q = q.to_lowercase();
                    m.content.to_lowercase().contains(&q)
                        || m.metadata.to_string().to_lowercase().contains(&q)
                }
            })
            .collect();
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        memories.truncate(limit);
        Ok(memories)
    }

    /// Jaccard-over-tokenized-content ranking with a small boost per
    /// matching tag, or cosine-over-embeddings if `use_embeddings` and an
    /// `EmbeddingProvider` is configured (spec §4.9 `retrieve_by_similarity`).
    pub async fn retrieve_by_similarity(
        &self,
        query_text: &str,
        limit: usize,
        threshold: f32,
        use_embeddings: bool,
    ) -> Result<Vec<Memory>> {
        let now = Utc::now();
        let memories: Vec<Memory> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|m| !m.is_expired(now))
            .collect();

        let mut scored: Vec<(f32, Memory)> = if use_embeddings {
            if let Some(provider) = &self.embedding_provider {
                let Some(query_vec) = provider.embed(query_text).await else {
                    return Ok(Vec::new());
                };
                let mut out = Vec::with_capacity(memories.len());
                for memory in memories {
                    if let Some(content_vec) = provider.embed(&memory.content).await {
                        out.push((cosine_similarity(&query_vec, &content_vec), memory));
                    }
                }
                out
            } else {
                self.jaccard_rank(query_text, memories)
            }
        } else {
            self.jaccard_rank(query_text, memories)
        };

        scored.retain(|(score, _)| *score >= threshold);
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, m)| m).collect())
    }

    fn jaccard_rank(&self, query_text: &str, memories: Vec<Memory>) -> Vec<(f32, Memory)> {
        let query_words: std::collections::HashSet<String> = keywords_of(query_text).into_iter().collect();
        memories
            .into_iter()
            .map(|memory| {
                let content_words: std::collections::HashSet<String> = keywords_of(&memory.content).into_iter().collect();
                let mut score = jaccard_similarity(&query_words, &content_words);
                let tag_matches = memory.tags.iter().filter(|t| query_words.contains(&t.to_lowercase())).count();
                score += 0.05 * tag_matches as f32;
                (score.min(1.0), memory)
            })
            .collect()
    }

    /// Rewrites the log without the given id and rebuilds the index (spec
    /// §4.9 `delete`).
    pub async fn delete(&self, id: &MemoryId) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let all = self.load_all().await?;
        let found = all.iter().any(|m| &m.memory_id == id);
        let remaining: Vec<Memory> = all.into_iter().filter(|m| &m.memory_id != id).collect();
        conclave_storage::atomic::rewrite_jsonl_atomic(&self.layout.memory_log_path(), &remaining).await?;
        self.persist_index(&remaining).await?;
        Ok(found)
    }

    /// Rewrites the log keeping only non-expired entries (spec §4.9
    /// `apply_retention_policy`); idempotent (spec §8) since a second run
    /// finds nothing left to drop.
    pub async fn apply_retention_policy(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();
        let all = self.load_all().await?;
        let before = all.len();
        let remaining: Vec<Memory> = all.into_iter().filter(|m| !m.is_expired(now)).collect();
        let removed = before - remaining.len();
        if removed > 0 {
            conclave_storage::atomic::rewrite_jsonl_atomic(&self.layout.memory_log_path(), &remaining).await?;
            self.persist_index(&remaining).await?;
        }
        Ok(removed)
    }

    pub async fn get(&self, id: &MemoryId) -> Result<Option<Memory>> {
        Ok(self.load_all().await?.into_iter().find(|m| &m.memory_id == id))
    }
}

#[async_trait]
impl MemoryLookup for MemoryStore {
    async fn retrieve(
        &self,
        query: Option<&str>,
        memory_type: Option<&str>,
        tags: &[String],
        limit: usize,
    ) -> Vec<Memory> {
        MemoryStore::retrieve(self, query, memory_type, tags, limit, RetrievalMode::Proactive)
            .await
            .unwrap_or_default()
    }

    async fn retrieve_by_similarity(&self, query_text: &str, limit: usize, threshold: f32) -> Vec<Memory> {
        MemoryStore::retrieve_by_similarity(self, query_text, limit, threshold, false)
            .await
            .unwrap_or_default()
    }
}

pub type SharedMemoryStore = Arc<MemoryStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_retrieve_exact_substring_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = MemoryStore::new(layout, None);
        store
            .store("claim_note", "the collision claim involved a rear bumper", serde_json::json!({}), vec!["collision".into()], None)
            .await
            .unwrap();

        let found = store
            .retrieve(Some("rear bumper"), None, &[], 10, RetrievalMode::Reactive)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn expired_memory_is_excluded_from_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = MemoryStore::new(layout, None);
        let memory = store
            .store("note", "will expire soon", serde_json::json!({}), vec![], Some(-1))
            .await
            .unwrap();
        assert!(memory.is_expired(Utc::now()));

        let found = store.retrieve(None, None, &[], 10, RetrievalMode::Reactive).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn apply_retention_policy_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = MemoryStore::new(layout, None);
        store.store("note", "expired", serde_json::json!({}), vec![], Some(-1)).await.unwrap();

        let removed_first = store.apply_retention_policy().await.unwrap();
        assert_eq!(removed_first, 1);
        let removed_second = store.apply_retention_policy().await.unwrap();
        assert_eq!(removed_second, 0);
    }

    #[tokio::test]
    async fn similarity_ranks_by_jaccard_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = MemoryStore::new(layout, None);
        store
            .store("note", "fraud indicators include repeated claims filed quickly", serde_json::json!({}), vec![], None)
            .await
            .unwrap();
        store
            .store("note", "totally unrelated weather report for tomorrow", serde_json::json!({}), vec![], None)
            .await
            .unwrap();

        let found = store
            .retrieve_by_similarity("fraud indicators repeated claims", 5, 0.1, false)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].content.contains("fraud"));
    }

    #[tokio::test]
    async fn delete_removes_entry_and_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = MemoryStore::new(layout, None);
        let memory = store.store("note", "content", serde_json::json!({}), vec![], None).await.unwrap();

        let deleted = store.delete(&memory.memory_id).await.unwrap();
        assert!(deleted);
        assert!(store.get(&memory.memory_id).await.unwrap().is_none());
    }
}
