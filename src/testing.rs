//! In-memory fakes for the external collaborators, used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ml::{EmbedError, Embedder};
use crate::models::{Audience, Market, Product, RequirementFilter};
use crate::services::catalog::{CatalogError, CatalogStore};
use crate::services::llm::{ChatMessage, ChatModel, LlmError};
use crate::services::vector_index::{
    EmbeddingRecord, IndexError, IndexStats, MetadataFilter, QueryHit, VectorIndex,
};

/// Deterministic encoder: maps text to a small vector derived from its
/// bytes, so identical text always produces identical vectors.
#[derive(Default)]
pub struct FakeEmbedder {
    fail_substring: Option<String>,
}

impl FakeEmbedder {
    pub fn failing_on(mut self, substring: &str) -> Self {
        self.fail_substring = Some(substring.to_string());
        self
    }
}

impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if let Some(sub) = &self.fail_substring {
            if text.contains(sub.as_str()) {
                return Err(EmbedError::Unavailable("simulated encoder outage".into()));
            }
        }

        let mut vector = [1.0f32; 4];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % 4] += byte as f32 / 255.0;
        }
        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        Ok(vector.iter().map(|x| x / magnitude).collect())
    }
}

#[derive(Default)]
struct MemoryIndexInner {
    namespaces: Mutex<HashMap<String, Vec<EmbeddingRecord>>>,
    unavailable: AtomicBool,
}

/// In-memory vector index with namespace partitions and the same filter
/// semantics as the remote one. Clones share state; can simulate an
/// outage.
#[derive(Clone, Default)]
pub struct MemoryIndex {
    inner: Arc<MemoryIndexInner>,
}

impl MemoryIndex {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn count(&self, namespace: &str) -> usize {
        self.inner
            .namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), IndexError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            Err(IndexError::Unavailable("simulated index outage".into()))
        } else {
            Ok(())
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

impl VectorIndex for MemoryIndex {
    async fn upsert(&self, namespace: &str, record: &EmbeddingRecord) -> Result<(), IndexError> {
        self.check_available()?;
        let mut namespaces = self.inner.namespaces.lock().unwrap();
        let entries = namespaces.entry(namespace.to_string()).or_default();

        match entries.iter_mut().find(|e| e.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => entries.push(record.clone()),
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, id: i64) -> Result<(), IndexError> {
        self.check_available()?;
        let mut namespaces = self.inner.namespaces.lock().unwrap();
        if let Some(entries) = namespaces.get_mut(namespace) {
            entries.retain(|e| e.id != id);
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryHit>, IndexError> {
        self.check_available()?;
        let namespaces = self.inner.namespaces.lock().unwrap();
        let mut hits: Vec<QueryHit> = namespaces
            .get(namespace)
            .into_iter()
            .flatten()
            .filter(|e| {
                let meta = &e.metadata;
                meta.in_stock
                    && meta.active
                    && (meta.audience == filter.audience || meta.audience == Audience::Unisex)
            })
            .map(|e| QueryHit {
                id: e.id,
                score: cosine(vector, &e.vector),
            })
            .collect();

        // Stable sort keeps insertion order on score ties
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        self.check_available()?;
        let namespaces = self.inner.namespaces.lock().unwrap();
        let counts: HashMap<String, usize> = namespaces
            .iter()
            .map(|(name, entries)| (name.clone(), entries.len()))
            .collect();

        Ok(IndexStats {
            dimension: 4,
            total_vectors: counts.values().sum(),
            namespaces: counts,
        })
    }
}

/// In-memory catalog mirroring the attribute search semantics of the
/// Postgres store.
#[derive(Default)]
pub struct MemoryCatalog {
    products: Vec<Product>,
}

impl MemoryCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }
}

impl CatalogStore for MemoryCatalog {
    async fn fetch_active_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>, CatalogError> {
        Ok(self
            .products
            .iter()
            .filter(|p| ids.contains(&p.id) && p.is_active && p.in_stock)
            .cloned()
            .collect())
    }

    async fn search_by_attributes(
        &self,
        filter: &RequirementFilter,
        market: Market,
        audience: Audience,
        limit: i64,
    ) -> Result<Vec<Product>, CatalogError> {
        let overlaps = |tags: &[String], wanted: &[String]| {
            wanted.is_empty() || wanted.iter().any(|w| tags.contains(w))
        };

        let mut matches: Vec<Product> = self
            .products
            .iter()
            .filter(|p| p.is_active && p.in_stock)
            .filter(|p| p.market == market || p.market == Market::All)
            .filter(|p| p.audience == audience || p.audience == Audience::Unisex)
            .filter(|p| overlaps(&p.occasion_tags, &filter.occasion))
            .filter(|p| overlaps(&p.style_tags, &filter.style))
            .filter(|p| overlaps(&p.season_tags, &filter.season))
            .filter(|p| overlaps(&p.color_tags, &filter.colors))
            .filter(|p| filter.price_min.map_or(true, |min| p.price >= min))
            .filter(|p| filter.price_max.map_or(true, |max| p.price <= max))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.rating
                .partial_cmp(&a.rating)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn list_active(&self, market: Option<Market>) -> Result<Vec<Product>, CatalogError> {
        Ok(self
            .products
            .iter()
            .filter(|p| p.is_active)
            .filter(|p| match market {
                Some(m) => p.market == m || p.market == Market::All,
                None => true,
            })
            .cloned()
            .collect())
    }
}

/// Scripted chat model. Calls arrive in pipeline order: understanding
/// (plain), extraction (JSON), ranking (JSON), explanation (plain).
pub struct ScriptedChat {
    extraction: serde_json::Value,
    ranking: serde_json::Value,
    understanding: String,
    explanation: String,
    fail_understanding: bool,
    fail_extraction: bool,
    fail_ranking: bool,
    fail_explanation: bool,
    delay: Option<Duration>,
    plain_calls: Mutex<usize>,
    json_calls: Mutex<usize>,
}

impl Default for ScriptedChat {
    fn default() -> Self {
        Self {
            extraction: serde_json::json!({}),
            ranking: serde_json::json!({"product_ids": [], "confidence": 0.5, "reasoning": ""}),
            understanding: "Looking for outfit options for the occasion.".to_string(),
            explanation: "Here are some options that should work well.".to_string(),
            fail_understanding: false,
            fail_extraction: false,
            fail_ranking: false,
            fail_explanation: false,
            delay: None,
            plain_calls: Mutex::new(0),
            json_calls: Mutex::new(0),
        }
    }
}

impl ScriptedChat {
    pub fn with_extraction(mut self, extraction: serde_json::Value) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn with_ranking(mut self, ranking: serde_json::Value) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_explanation(mut self, explanation: &str) -> Self {
        self.explanation = explanation.to_string();
        self
    }

    pub fn failing_understanding(mut self) -> Self {
        self.fail_understanding = true;
        self
    }

    pub fn failing_extraction(mut self) -> Self {
        self.fail_extraction = true;
        self
    }

    pub fn failing_ranking(mut self) -> Self {
        self.fail_ranking = true;
        self
    }

    pub fn failing_explanation(mut self) -> Self {
        self.fail_explanation = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, LlmError> {
        let (reply, fail) = {
            let mut calls = self.plain_calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                (self.understanding.clone(), self.fail_understanding)
            } else {
                (self.explanation.clone(), self.fail_explanation)
            }
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(LlmError::Unavailable("simulated assistant outage".into()));
        }
        Ok(reply)
    }

    async fn complete_json(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<serde_json::Value, LlmError> {
        let (reply, fail) = {
            let mut calls = self.json_calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                (self.extraction.clone(), self.fail_extraction)
            } else {
                (self.ranking.clone(), self.fail_ranking)
            }
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(LlmError::Unavailable("simulated assistant outage".into()));
        }
        Ok(reply)
    }

    async fn ping(&self) -> Result<(), LlmError> {
        Ok(())
    }
}
