use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;

use crate::models::{Audience, Market};

/// Vector id prefix; index entries are keyed `product_{id}`.
const ID_PREFIX: &str = "product_";

#[derive(Error, Debug)]
pub enum IndexError {
    /// The index could not be reached or answered with a server error.
    /// Distinct from an empty result so callers can fall back instead of
    /// reporting "no matches".
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    /// The index rejected the request (bad payload, bad filter).
    #[error("vector index rejected request: {0}")]
    Rejected(String),

    #[error("invalid vector index response: {0}")]
    InvalidResponse(String),
}

/// Metadata snapshot stored next to each vector, used for post-filtering
/// at query time. Derived from the catalog product; never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub product_id: i64,
    pub market: Market,
    pub audience: Audience,
    pub active: bool,
    pub price: f64,
    pub rating: f32,
    pub in_stock: bool,
}

/// A vector plus its metadata, ready to upsert.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub vector: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}

/// One similarity match from a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: i64,
    pub score: f32,
}

/// Query-time metadata constraints: in-stock only, and the requester's
/// audience or unisex.
#[derive(Debug, Clone)]
pub struct MetadataFilter {
    pub audience: Audience,
}

impl MetadataFilter {
    fn to_query_filter(&self) -> serde_json::Value {
        let mut audiences = vec![self.audience.as_str()];
        if self.audience != Audience::Unisex {
            audiences.push(Audience::Unisex.as_str());
        }
        json!({
            "in_stock": {"$eq": true},
            "audience": {"$in": audiences},
        })
    }
}

/// Per-namespace vector counts, for observability.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub dimension: usize,
    pub total_vectors: usize,
    pub namespaces: HashMap<String, usize>,
}

/// Namespace-scoped nearest-neighbor index of product vectors.
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite; idempotent per (namespace, id).
    fn upsert(
        &self,
        namespace: &str,
        record: &EmbeddingRecord,
    ) -> impl Future<Output = Result<(), IndexError>> + Send;

    /// Remove a vector; absent ids are a no-op, not an error.
    fn delete(&self, namespace: &str, id: i64)
        -> impl Future<Output = Result<(), IndexError>> + Send;

    /// Up to `top_k` matches in `namespace` passing `filter`, best first.
    fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> impl Future<Output = Result<Vec<QueryHit>, IndexError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<IndexStats, IndexError>> + Send;
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    vectors: Vec<WireVector>,
    namespace: String,
}

#[derive(Debug, Serialize)]
struct WireVector {
    id: String,
    values: Vec<f32>,
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct DeleteRequest {
    ids: Vec<String>,
    namespace: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    namespace: String,
    vector: Vec<f32>,
    top_k: usize,
    filter: serde_json::Value,
    include_values: bool,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    dimension: usize,
    #[serde(default, rename = "totalVectorCount")]
    total_vector_count: usize,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
struct NamespaceStats {
    #[serde(rename = "vectorCount")]
    vector_count: usize,
}

/// Pinecone-backed implementation speaking to a serverless index host.
#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: reqwest::Client,
    base_url: String,
}

impl PineconeIndex {
    pub fn new(api_key: &str, host: &str) -> Result<Self, IndexError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            api_key.parse().map_err(|_| {
                IndexError::Rejected("API key is not a valid header value".to_string())
            })?,
        );
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| IndexError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: host.trim_end_matches('/').to_string(),
        })
    }

    async fn post(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::Response, IndexError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(IndexError::Unavailable(format!("status {}: {}", status, text)))
        } else {
            Err(IndexError::Rejected(format!("status {}: {}", status, text)))
        }
    }
}

impl VectorIndex for PineconeIndex {
    async fn upsert(&self, namespace: &str, record: &EmbeddingRecord) -> Result<(), IndexError> {
        let request = UpsertRequest {
            vectors: vec![WireVector {
                id: format!("{}{}", ID_PREFIX, record.id),
                values: record.vector.clone(),
                metadata: serde_json::to_value(&record.metadata)
                    .map_err(|e| IndexError::Rejected(e.to_string()))?,
            }],
            namespace: namespace.to_string(),
        };

        self.post("/vectors/upsert", &request).await?;
        debug!("Upserted product {} into namespace {}", record.id, namespace);
        Ok(())
    }

    async fn delete(&self, namespace: &str, id: i64) -> Result<(), IndexError> {
        let request = DeleteRequest {
            ids: vec![format!("{}{}", ID_PREFIX, id)],
            namespace: namespace.to_string(),
        };

        self.post("/vectors/delete", &request).await?;
        debug!("Deleted product {} from namespace {}", id, namespace);
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryHit>, IndexError> {
        let request = QueryRequest {
            namespace: namespace.to_string(),
            vector: vector.to_vec(),
            top_k,
            filter: filter.to_query_filter(),
            include_values: false,
            include_metadata: false,
        };

        let response: QueryResponse = self
            .post("/query", &request)
            .await?
            .json()
            .await
            .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;

        Ok(response
            .matches
            .into_iter()
            .filter_map(|m| {
                m.id
                    .strip_prefix(ID_PREFIX)
                    .and_then(|raw| raw.parse().ok())
                    .map(|id| QueryHit { id, score: m.score })
            })
            .collect())
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let response: StatsResponse = self
            .post("/describe_index_stats", &json!({}))
            .await?
            .json()
            .await
            .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;

        Ok(IndexStats {
            dimension: response.dimension,
            total_vectors: response.total_vector_count,
            namespaces: response
                .namespaces
                .into_iter()
                .map(|(name, stats)| (name, stats.vector_count))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_includes_unisex_for_specific_audience() {
        let filter = MetadataFilter {
            audience: Audience::Men,
        };
        let value = filter.to_query_filter();

        assert_eq!(value["in_stock"]["$eq"], true);
        assert_eq!(value["audience"]["$in"], serde_json::json!(["M", "U"]));
    }

    #[test]
    fn filter_does_not_duplicate_unisex() {
        let filter = MetadataFilter {
            audience: Audience::Unisex,
        };
        let value = filter.to_query_filter();

        assert_eq!(value["audience"]["$in"], serde_json::json!(["U"]));
    }
}
