use lazy_static::lazy_static;
use log::{debug, warn};
use serde::Serialize;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

use crate::models::product::normalize_text;

/// Output dimension of the sentence-transformer model. Indexed vectors and
/// query vectors must both have this length.
pub const EMBEDDING_DIM: usize = 384;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 15;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 500;
const EMBEDDING_CACHE_SIZE: usize = 256;
const MAX_TEXT_PREVIEW_LENGTH: usize = 100;

lazy_static! {
    // Global embedding cache to reduce API calls; keyed by normalized text
    static ref EMBEDDING_CACHE: RwLock<lru::LruCache<String, Vec<f32>>> = {
        let size = NonZeroUsize::new(EMBEDDING_CACHE_SIZE).unwrap();
        RwLock::new(lru::LruCache::new(size))
    };
}

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Deterministic text-to-vector encoder.
///
/// Implementations must be cosine-similarity-stable: the same text always
/// maps to (effectively) the same vector, so that index-time and query-time
/// encodings are comparable.
pub trait Embedder: Send + Sync {
    fn embed(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send;
}

/// Sentence encoder backed by the HuggingFace inference API.
#[derive(Clone)]
pub struct HuggingFaceEmbedder {
    client: reqwest::Client,
    api_key: String,
    model_url: String,
    model_name: String,
}

impl HuggingFaceEmbedder {
    pub fn new(api_key: &str, base_url: &str, model_name: &str) -> Result<Self, EmbedError> {
        if api_key.trim().is_empty() {
            return Err(EmbedError::Unavailable(
                "HuggingFace API key is empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECONDS))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| EmbedError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        let model_url = format!(
            "{}/models/{}",
            base_url.trim_end_matches('/'),
            model_name
        );

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model_url,
            model_name: model_name.to_string(),
        })
    }

    async fn request_embedding(&self, input: &str) -> Result<Vec<f32>, EmbedError> {
        #[derive(Serialize)]
        struct Request<'a> {
            inputs: &'a str,
            options: Options,
        }

        #[derive(Serialize)]
        struct Options {
            wait_for_model: bool,
            use_cache: bool,
        }

        let request = Request {
            inputs: input,
            options: Options {
                wait_for_model: true,
                use_cache: true,
            },
        };

        let response = self
            .client
            .post(&self.model_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Unavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                404 => EmbedError::Unavailable(format!("model not found: {}", self.model_name)),
                401 | 403 => {
                    EmbedError::Unavailable("authentication failed, check API key".to_string())
                }
                429 => EmbedError::Unavailable("rate limit exceeded".to_string()),
                _ => EmbedError::Unavailable(format!("status {}: {}", status, text)),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(format!("not JSON: {}", e)))?;

        parse_embedding(&body)
    }
}

impl Embedder for HuggingFaceEmbedder {
    /// Encode a single text into a unit-length vector, with a global LRU
    /// cache and retry with exponential backoff in front of the API.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let input = normalize_text(text);
        if input.is_empty() {
            return Err(EmbedError::InvalidResponse(
                "cannot embed empty text".to_string(),
            ));
        }

        if let Ok(cache) = EMBEDDING_CACHE.read() {
            if let Some(embedding) = cache.peek(&input).cloned() {
                let preview: String = input.chars().take(MAX_TEXT_PREVIEW_LENGTH).collect();
                debug!("Embedding cache hit: {}", preview);
                return Ok(embedding);
            }
        }

        let mut last_err = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.request_embedding(&input).await {
                Ok(embedding) => {
                    if embedding.len() != EMBEDDING_DIM {
                        return Err(EmbedError::InvalidResponse(format!(
                            "expected {} dimensions, got {}",
                            EMBEDDING_DIM,
                            embedding.len()
                        )));
                    }
                    let embedding = normalize_vector(&embedding);
                    if let Ok(mut cache) = EMBEDDING_CACHE.write() {
                        cache.put(input.clone(), embedding.clone());
                    }
                    return Ok(embedding);
                }
                Err(e) => {
                    if attempt < RETRY_ATTEMPTS {
                        let delay = RETRY_DELAY_MS * 2u64.pow(attempt - 1);
                        warn!(
                            "Embedding attempt {}/{} failed, retrying in {}ms: {}",
                            attempt, RETRY_ATTEMPTS, delay, e
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EmbedError::Unavailable("all retry attempts failed".to_string())))
    }
}

/// The inference API answers in a few shapes depending on the pipeline:
/// `[[f32]]`, `[f32]`, or `{"embedding": [...]}` / `{"embeddings": [[...]]}`.
fn parse_embedding(body: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let as_floats = |values: &Vec<serde_json::Value>| -> Vec<f32> {
        values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    };

    let embedding = match body {
        serde_json::Value::Array(outer) => match outer.first() {
            Some(serde_json::Value::Array(inner)) => as_floats(inner),
            Some(_) => as_floats(outer),
            None => Vec::new(),
        },
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::Array(values)) = map.get("embedding") {
                as_floats(values)
            } else if let Some(serde_json::Value::Array(rows)) = map.get("embeddings") {
                match rows.first() {
                    Some(serde_json::Value::Array(inner)) => as_floats(inner),
                    _ => Vec::new(),
                }
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    };

    if embedding.is_empty() {
        return Err(EmbedError::InvalidResponse(
            "no embedding found in response".to_string(),
        ));
    }

    Ok(embedding)
}

/// Normalize a vector to unit length
fn normalize_vector(vector: &[f32]) -> Vec<f32> {
    let magnitude: f32 = vector.iter().map(|&x| x * x).sum::<f32>().sqrt();

    if magnitude > 0.0 {
        vector.iter().map(|&x| x / magnitude).collect()
    } else {
        vec![0.0; vector.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_array_response() {
        let body = json!([[0.1, 0.2, 0.3]]);
        assert_eq!(parse_embedding(&body).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn parses_flat_array_response() {
        let body = json!([0.5, 0.5]);
        assert_eq!(parse_embedding(&body).unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn parses_object_response() {
        let body = json!({"embedding": [1.0, 0.0]});
        assert_eq!(parse_embedding(&body).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn rejects_empty_response() {
        assert!(parse_embedding(&json!({})).is_err());
        assert!(parse_embedding(&json!([])).is_err());
    }

    #[test]
    fn normalize_produces_unit_length() {
        let normalized = normalize_vector(&[3.0, 4.0]);
        let magnitude: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_handles_zero_vector() {
        assert_eq!(normalize_vector(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
