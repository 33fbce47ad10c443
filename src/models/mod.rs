use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

// Re-export domain types
pub use filter::RequirementFilter;
pub use product::{Audience, Candidate, Market, Product};

pub mod filter;
pub mod product;

/// Request structure for AI product recommendations
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecommendationRequest {
    /// Free-text shopping request
    #[schema(example = "I have a party tonight and don't know what to wear")]
    pub query: String,
    /// Requester market; defaults to KG
    #[serde(default)]
    pub market: Option<Market>,
    /// Requester audience hint; defaults to unisex
    #[serde(default)]
    pub audience: Option<Audience>,
}

/// A recommended product as returned to the client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecommendedItem {
    pub id: i64,
    #[schema(example = "Slim Fit Party Shirt")]
    pub name: String,
    #[schema(example = "ZARA")]
    pub brand: Option<String>,
    #[schema(example = 2500.0)]
    pub price: f64,
    pub image: Option<String>,
    #[schema(example = 4.5)]
    pub rating: f32,
}

impl From<&Product> for RecommendedItem {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            brand: product.brand.clone(),
            price: product.price,
            image: product.image.clone(),
            rating: product.rating,
        }
    }
}

/// Response structure for AI product recommendations
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecommendationResponse {
    /// Ranked recommendations, best match first
    pub items: Vec<RecommendedItem>,
    /// Natural-language explanation referencing each recommended item
    pub explanation: String,
    /// Confidence in the whole recommendation, 0.0 to 1.0
    #[schema(example = 0.92)]
    pub confidence: f32,
    /// Structured requirements extracted from the query
    pub extracted_requirements: RequirementFilter,
}

/// Health check response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall status of the assistant
    #[schema(example = "healthy")]
    pub status: String,
    /// Whether the LLM dependency answered a ping
    pub assistant_reachable: bool,
    /// Whether the vector index answered a stats call
    pub index_reachable: bool,
    /// Number of indexed vectors per namespace
    #[schema(example = json!({"KG": 1250, "US": 830, "ALL": 120}))]
    pub indexed_items: HashMap<String, usize>,
    /// Current timestamp in RFC3339 format
    #[schema(example = "2026-01-15T10:30:00Z")]
    pub timestamp: String,
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    #[schema(example = "The assistant is temporarily unavailable. Please try again.")]
    pub error: String,
    /// Machine-readable failure reason
    #[schema(example = "assistant_unavailable")]
    pub reason: String,
}
