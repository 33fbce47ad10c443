use actix_web::{get, web, HttpResponse};
use std::collections::HashMap;

use crate::models::HealthResponse;
use crate::services::llm::{ChatModel, OpenAiChat};
use crate::services::vector_index::{PineconeIndex, VectorIndex};

/// Report whether the assistant's external dependencies are reachable and
/// how many vectors each market namespace holds.
#[utoipa::path(
    get,
    path = "/api/ai/health",
    tag = "Health",
    responses(
        (status = 200, description = "Dependency reachability and index counts", body = HealthResponse),
    ),
    summary = "Check AI assistant health"
)]
#[get("/ai/health")]
pub async fn health_check(
    chat: web::Data<OpenAiChat>,
    index: web::Data<PineconeIndex>,
) -> HttpResponse {
    let (ping, stats) = tokio::join!(chat.ping(), index.stats());

    let assistant_reachable = ping.is_ok();
    let (index_reachable, indexed_items) = match stats {
        Ok(stats) => (true, stats.namespaces),
        Err(_) => (false, HashMap::new()),
    };

    let status = if assistant_reachable && index_reachable {
        "healthy"
    } else {
        "degraded"
    };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        assistant_reachable,
        index_reachable,
        indexed_items,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
