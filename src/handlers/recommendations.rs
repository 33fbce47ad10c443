use crate::{
    app::AppPipeline,
    error::ApiError,
    models::{
        Audience, ErrorResponse, Market, RecommendationRequest, RecommendationResponse,
        RecommendedItem,
    },
};
use actix_web::{
    web::{self, Json},
    HttpResponse,
};

pub fn recommendations_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ai/recommendations").route(web::post().to(get_recommendations)));
}

/// Get AI product recommendations for a free-text request
#[utoipa::path(
    post,
    path = "/api/ai/recommendations",
    tag = "Recommendations",
    request_body = RecommendationRequest,
    responses(
        (status = 200, description = "Ranked recommendations with an explanation, or an honest no-match payload", body = RecommendationResponse),
        (status = 400, description = "Invalid input parameters", body = ErrorResponse),
        (status = 503, description = "Assistant unavailable, safe to retry", body = ErrorResponse),
        (status = 504, description = "A pipeline stage timed out", body = ErrorResponse),
    ),
    summary = "Get AI product recommendations",
    description = "Runs the conversational recommendation pipeline: the query is analyzed, \
        structured requirements are extracted, candidates are found via semantic search with \
        an attribute-search fallback, then ranked and explained."
)]
pub async fn get_recommendations(
    request: Json<RecommendationRequest>,
    pipeline: web::Data<AppPipeline>,
) -> Result<HttpResponse, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::InvalidInput("Query cannot be empty".to_string()));
    }

    let market = request.market.unwrap_or(Market::Kg);
    let audience = request.audience.unwrap_or(Audience::Unisex);

    let outcome = pipeline.run(&request.query, market, audience).await?;

    Ok(HttpResponse::Ok().json(RecommendationResponse {
        items: outcome.items.iter().map(RecommendedItem::from).collect(),
        explanation: outcome.explanation,
        confidence: outcome.confidence,
        extracted_requirements: outcome.requirements,
    }))
}
