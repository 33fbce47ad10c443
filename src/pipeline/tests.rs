use serde_json::json;
use std::time::Duration;

use super::*;
use crate::models::product::test_product;
use crate::services::sync::CatalogSyncService;
use crate::testing::{FakeEmbedder, MemoryCatalog, MemoryIndex, ScriptedChat};

type TestPipeline = RecommendationPipeline<ScriptedChat, FakeEmbedder, MemoryIndex, MemoryCatalog>;

fn pipeline(chat: ScriptedChat, index: MemoryIndex, catalog: MemoryCatalog) -> TestPipeline {
    RecommendationPipeline::new(
        chat,
        FakeEmbedder::default(),
        index,
        catalog,
        Duration::from_secs(5),
    )
}

fn party_shirt() -> Product {
    let mut product = test_product(1, "Slim Fit Party Shirt");
    product.occasion_tags = vec!["party".to_string(), "night_out".to_string()];
    product.style_tags = vec!["trendy".to_string()];
    product
}

#[tokio::test]
async fn party_tonight_query_recommends_the_party_shirt() {
    let index = MemoryIndex::default();
    let product = party_shirt();

    // Index the product the same way catalog sync would
    CatalogSyncService::new(FakeEmbedder::default(), index.clone())
        .on_item_saved(&product)
        .await;

    let chat = ScriptedChat::default()
        .with_extraction(json!({
            "occasion": ["party", "night_out"],
            "style": ["trendy", "elegant"],
        }))
        .with_ranking(json!({
            "product_ids": [1],
            "confidence": 0.92,
            "reasoning": "direct occasion match",
        }))
        .with_explanation("The Slim Fit Party Shirt is a great pick for tonight's party.");

    let outcome = pipeline(chat, index, MemoryCatalog::new(vec![product]))
        .run("I have a party tonight", Market::Kg, Audience::Unisex)
        .await
        .unwrap();

    assert_eq!(outcome.status, PipelineStatus::Done);
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].id, 1);
    assert!(outcome.explanation.contains("Slim Fit Party Shirt"));
    assert!((outcome.confidence - 0.92).abs() < 1e-6);
    assert_eq!(outcome.requirements.occasion, vec!["party", "night_out"]);
}

#[tokio::test]
async fn empty_catalog_ends_in_no_match() {
    let outcome = pipeline(
        ScriptedChat::default(),
        MemoryIndex::default(),
        MemoryCatalog::default(),
    )
    .run("I have a party tonight", Market::Kg, Audience::Unisex)
    .await
    .unwrap();

    assert_eq!(outcome.status, PipelineStatus::NoMatch);
    assert!(outcome.items.is_empty());
    assert_eq!(outcome.confidence, 0.0);
    assert_eq!(outcome.explanation, NO_MATCH_MESSAGE);
}

#[tokio::test]
async fn index_outage_falls_back_to_attribute_search() {
    let index = MemoryIndex::default();
    index.set_unavailable(true);

    let chat = ScriptedChat::default().with_extraction(json!({
        "occasion": ["party"],
    }));

    let outcome = pipeline(chat, index, MemoryCatalog::new(vec![party_shirt()]))
        .run("I have a party tonight", Market::Kg, Audience::Unisex)
        .await
        .unwrap();

    assert_eq!(outcome.status, PipelineStatus::Done);
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].id, 1);
}

#[tokio::test]
async fn empty_filter_still_produces_results() {
    let mut popular = test_product(2, "Everyday Tee");
    popular.rating = 4.8;

    let outcome = pipeline(
        ScriptedChat::default().with_extraction(json!({})),
        MemoryIndex::default(),
        MemoryCatalog::new(vec![popular, test_product(3, "Plain Socks")]),
    )
    .run("surprise me", Market::Kg, Audience::Unisex)
    .await
    .unwrap();

    assert_eq!(outcome.status, PipelineStatus::Done);
    assert!(!outcome.items.is_empty());
    assert!(outcome.requirements.is_empty());
    // Highest rated comes first in the degraded ordering
    assert_eq!(outcome.items[0].id, 2);
}

#[tokio::test]
async fn understanding_failure_aborts_with_recoverable_error() {
    let error = pipeline(
        ScriptedChat::default().failing_understanding(),
        MemoryIndex::default(),
        MemoryCatalog::new(vec![party_shirt()]),
    )
    .run("I have a party tonight", Market::Kg, Audience::Unisex)
    .await
    .unwrap_err();

    assert!(matches!(
        error,
        PipelineError::AssistantUnavailable {
            stage: "understanding",
            ..
        }
    ));
}

#[tokio::test]
async fn extraction_failure_aborts_with_recoverable_error() {
    let error = pipeline(
        ScriptedChat::default().failing_extraction(),
        MemoryIndex::default(),
        MemoryCatalog::new(vec![party_shirt()]),
    )
    .run("I have a party tonight", Market::Kg, Audience::Unisex)
    .await
    .unwrap_err();

    assert!(matches!(
        error,
        PipelineError::AssistantUnavailable {
            stage: "extraction",
            ..
        }
    ));
}

#[tokio::test]
async fn ranking_failure_degrades_to_search_order() {
    let chat = ScriptedChat::default()
        .with_extraction(json!({"occasion": ["party"]}))
        .failing_ranking();

    let outcome = pipeline(
        chat,
        MemoryIndex::default(),
        MemoryCatalog::new(vec![party_shirt()]),
    )
    .run("I have a party tonight", Market::Kg, Audience::Unisex)
    .await
    .unwrap();

    assert_eq!(outcome.status, PipelineStatus::Done);
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.confidence, 0.5);
}

#[tokio::test]
async fn explanation_failure_keeps_the_selection() {
    let chat = ScriptedChat::default()
        .with_extraction(json!({"occasion": ["party"]}))
        .with_ranking(json!({"product_ids": [1], "confidence": 0.8}))
        .failing_explanation();

    let outcome = pipeline(
        chat,
        MemoryIndex::default(),
        MemoryCatalog::new(vec![party_shirt()]),
    )
    .run("I have a party tonight", Market::Kg, Audience::Unisex)
    .await
    .unwrap();

    assert_eq!(outcome.status, PipelineStatus::Done);
    assert_eq!(outcome.items.len(), 1);
    // The fallback summary still references the selected item
    assert!(outcome.explanation.contains("Slim Fit Party Shirt"));
}

#[tokio::test]
async fn slow_stage_fails_with_timeout_reason() {
    let chat = ScriptedChat::default().with_delay(Duration::from_millis(100));

    let error = RecommendationPipeline::new(
        chat,
        FakeEmbedder::default(),
        MemoryIndex::default(),
        MemoryCatalog::new(vec![party_shirt()]),
        Duration::from_millis(10),
    )
    .run("I have a party tonight", Market::Kg, Audience::Unisex)
    .await
    .unwrap_err();

    assert!(matches!(
        error,
        PipelineError::Timeout {
            stage: "understanding"
        }
    ));
}

#[tokio::test]
async fn other_market_items_are_not_recommended() {
    let index = MemoryIndex::default();
    let mut us_only = party_shirt();
    us_only.market = Market::Us;

    let sync = CatalogSyncService::new(FakeEmbedder::default(), index.clone());
    sync.on_item_saved(&us_only).await;

    let outcome = pipeline(
        ScriptedChat::default().with_extraction(json!({"occasion": ["wedding"]})),
        index,
        MemoryCatalog::new(vec![us_only]),
    )
    .run("something for a wedding", Market::Kg, Audience::Unisex)
    .await
    .unwrap();

    // The vector lives only in the US namespace and the attribute
    // fallback filters by market, so a KG request finds nothing
    assert_eq!(outcome.status, PipelineStatus::NoMatch);
}
