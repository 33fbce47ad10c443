use log::warn;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use super::{PipelineError, PipelineState, RecommendationPipeline, CANDIDATE_LIMIT, SELECTION_LIMIT};
use crate::ml::Embedder;
use crate::models::filter::{OCCASION_VALUES, SEASON_VALUES, STYLE_VALUES};
use crate::models::{Candidate, Market, Product, RequirementFilter};
use crate::services::catalog::CatalogStore;
use crate::services::llm::{ChatMessage, ChatModel, LlmError};
use crate::services::vector_index::{MetadataFilter, QueryHit, VectorIndex};

/// Shown when search finds nothing; honest instead of fabricated.
pub const NO_MATCH_MESSAGE: &str = "I couldn't find products that match your needs right now. \
     Could you share more details about what you're looking for? For example, a preferred \
     style, colors, or price range?";

/// How many candidates the ranking prompt includes.
const RANKING_PROMPT_LIMIT: usize = 15;

const UNDERSTANDING_SYSTEM: &str = "You are a fashion shopping assistant helping users find \
     the right outfit.\n\nAnalyze the user's request and understand:\n- What's the occasion? \
     (party, work, wedding, casual, date, gym, etc.)\n- What's the style preference? (casual, \
     formal, elegant, sporty, etc.)\n- Any urgency? (tonight, this weekend, next month)\n- Any \
     specific needs? (comfortable, warm, breathable, etc.)\n\nRespond with a brief \
     acknowledgment showing you understand their needs.";

static EXTRACTION_SYSTEM: Lazy<String> = Lazy::new(|| {
    format!(
        "Extract product search parameters from the conversation.\n\n\
         Return a JSON object with these fields:\n\
         - occasion: array of occasions, drawn from: {}\n\
         - style: array of styles, drawn from: {}\n\
         - season: array of seasons, drawn from: {}\n\
         - colors: array of color names, optional\n\
         - price_min: minimum price in local currency, optional\n\
         - price_max: maximum price in local currency, optional\n\n\
         If something is not mentioned, use an empty array or null.\n\
         Be generous with tags and include related concepts.\n\n\
         Example: \"I have a party tonight\" -> occasion: [\"party\", \"night_out\"], \
         style: [\"trendy\", \"elegant\"]",
        OCCASION_VALUES.join(", "),
        STYLE_VALUES.join(", "),
        SEASON_VALUES.join(", ")
    )
});

const RANKING_SYSTEM: &str = "You are a fashion expert selecting the best products for a \
     customer.\n\nEvaluate the available products on:\n1. Occasion match - does it fit the \
     event?\n2. Style match - does it match the stated preference?\n3. Quality - rating and \
     brand\n4. Value - price appropriate for the occasion\n\nSelect the TOP 3-5 matches.\n\n\
     Return a JSON object with:\n- product_ids: array of selected product ids, best first. \
     Only use ids from the list you were given.\n- confidence: number between 0 and 1 for how \
     good the matches are\n- reasoning: brief explanation of the selection";

const EXPLANATION_SYSTEM: &str = "You are a friendly fashion shopping assistant.\n\nWrite an \
     engaging recommendation that:\n1. Acknowledges what the customer needs\n2. Mentions every \
     recommended product by name and why it fits\n3. Highlights key details such as style, \
     occasion fit, rating and price\n4. Stays grounded in the product details you were given - \
     do not invent features\n5. Keeps it conversational, two to three sentences per product";

#[derive(Debug, Deserialize)]
struct RankingOutput {
    #[serde(default)]
    product_ids: Vec<i64>,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
}

fn default_confidence() -> f64 {
    0.5
}

impl<L, E, V, C> RecommendationPipeline<L, E, V, C>
where
    L: ChatModel,
    E: Embedder,
    V: VectorIndex,
    C: CatalogStore,
{
    /// Stage 1: turn the raw request into an intent summary appended to
    /// the conversation. Never touches the catalog.
    pub(super) async fn understand(&self, state: &mut PipelineState) -> Result<(), LlmError> {
        let reply = self
            .chat
            .complete(
                UNDERSTANDING_SYSTEM,
                &[ChatMessage::user(state.query.clone())],
                0.7,
            )
            .await?;

        state.conversation.push(ChatMessage::user(state.query.clone()));
        state.conversation.push(ChatMessage::assistant(reply));
        Ok(())
    }

    /// Stage 2: structured extraction of the requirement filter from the
    /// conversation. Output is sanitized against the pinned vocabulary;
    /// an all-empty filter is a valid "broad search".
    pub(super) async fn extract(&self, state: &mut PipelineState) -> Result<(), LlmError> {
        let value = self
            .chat
            .complete_json(&EXTRACTION_SYSTEM, &state.conversation, 0.0)
            .await?;

        let raw: RequirementFilter = serde_json::from_value(value)
            .map_err(|e| LlmError::InvalidResponse(format!("bad extraction shape: {}", e)))?;

        state.requirements = raw.sanitized();
        Ok(())
    }

    /// Stage 3: semantic search with attribute fallback.
    ///
    /// The vector index is queried in the requester's market namespace and
    /// the shared ALL namespace. When the index is unreachable, or simply
    /// has no matches, the catalog attribute search takes over so an index
    /// outage is never visible to the end user. Zero candidates from both
    /// paths is a valid outcome handled by the orchestrator.
    pub(super) async fn search(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let semantic_query = build_semantic_query(&state.query, &state.requirements);
        let filter = MetadataFilter {
            audience: state.audience,
        };

        let hits = match self.embedder.embed(&semantic_query).await {
            Ok(vector) => {
                let market_ns = state.market.as_str();
                let shared_ns = Market::All.as_str();
                match futures::try_join!(
                    self.index.query(market_ns, &vector, CANDIDATE_LIMIT, &filter),
                    self.index.query(shared_ns, &vector, CANDIDATE_LIMIT, &filter),
                ) {
                    Ok((market_hits, shared_hits)) => merge_hits(market_hits, shared_hits),
                    Err(e) => {
                        warn!("Vector query failed, using attribute search: {}", e);
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                warn!("Query encoding failed, using attribute search: {}", e);
                Vec::new()
            }
        };

        if !hits.is_empty() {
            let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
            let products = self
                .catalog
                .fetch_active_by_ids(&ids)
                .await
                .map_err(|e| PipelineError::Search {
                    message: e.to_string(),
                })?;

            let mut by_id: HashMap<i64, Product> =
                products.into_iter().map(|p| (p.id, p)).collect();
            state.candidates = hits
                .iter()
                .filter_map(|hit| {
                    by_id.remove(&hit.id).map(|product| Candidate {
                        product,
                        score: Some(hit.score),
                    })
                })
                .collect();

            if !state.candidates.is_empty() {
                return Ok(());
            }
        }

        let products = self
            .catalog
            .search_by_attributes(
                &state.requirements,
                state.market,
                state.audience,
                CANDIDATE_LIMIT as i64,
            )
            .await
            .map_err(|e| PipelineError::Search {
                message: e.to_string(),
            })?;

        state.candidates = products
            .into_iter()
            .map(|product| Candidate {
                product,
                score: None,
            })
            .collect();
        Ok(())
    }

    /// Stage 4: model-judged ranking. The contract is enforced here, not
    /// trusted: only known candidate ids survive, at most five, never an
    /// empty selection while candidates exist.
    pub(super) async fn rank(&self, state: &mut PipelineState) -> Result<(), LlmError> {
        let user = format!(
            "User asked: {}\n\nRequirements:\n- Occasions: {}\n- Styles: {}\n- Seasons: {}\n\
             - Market: {}\n\nAvailable products:\n{}\n\nSelect the best 3-5 products.",
            state.query,
            join_or_any(&state.requirements.occasion),
            join_or_any(&state.requirements.style),
            join_or_any(&state.requirements.season),
            state.market,
            format_candidates(&state.candidates),
        );

        let value = self
            .chat
            .complete_json(RANKING_SYSTEM, &[ChatMessage::user(user)], 0.3)
            .await?;

        let output: RankingOutput = serde_json::from_value(value)
            .map_err(|e| LlmError::InvalidResponse(format!("bad ranking shape: {}", e)))?;

        let (selected, confidence) = enforce_ranking_contract(output, &state.candidates);
        state.selected = selected;
        state.confidence = confidence;
        Ok(())
    }

    /// Stage 5: natural-language explanation grounded in the selected
    /// items' metadata.
    pub(super) async fn explain(&self, state: &PipelineState) -> Result<String, LlmError> {
        let user = format!(
            "User asked: {}\n\nRecommended products:\n{}\n\nWrite a friendly recommendation \
             that mentions each product.",
            state.query,
            format_selected(&state.selected),
        );

        self.chat
            .complete(EXPLANATION_SYSTEM, &[ChatMessage::user(user)], 0.7)
            .await
    }
}

/// Concatenate the requirement fields into a natural-language query, the
/// same shape the indexed item text was written in.
fn build_semantic_query(query: &str, filter: &RequirementFilter) -> String {
    let mut parts = vec![query.trim().to_string()];

    if !filter.occasion.is_empty() {
        parts.push(format!("for {}", filter.occasion.join(", ")));
    }
    if !filter.style.is_empty() {
        parts.push(format!("with {} style", filter.style.join(", ")));
    }
    if !filter.season.is_empty() {
        parts.push(format!("suitable for {}", filter.season.join(", ")));
    }

    parts.join(" ")
}

/// Merge the market-namespace and shared-namespace hits into one list,
/// best score first, deduplicated by id.
fn merge_hits(market_hits: Vec<QueryHit>, shared_hits: Vec<QueryHit>) -> Vec<QueryHit> {
    let mut merged: Vec<QueryHit> = market_hits.into_iter().chain(shared_hits).collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen = HashSet::new();
    merged.retain(|hit| seen.insert(hit.id));
    merged.truncate(CANDIDATE_LIMIT);
    merged
}

/// Apply the ranking contract to raw model output: ids must come from the
/// candidate list, capped at five; an unusable selection falls back to the
/// head of the candidates so a non-empty candidate list always yields a
/// non-empty selection.
fn enforce_ranking_contract(
    output: RankingOutput,
    candidates: &[Candidate],
) -> (Vec<Product>, f32) {
    let mut seen = HashSet::new();
    let mut selected: Vec<Product> = output
        .product_ids
        .iter()
        .filter(|id| seen.insert(**id))
        .filter_map(|id| {
            candidates
                .iter()
                .find(|c| c.product.id == *id)
                .map(|c| c.product.clone())
        })
        .take(SELECTION_LIMIT)
        .collect();

    if selected.is_empty() {
        selected = candidates
            .iter()
            .take(SELECTION_LIMIT)
            .map(|c| c.product.clone())
            .collect();
    }

    (selected, (output.confidence as f32).clamp(0.0, 1.0))
}

fn join_or_any(values: &[String]) -> String {
    if values.is_empty() {
        "any".to_string()
    } else {
        values.join(", ")
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn format_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .take(RANKING_PROMPT_LIMIT)
        .map(|c| {
            let p = &c.product;
            format!(
                "ID: {}\nName: {}\nBrand: {}\nPrice: {:.2}\nDescription: {}\nOccasions: {}\n\
                 Styles: {}\nRating: {}",
                p.id,
                p.name,
                p.brand.as_deref().unwrap_or("-"),
                p.price,
                truncate_chars(p.description.as_deref().unwrap_or(""), 200),
                p.occasion_tags.join(", "),
                p.style_tags.join(", "),
                p.rating,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_selected(products: &[Product]) -> String {
    products
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let tags = |tags: &[String]| {
                tags.iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!(
                "{}. {}{}\n   Price: {:.2}\n   Description: {}\n   Perfect for: {}\n   \
                 Style: {}\n   Rating: {}/5",
                i + 1,
                p.name,
                p.brand
                    .as_deref()
                    .map(|b| format!(" by {}", b))
                    .unwrap_or_default(),
                p.price,
                truncate_chars(p.description.as_deref().unwrap_or(""), 150),
                tags(&p.occasion_tags),
                tags(&p.style_tags),
                p.rating,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Plain summary used when the explanation model is unavailable. Keeps the
/// already-computed selection and still mentions every item by name.
pub(super) fn fallback_explanation(products: &[Product]) -> String {
    let lines: Vec<String> = products
        .iter()
        .map(|p| {
            let brand = p
                .brand
                .as_deref()
                .map(|b| format!(" by {}", b))
                .unwrap_or_default();
            format!("{}{} ({:.2}, rated {}/5)", p.name, brand, p.price, p.rating)
        })
        .collect();

    format!(
        "Based on your request, here are some options that should work: {}.",
        lines.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::product::test_product;

    fn candidates(ids: &[i64]) -> Vec<Candidate> {
        ids.iter()
            .map(|id| Candidate {
                product: test_product(*id, &format!("Product {}", id)),
                score: None,
            })
            .collect()
    }

    #[test]
    fn semantic_query_includes_requirement_fields() {
        let filter = RequirementFilter {
            occasion: vec!["party".to_string(), "night_out".to_string()],
            style: vec!["elegant".to_string()],
            season: vec!["summer".to_string()],
            ..Default::default()
        };

        let query = build_semantic_query("I have a party tonight", &filter);
        assert_eq!(
            query,
            "I have a party tonight for party, night_out with elegant style suitable for summer"
        );
    }

    #[test]
    fn semantic_query_with_empty_filter_is_the_raw_query() {
        let query = build_semantic_query("something nice", &RequirementFilter::default());
        assert_eq!(query, "something nice");
    }

    #[test]
    fn ranking_contract_drops_fabricated_ids() {
        let output = RankingOutput {
            product_ids: vec![99, 2, 98],
            confidence: 0.9,
            reasoning: String::new(),
        };

        let (selected, confidence) = enforce_ranking_contract(output, &candidates(&[1, 2, 3]));
        let ids: Vec<i64> = selected.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2]);
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn ranking_contract_caps_selection_at_five() {
        let output = RankingOutput {
            product_ids: vec![1, 2, 3, 4, 5, 6, 7],
            confidence: 1.0,
            reasoning: String::new(),
        };

        let (selected, _) =
            enforce_ranking_contract(output, &candidates(&[1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(selected.len(), 5);
    }

    #[test]
    fn ranking_contract_never_selects_nothing_from_candidates() {
        let output = RankingOutput {
            product_ids: vec![],
            confidence: 0.2,
            reasoning: String::new(),
        };

        let (selected, _) = enforce_ranking_contract(output, &candidates(&[1, 2]));
        let ids: Vec<i64> = selected.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn ranking_contract_clamps_confidence() {
        let output = RankingOutput {
            product_ids: vec![1],
            confidence: 3.5,
            reasoning: String::new(),
        };

        let (_, confidence) = enforce_ranking_contract(output, &candidates(&[1]));
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn merge_prefers_higher_scores_and_dedupes() {
        let market = vec![
            QueryHit { id: 1, score: 0.9 },
            QueryHit { id: 2, score: 0.5 },
        ];
        let shared = vec![
            QueryHit { id: 3, score: 0.7 },
            QueryHit { id: 1, score: 0.6 },
        ];

        let merged = merge_hits(market, shared);
        let ids: Vec<i64> = merged.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn fallback_explanation_mentions_every_item() {
        let products = vec![
            test_product(1, "Party Shirt"),
            test_product(2, "Evening Dress"),
        ];

        let text = fallback_explanation(&products);
        assert!(text.contains("Party Shirt"));
        assert!(text.contains("Evening Dress"));
    }
}
