use log::{info, warn};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;
use crate::ml::Embedder;
use crate::models::{Audience, Candidate, Market, Product, RequirementFilter};
use crate::services::catalog::CatalogStore;
use crate::services::llm::{ChatMessage, ChatModel, LlmError};
use crate::services::vector_index::VectorIndex;

mod stages;

pub use stages::NO_MATCH_MESSAGE;

/// Maximum candidates kept by the search stage.
pub const CANDIDATE_LIMIT: usize = 20;

/// Maximum items in the final selection.
pub const SELECTION_LIMIT: usize = 5;

/// Confidence reported when ranking had to fall back to search order.
const DEGRADED_CONFIDENCE: f32 = 0.5;

/// Progress of one recommendation request. Transitions are strictly
/// forward; a request is single-pass with no internal retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Received,
    Understood,
    Extracted,
    Searched,
    Ranked,
    Explained,
    Done,
    /// Search produced no candidates; ranking and explanation are skipped.
    NoMatch,
    Failed,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("assistant unavailable during {stage}: {message}")]
    AssistantUnavailable { stage: &'static str, message: String },

    #[error("{stage} stage timed out")]
    Timeout { stage: &'static str },

    #[error("search failed: {message}")]
    Search { message: String },
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AssistantUnavailable { .. } => {
                ApiError::AssistantUnavailable(err.to_string())
            }
            PipelineError::Timeout { .. } => ApiError::StageTimeout(err.to_string()),
            PipelineError::Search { message } => ApiError::DatabaseError(message),
        }
    }
}

/// Request-scoped state. Owned by the running pipeline, mutated only by
/// the stage currently executing, discarded when the request completes.
pub(crate) struct PipelineState {
    pub id: Uuid,
    pub query: String,
    pub market: Market,
    pub audience: Audience,
    pub conversation: Vec<ChatMessage>,
    pub requirements: RequirementFilter,
    pub candidates: Vec<Candidate>,
    pub selected: Vec<Product>,
    pub confidence: f32,
    pub explanation: String,
    pub status: PipelineStatus,
}

impl PipelineState {
    fn new(query: &str, market: Market, audience: Audience) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            market,
            audience,
            conversation: Vec::new(),
            requirements: RequirementFilter::default(),
            candidates: Vec::new(),
            selected: Vec::new(),
            confidence: 0.0,
            explanation: String::new(),
            status: PipelineStatus::Received,
        }
    }
}

/// Final result of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    pub items: Vec<Product>,
    pub explanation: String,
    pub confidence: f32,
    pub requirements: RequirementFilter,
}

/// Sequences the five stages over the external collaborators and applies
/// the fallback policy:
///
/// - understanding/extraction failures abort the request with a
///   recoverable error (no guessed recommendation),
/// - index unavailability falls back to attribute search transparently,
/// - ranking/explanation failures degrade instead of aborting, because
///   useful candidates already exist,
/// - zero candidates end in `NoMatch`, which is not an error.
///
/// Each stage runs under a timeout; exceeding it fails the request with a
/// `timeout` reason distinct from other failures. Dropping the returned
/// future between stages cancels the run: no further stage calls are
/// issued, and the result of any in-flight external call is discarded.
pub struct RecommendationPipeline<L, E, V, C> {
    pub(crate) chat: L,
    pub(crate) embedder: E,
    pub(crate) index: V,
    pub(crate) catalog: C,
    stage_timeout: Duration,
}

impl<L, E, V, C> RecommendationPipeline<L, E, V, C>
where
    L: ChatModel,
    E: Embedder,
    V: VectorIndex,
    C: CatalogStore,
{
    pub fn new(chat: L, embedder: E, index: V, catalog: C, stage_timeout: Duration) -> Self {
        Self {
            chat,
            embedder,
            index,
            catalog,
            stage_timeout,
        }
    }

    pub async fn run(
        &self,
        query: &str,
        market: Market,
        audience: Audience,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut state = PipelineState::new(query, market, audience);
        info!(
            "[{}] Recommendation request: query={:?}, market={}, audience={}",
            state.id, state.query, market, audience
        );

        let timeout = self.stage_timeout;

        if let Err(e) = require_stage(
            "understanding",
            tokio::time::timeout(timeout, self.understand(&mut state)).await,
        ) {
            return Err(fail(&mut state, e));
        }
        state.status = PipelineStatus::Understood;

        if let Err(e) = require_stage(
            "extraction",
            tokio::time::timeout(timeout, self.extract(&mut state)).await,
        ) {
            return Err(fail(&mut state, e));
        }
        state.status = PipelineStatus::Extracted;
        info!("[{}] Extracted requirements: {:?}", state.id, state.requirements);

        match tokio::time::timeout(timeout, self.search(&mut state)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(fail(&mut state, e)),
            Err(_) => {
                return Err(fail(&mut state, PipelineError::Timeout { stage: "search" }));
            }
        }
        state.status = PipelineStatus::Searched;
        info!("[{}] Search produced {} candidates", state.id, state.candidates.len());

        if state.candidates.is_empty() {
            state.status = PipelineStatus::NoMatch;
            return Ok(PipelineOutcome {
                status: PipelineStatus::NoMatch,
                items: Vec::new(),
                explanation: NO_MATCH_MESSAGE.to_string(),
                confidence: 0.0,
                requirements: state.requirements,
            });
        }

        match tokio::time::timeout(timeout, self.rank(&mut state)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("[{}] Ranking degraded to search order: {}", state.id, e);
                self.degrade_selection(&mut state);
            }
            Err(_) => {
                warn!("[{}] Ranking timed out, degrading to search order", state.id);
                self.degrade_selection(&mut state);
            }
        }
        state.status = PipelineStatus::Ranked;

        match tokio::time::timeout(timeout, self.explain(&state)).await {
            Ok(Ok(text)) => state.explanation = text,
            Ok(Err(e)) => {
                warn!("[{}] Explanation degraded to summary: {}", state.id, e);
                state.explanation = stages::fallback_explanation(&state.selected);
            }
            Err(_) => {
                warn!("[{}] Explanation timed out, using summary", state.id);
                state.explanation = stages::fallback_explanation(&state.selected);
            }
        }
        state.status = PipelineStatus::Explained;

        info!(
            "[{}] Recommendation ready: {} items, confidence {:.2}",
            state.id,
            state.selected.len(),
            state.confidence
        );

        Ok(PipelineOutcome {
            status: PipelineStatus::Done,
            items: state.selected,
            explanation: state.explanation,
            confidence: state.confidence,
            requirements: state.requirements,
        })
    }

    /// Ranking fallback: keep the head of the candidate list in search
    /// order so the caller still gets usable results.
    fn degrade_selection(&self, state: &mut PipelineState) {
        state.selected = state
            .candidates
            .iter()
            .take(SELECTION_LIMIT)
            .map(|c| c.product.clone())
            .collect();
        state.confidence = DEGRADED_CONFIDENCE;
    }
}

/// Record the terminal failure, noting which state the request was in
/// when it died.
fn fail(state: &mut PipelineState, err: PipelineError) -> PipelineError {
    warn!("[{}] Pipeline failed from {:?}: {}", state.id, state.status, err);
    state.status = PipelineStatus::Failed;
    err
}

/// Map an understanding/extraction outcome onto the abort policy: these
/// stages have no useful partial result, so any failure ends the request.
fn require_stage<T>(
    stage: &'static str,
    outcome: Result<Result<T, LlmError>, tokio::time::error::Elapsed>,
) -> Result<T, PipelineError> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(LlmError::Timeout)) | Err(_) => Err(PipelineError::Timeout { stage }),
        Ok(Err(e)) => Err(PipelineError::AssistantUnavailable {
            stage,
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests;
