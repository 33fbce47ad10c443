use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ErrorResponse;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Assistant unavailable: {0}")]
    AssistantUnavailable(String),

    #[error("Stage timed out: {0}")]
    StageTimeout(String),

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Embedding model error: {0}")]
    ModelError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    /// Machine-readable reason callers can branch on (retry vs surface).
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::AssistantUnavailable(_) => "assistant_unavailable",
            ApiError::StageTimeout(_) => "timeout",
            ApiError::IndexUnavailable(_) => "index_unavailable",
            ApiError::DatabaseError(_) => "database_error",
            ApiError::ModelError(_) => "model_error",
            ApiError::SerializationError(_) => "serialization_error",
            ApiError::ExternalServiceError(_) => "external_service_error",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Message safe to show an end user. Infrastructure details stay in the
    /// logs; the client only sees the polite version.
    fn public_message(&self) -> String {
        match self {
            ApiError::InvalidInput(msg) => msg.clone(),
            ApiError::AssistantUnavailable(_) | ApiError::StageTimeout(_) => {
                "The assistant is temporarily unavailable. Please try again.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let body = ErrorResponse {
            error: self.public_message(),
            reason: self.reason().to_string(),
        };

        match self {
            ApiError::InvalidInput(_) => HttpResponse::BadRequest().json(body),
            ApiError::AssistantUnavailable(_) => HttpResponse::ServiceUnavailable().json(body),
            ApiError::StageTimeout(_) => HttpResponse::GatewayTimeout().json(body),
            _ => HttpResponse::InternalServerError().json(body),
        }
    }
}

impl From<crate::ml::EmbedError> for ApiError {
    fn from(err: crate::ml::EmbedError) -> Self {
        ApiError::ModelError(err.to_string())
    }
}

impl From<crate::services::vector_index::IndexError> for ApiError {
    fn from(err: crate::services::vector_index::IndexError) -> Self {
        match err {
            crate::services::vector_index::IndexError::Unavailable(msg) => {
                ApiError::IndexUnavailable(msg)
            }
            other => ApiError::ExternalServiceError(other.to_string()),
        }
    }
}

impl From<crate::services::llm::LlmError> for ApiError {
    fn from(err: crate::services::llm::LlmError) -> Self {
        match err {
            crate::services::llm::LlmError::Timeout => ApiError::StageTimeout(err.to_string()),
            other => ApiError::AssistantUnavailable(other.to_string()),
        }
    }
}

impl From<crate::services::catalog::CatalogError> for ApiError {
    fn from(err: crate::services::catalog::CatalogError) -> Self {
        ApiError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::ExternalServiceError(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}
