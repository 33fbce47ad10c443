use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 10;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("assistant unavailable: {0}")]
    Unavailable(String),

    #[error("assistant call timed out")]
    Timeout,

    #[error("invalid assistant response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the request-scoped conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Black-box conversational model. Stages only depend on the input/output
/// contract: free text in, free text or schema-shaped JSON out.
pub trait ChatModel: Send + Sync {
    /// Plain completion.
    fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Completion constrained to a single JSON object. Output is parsed
    /// here so callers always receive valid JSON, never raw model text.
    fn complete_json(
        &self,
        system: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> impl Future<Output = Result<serde_json::Value, LlmError>> + Send;

    /// Cheap reachability probe for health checks.
    fn ping(&self) -> impl Future<Output = Result<(), LlmError>> + Send;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Chat client for an OpenAI-compatible completions endpoint.
#[derive(Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| LlmError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    async fn chat(
        &self,
        system: &str,
        messages: &[ChatMessage],
        temperature: f32,
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let mut wire_messages = vec![json!({"role": "system", "content": system})];
        for message in messages {
            wire_messages.push(json!({"role": message.role, "content": message.content}));
        }

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": temperature,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Unavailable(format!("status {}: {}", status, text)));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("empty completion".to_string()))?;

        debug!("Completion of {} chars from {}", content.len(), self.model);
        Ok(content)
    }
}

impl ChatModel for OpenAiChat {
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, LlmError> {
        self.chat(system, messages, temperature, false).await
    }

    async fn complete_json(
        &self,
        system: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<serde_json::Value, LlmError> {
        let content = self.chat(system, messages, temperature, true).await?;
        parse_json_content(&content)
    }

    async fn ping(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Unavailable(e.to_string())
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!(
                "status {}",
                response.status()
            )))
        }
    }
}

/// Parse model output into JSON, tolerating a markdown code fence around
/// the object. Some models wrap JSON-mode output anyway.
pub fn parse_json_content(content: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = content.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    serde_json::from_str(inner).map_err(|e| LlmError::InvalidResponse(format!("not JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let value = parse_json_content(r#"{"occasion": ["party"]}"#).unwrap();
        assert_eq!(value["occasion"][0], "party");
    }

    #[test]
    fn parses_fenced_json() {
        let value = parse_json_content("```json\n{\"confidence\": 0.8}\n```").unwrap();
        assert_eq!(value["confidence"], 0.8);
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_json_content("certainly! here are the results").is_err());
    }
}
