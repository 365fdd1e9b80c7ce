//! Anthropic Messages API client, used as the outreach text generator.
//!
//! Retries, timeouts and the circuit breaker belong to the generation stage executor; one
//! `generate` call here is exactly one HTTP request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::http::{classify_status, retry_after_header};
use crate::clients::{ExternalError, TextGenerator};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
pub const MODEL: &str = "claude-sonnet-4-5";
/// Outreach drafts are short; this leaves room for a LinkedIn note or a full email.
const DRAFT_TOKEN_LIMIT: u32 = 600;

#[derive(Serialize)]
struct DraftRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Turn<'a>; 1],
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl Completion {
    fn into_text(self) -> String {
        self.content
            .into_iter()
            .filter_map(|block| match block {
                Block::Text { text } => Some(text),
                Block::Other => None,
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
    url: String,
}

impl LlmClient {
    pub fn new(api_key: String, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder().timeout(request_timeout).build()?,
            api_key,
            url: MESSAGES_URL.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, ExternalError> {
        let body = DraftRequest {
            model: MODEL,
            max_tokens: DRAFT_TOKEN_LIMIT,
            system: context,
            messages: [Turn {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExternalError::Transient(format!("generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&raw)
                .map(|envelope| envelope.error.message)
                .unwrap_or(raw);
            return Err(classify_status(status, retry_after, message));
        }

        let completion: Completion = response
            .json()
            .await
            .map_err(|e| ExternalError::Transient(format!("unreadable completion: {e}")))?;
        debug!(stop_reason = ?completion.stop_reason, "Draft generated");

        let text = completion.into_text();
        let text = text.trim();
        if text.is_empty() {
            return Err(ExternalError::Transient("empty completion".to_string()));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_keeps_only_text_blocks() {
        let completion: Completion = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "Hi Ada, "},
                    {"type": "tool_use", "id": "t1", "name": "noop", "input": {}},
                    {"type": "text", "text": "we are hiring."}
                ],
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();
        assert_eq!(completion.into_text(), "Hi Ada, we are hiring.");
    }

    #[test]
    fn test_completion_without_blocks_is_empty() {
        let completion: Completion = serde_json::from_str(r#"{"content": []}"#).unwrap();
        assert!(completion.into_text().is_empty());
    }
}
