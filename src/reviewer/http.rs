//! OpenAI-compatible chat-completions reviewer.
//!
//! Sends: POST {endpoint} with `{model, messages, max_tokens}` and reads
//! `choices[0].message.content` from the reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::prompt;
use super::{Reviewer, ReviewerError};
use crate::config::ReviewerConfig;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Reviewer backed by an HTTP chat-completions API.
pub struct HttpReviewer {
    client: Client,
    config: ReviewerConfig,
    api_key: Option<String>,
}

impl HttpReviewer {
    pub fn new(config: ReviewerConfig) -> Result<Self, ReviewerError> {
        let client = Client::builder()
            .user_agent(concat!("codewise/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let api_key = config.api_key_env.as_deref().and_then(|var| {
            let key = std::env::var(var).ok().filter(|k| !k.is_empty());
            if key.is_none() {
                warn!(env = var, "API key variable not set, sending unauthenticated requests");
            }
            key
        });

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, ReviewerError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.config.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let body = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(endpoint = %self.config.endpoint, model = %self.config.model, "sending review request");
        let response = request.send().await.map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, detail));
        }

        let reply: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ReviewerError::Timeout
            } else {
                ReviewerError::Malformed(e.to_string())
            }
        })?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| ReviewerError::Malformed("no message content in reply".to_string()))
    }
}

fn map_send_error(e: reqwest::Error) -> ReviewerError {
    if e.is_timeout() {
        ReviewerError::Timeout
    } else {
        ReviewerError::Network(e)
    }
}

fn status_error(status: StatusCode, detail: String) -> ReviewerError {
    let detail = if detail.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), detail.trim())
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ReviewerError::Unauthorized(detail),
        StatusCode::TOO_MANY_REQUESTS => ReviewerError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ReviewerError::Timeout,
        _ => ReviewerError::Unavailable(detail),
    }
}

#[async_trait]
impl Reviewer for HttpReviewer {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn critique(
        &self,
        definition: &str,
        usage_examples: &[String],
    ) -> Result<String, ReviewerError> {
        self.complete(&prompt::critique_prompt(definition, usage_examples))
            .await
    }

    async fn improve(&self, definition: &str, critique: &str) -> Result<String, ReviewerError> {
        self.complete(&prompt::improve_prompt(definition, critique))
            .await
    }

    async fn recritique(
        &self,
        original: &str,
        improved: &str,
        original_critique: &str,
    ) -> Result<String, ReviewerError> {
        self.complete(&prompt::recritique_prompt(
            original,
            improved,
            original_critique,
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            ReviewerError::Unauthorized(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "nope".to_string()),
            ReviewerError::Unauthorized(d) if d == "HTTP 403: nope"
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ReviewerError::RateLimited
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            ReviewerError::Unavailable(d) if d == "HTTP 502"
        ));
    }

    #[test]
    fn test_reply_content_extraction() {
        let reply: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"overall_score\":7}"}}]}"#,
        )
        .unwrap();
        let content = reply.choices[0]
            .message
            .as_ref()
            .and_then(|m| m.content.clone());
        assert_eq!(content.as_deref(), Some("{\"overall_score\":7}"));

        let empty: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.choices.is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 16,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 16);
    }

    #[test]
    fn test_new_without_key() {
        let config = ReviewerConfig {
            api_key_env: Some("CODEWISE_TEST_KEY_THAT_IS_NOT_SET".to_string()),
            ..ReviewerConfig::default()
        };
        let reviewer = HttpReviewer::new(config).unwrap();
        assert!(reviewer.api_key.is_none());
        assert_eq!(reviewer.name(), ReviewerConfig::default().model);
    }
}
