//! Chat-completion API client.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::CompletionOptions;
use crate::Result;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Attempts made when the API reports a rate limit.
const RATE_LIMIT_ATTEMPTS: u32 = 3;

/// Why a completion did not come back.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited after {0} attempts")]
    RateLimited(u32),

    #[error("response carried no completion text")]
    Empty,
}

/// Something that can answer a prompt. The poll loop is generic over
/// this so exchanges can be tested against fixtures.
pub trait Respond {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError>;
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct CompletionClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl CompletionClient {
    /// Build a client from config, reading the API key from the
    /// environment.
    pub fn from_env(options: &CompletionOptions) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| crate::Error::Config(format!("{API_KEY_ENV} is not set")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: options.model.clone(),
            base_url: options.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Respond for CompletionClient {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        for attempt in 1..=RATE_LIMIT_ATTEMPTS {
            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            if status.as_u16() == 429 {
                let wait = Duration::from_secs(5 * attempt as u64);
                warn!(
                    "completion API rate limited, waiting {wait:?} (attempt {attempt}/{RATE_LIMIT_ATTEMPTS})"
                );
                tokio::time::sleep(wait).await;
                continue;
            }
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(CompletionError::Api {
                    status: status.as_u16(),
                    message: head(&message),
                });
            }

            let parsed: ChatResponse = resp.json().await?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or(CompletionError::Empty)?;
            debug!("completion received ({} chars)", content.chars().count());
            return Ok(content);
        }
        Err(CompletionError::RateLimited(RATE_LIMIT_ATTEMPTS))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Error bodies can be pages long; keep the useful head.
fn head(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        let mut out: String = trimmed.chars().take(200).collect();
        out.push('…');
        out
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_truncates_long_bodies() {
        let long = "x".repeat(500);
        let out = head(&long);
        assert_eq!(out.chars().count(), 201);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn head_keeps_short_bodies() {
        assert_eq!(head("  oops  "), "oops");
    }

    #[test]
    fn completion_response_parses() {
        let raw = r#"{
            "choices": [
                { "message": { "role": "assistant", "content": " 4 " } }
            ]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some(" 4 ")
        );
    }
}
