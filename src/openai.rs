//! Minimal client for OpenAI-compatible `/v1/chat/completions`.
//!
//! Shared by the vision describer and the answer completer. It makes one
//! request per call; retrying is left to [`crate::retry::with_retry`] at the
//! call site.

use std::time::Duration;

use crate::error::{is_transient_reqwest, is_transient_status, RagError, Result};

pub(crate) const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// A failed chat call, before it is tagged as a vision or completion error.
#[derive(Debug)]
pub(crate) struct ChatFailure {
    pub message: String,
    pub transient: bool,
}

pub(crate) struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ChatClient {
    /// Fails with a configuration error when `OPENAI_API_KEY` is missing.
    pub fn new(base_url: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("failed to build HTTP client: {}", e)))?;
        let base = base_url.unwrap_or(OPENAI_DEFAULT_URL).trim_end_matches('/');
        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base),
            api_key,
        })
    }

    /// Send `body` and return the first choice's message content.
    pub async fn chat(&self, body: &serde_json::Value) -> std::result::Result<String, ChatFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ChatFailure {
                message: format!("request failed: {}", e),
                transient: is_transient_reqwest(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ChatFailure {
                message: format!("API error {}: {}", status, body_text),
                transient: is_transient_status(status),
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| ChatFailure {
            message: format!("invalid response body: {}", e),
            transient: false,
        })?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> std::result::Result<String, ChatFailure> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ChatFailure {
            message: "invalid response: missing choices[0].message.content".into(),
            transient: false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  Output grew 5%.\n"}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Output grew 5%.");
    }

    #[test]
    fn missing_content_is_permanent() {
        let json = serde_json::json!({"choices": []});
        let err = parse_chat_response(&json).unwrap_err();
        assert!(!err.transient);
    }
}
