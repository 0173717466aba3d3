//! Visual description of rendered PDF pages.

use async_trait::async_trait;
use base64::Engine;

use crate::config::VisionConfig;
use crate::error::{RagError, Result};
use crate::openai::ChatClient;

/// Fixed instruction sent with every page image.
pub const DESCRIBE_INSTRUCTION: &str = "You are analyzing one page of a PDF document. \
Describe ALL visual content on this page exhaustively: charts, graphs, tables, diagrams, \
maps, images, and any text that appears inside them. For charts and tables, list the \
title, axes, categories, units, and every value you can read. Translate any text that is \
not in English and keep the original terms in parentheses. Be objective, do not \
interpret or speculate, and write in plain, search-friendly sentences. If the page has \
no visual elements, reply with an empty string.";

#[async_trait]
pub trait VisionDescriber: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    /// Describe a PNG-encoded page image.
    async fn describe(&self, png: &[u8]) -> Result<String>;
}

/// Never calls out; every page gets an empty description.
pub struct DisabledVision;

#[async_trait]
impl VisionDescriber for DisabledVision {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn describe(&self, _png: &[u8]) -> Result<String> {
        Ok(String::new())
    }
}

pub struct OpenAiVision {
    chat: ChatClient,
    model: String,
    max_tokens: u32,
}

impl OpenAiVision {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        Ok(Self {
            chat: ChatClient::new(config.url.as_deref(), config.timeout_secs)?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

fn request_body(model: &str, max_tokens: u32, png: &[u8]) -> serde_json::Value {
    let data_url = format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    );
    serde_json::json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": DESCRIBE_INSTRUCTION},
                {"type": "image_url", "image_url": {"url": data_url, "detail": "high"}}
            ]
        }]
    })
}

#[async_trait]
impl VisionDescriber for OpenAiVision {
    async fn describe(&self, png: &[u8]) -> Result<String> {
        let body = request_body(&self.model, self.max_tokens, png);
        self.chat
            .chat(&body)
            .await
            .map_err(|f| RagError::Vision {
                message: f.message,
                transient: f.transient,
            })
    }
}

pub fn create_describer(config: &VisionConfig) -> Result<Box<dyn VisionDescriber>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledVision)),
        "openai" => Ok(Box::new(OpenAiVision::new(config)?)),
        other => Err(RagError::Config(format!(
            "Unknown vision provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_data_url_image() {
        let body = request_body("gpt-4o", 2048, &[0x89, b'P', b'N', b'G']);
        assert_eq!(body["max_tokens"], 2048);
        let url = body["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(
            body["messages"][0]["content"][0]["text"],
            DESCRIBE_INSTRUCTION
        );
    }

    #[tokio::test]
    async fn disabled_returns_empty() {
        assert_eq!(DisabledVision.describe(b"png").await.unwrap(), "");
        assert!(!DisabledVision.is_enabled());
    }
}
