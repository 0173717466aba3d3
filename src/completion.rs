//! Completion service used for answer synthesis.

use async_trait::async_trait;

use crate::config::CompletionConfig;
use crate::error::{RagError, Result};
use crate::openai::ChatClient;

#[async_trait]
pub trait Completer: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Chat completions against OpenAI or any server that speaks its API.
pub struct OpenAiCompleter {
    chat: ChatClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        Ok(Self {
            chat: ChatClient::new(config.url.as_deref(), config.timeout_secs)?,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ]
        });
        let text = self.chat.chat(&body).await.map_err(|f| RagError::Completion {
            message: f.message,
            transient: f.transient,
        })?;
        if text.is_empty() {
            return Err(RagError::Completion {
                message: "empty completion".into(),
                transient: false,
            });
        }
        Ok(text)
    }
}

/// For deployments that only ingest. Every call fails with a
/// configuration error, which the query pipeline turns into its fixed
/// apology message.
pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(RagError::Config(
            "completion provider is disabled; set [completion].provider".into(),
        ))
    }
}

pub fn create_completer(config: &CompletionConfig) -> Result<Box<dyn Completer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompleter)),
        "openai" => Ok(Box::new(OpenAiCompleter::new(config)?)),
        other => Err(RagError::Config(format!(
            "Unknown completion provider: {}",
            other
        ))),
    }
}
