//! Text generation backend abstraction.
//!
//! The orchestrator treats generation as a capability that accepts a prompt
//! and returns text; streaming delivery is simulated downstream by chunking
//! the complete response. Two implementations:
//! - **[`OpenAiGeneration`]** — any OpenAI-compatible chat completions API
//!   (OpenAI, DeepSeek, vLLM, ...), selected by `[generation].base_url`.
//! - **[`DisabledGeneration`]** — always errors; the pipeline falls back to
//!   the deterministic extractive answer.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;

/// A text generation capability: prompt in, complete response text out.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Whether this backend can produce text at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Generate a completion for the prompt, with an optional system prompt.
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String>;
}

/// Create the appropriate [`GenerationBackend`] from configuration.
pub fn create_backend(config: &GenerationConfig) -> Result<Arc<dyn GenerationBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGeneration)),
        "openai" => Ok(Arc::new(OpenAiGeneration::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled backend ============

/// A no-op generation backend used when no provider is configured.
pub struct DisabledGeneration;

#[async_trait]
impl GenerationBackend for DisabledGeneration {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn complete(&self, _prompt: &str, _system: Option<&str>) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

// ============ OpenAI-compatible backend ============

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Generation backend for OpenAI-compatible chat completions APIs.
///
/// Calls `POST {base_url}/chat/completions`. The API key is read from the
/// environment variable named by `[generation].api_key_env`.
pub struct OpenAiGeneration {
    model: String,
    config: GenerationConfig,
    client: reqwest::Client,
}

impl OpenAiGeneration {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        if std::env::var(&config.api_key_env).is_err() {
            bail!("{} environment variable not set", config.api_key_env);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            config: config.clone(),
            client,
        })
    }
}

#[async_trait]
impl GenerationBackend for OpenAiGeneration {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let api_key = std::env::var(&self.config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.config.api_key_env))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: ChatResponse = response.json().await?;
                        let content = parsed
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content)
                            .unwrap_or_default();
                        return Ok(content);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Chat completions error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Chat completions error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}
