use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::settings::LlmConfig;
use crate::utils::error::ApiError;

#[derive(Debug, Clone)]
pub struct ChatLlmParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone)]
pub struct ChatLlmResult {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: Option<String>,
}

/// `ChatLLM.Complete` (§4.1 C1).
#[async_trait]
pub trait ChatLlm: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        params: ChatLlmParams,
    ) -> Result<ChatLlmResult, ApiError>;
}

pub struct ChatLlmAdapter {
    client: Client,
    config: LlmConfig,
}

impl ChatLlmAdapter {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl ChatLlm for ChatLlmAdapter {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        params: ChatLlmParams,
    ) -> Result<ChatLlmResult, ApiError> {
        debug!(user_len = user.len(), "chat-llm request");

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout("chat-llm request timed out".to_string())
                } else {
                    ApiError::Upstream(format!("chat-llm request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "chat-llm returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("chat-llm returned no choices".to_string()))?;

        Ok(ChatLlmResult {
            text: choice.message.content,
            input_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            output_tokens: parsed
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .unwrap_or(0),
            finish_reason: choice.finish_reason,
        })
    }
}
