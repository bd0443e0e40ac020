use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::settings::OcrConfig;
use crate::utils::error::ApiError;

/// `VisionOCR.Recognize` (§4.1 C1): sends a prompt demanding raw HTML
/// output only, temperature ~0.01, bounded output tokens. One call per
/// page; upper layers see only `(result, ApiError)`.
#[async_trait]
pub trait VisionOcr: Send + Sync {
    async fn recognize(
        &self,
        image_bytes: &[u8],
        page_num: usize,
        total_pages: usize,
    ) -> Result<String, ApiError>;
}

const SYSTEM_PROMPT: &str = "你是专业的文档OCR助手，只输出HTML正文内容，不要输出任何思考过程。\
空白页返回空字符串，表格用<table>标签，标题用<h1>-<h3>标签。";

pub struct VisionOcrAdapter {
    client: Client,
    config: OcrConfig,
}

impl VisionOcrAdapter {
    pub fn new(config: OcrConfig) -> Self {
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
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl VisionOcr for VisionOcrAdapter {
    async fn recognize(
        &self,
        image_bytes: &[u8],
        page_num: usize,
        total_pages: usize,
    ) -> Result<String, ApiError> {
        let base64_image = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let data_url = format!("data:image/png;base64,{base64_image}");

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: format!(
                            "{SYSTEM_PROMPT}\n当前第{page_num}页，共{total_pages}页。"
                        ),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };

        debug!(page_num, total_pages, "vision-ocr request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout(format!("vision-ocr page {page_num} timed out"))
                } else {
                    ApiError::Upstream(format!("vision-ocr request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "vision-ocr returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(text)
    }
}
