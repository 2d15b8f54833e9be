use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::brain::{chat_completion, http_client};
use crate::config::LlmConfig;
use crate::error::ServiceError;

const SERVICE: &str = "vision";

/// Answers free-form questions about a screenshot.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze_image(&self, image: &[u8], question: &str) -> Result<String, ServiceError>;
}

/// Vision capability backed by an OpenAI-compatible multimodal chat endpoint.
pub struct OpenAiVision {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiVision {
    pub fn new(config: &LlmConfig) -> Result<Self, ServiceError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ServiceError::NotConfigured {
                service: SERVICE,
                reason: "OPENAI_API_KEY not set in environment".into(),
            })?;

        Ok(Self {
            client: http_client(config, SERVICE)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.vision_model.clone(),
        })
    }
}

#[async_trait]
impl VisionAnalyzer for OpenAiVision {
    async fn analyze_image(&self, image: &[u8], question: &str) -> Result<String, ServiceError> {
        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(image));
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": question},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ],
            }],
            "max_tokens": 1500,
        });

        debug!("Vision request ({} image bytes)", image.len());
        chat_completion(&self.client, &self.base_url, &self.api_key, SERVICE, &body).await
    }
}
