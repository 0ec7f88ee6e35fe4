use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::OpenAiConfig;
use crate::error::{FlowscribeError, FlowscribeResult};
use crate::providers::traits::{Describer, ImageProvider, ImageRequest, RemoteImage, TextPrompt};

const SERVICE_NAME: &str = "openai";

/// Chat completions plus image generation against an OpenAI-compatible API.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    api_base: String,
    text_model: String,
    image_model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, config: &OpenAiConfig) -> FlowscribeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(
                config
                    .request_timeout_secs
                    .max(config.image_timeout_secs),
            ))
            .build()
            .map_err(|e| FlowscribeError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> FlowscribeResult<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.api_base, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text, retry_after));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FlowscribeError::ApiParseError(e.to_string()))
    }
}

fn status_error(status: StatusCode, body: &str, retry_after: Option<u64>) -> FlowscribeError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status.as_u16() {
        429 => FlowscribeError::ApiRateLimitExceeded {
            service: SERVICE_NAME.to_string(),
            retry_after_secs: retry_after.unwrap_or(60),
        },
        401 | 403 => FlowscribeError::ApiAuthenticationFailed {
            service: SERVICE_NAME.to_string(),
            message,
        },
        500..=599 => FlowscribeError::ApiServiceUnavailable(format!("{}: {}", status, message)),
        _ => FlowscribeError::ApiRequestFailed(format!("{}: {}", status, message)),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'static str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[async_trait]
impl Describer for OpenAiClient {
    fn provider_name(&self) -> &str {
        SERVICE_NAME
    }

    async fn describe(&self, prompt: &TextPrompt) -> FlowscribeResult<String> {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &prompt.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });

        let request = ChatRequest {
            model: &self.text_model,
            messages,
            max_tokens: prompt.max_tokens,
            temperature: prompt.temperature,
        };

        let response: ChatResponse = self.post_json("/chat/completions", &request).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                FlowscribeError::ApiParseError("Chat completion returned no choices".to_string())
            })?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl ImageProvider for OpenAiClient {
    fn provider_name(&self) -> &str {
        SERVICE_NAME
    }

    async fn generate(&self, request: &ImageRequest) -> FlowscribeResult<RemoteImage> {
        let body = ImageGenerationRequest {
            model: &self.image_model,
            prompt: &request.prompt,
            size: &request.size,
            quality: "standard",
            n: 1,
        };

        info!(model = %self.image_model, size = %request.size, "Requesting image generation");
        let response: ImageGenerationResponse =
            self.post_json("/images/generations", &body).await?;

        let data = response.data.into_iter().next().ok_or_else(|| {
            FlowscribeError::ApiParseError("Image generation returned no data".to_string())
        })?;
        let url = data.url.ok_or_else(|| {
            FlowscribeError::ApiParseError("Image generation returned no url".to_string())
        })?;

        Ok(RemoteImage {
            url,
            revised_prompt: data.revised_prompt,
        })
    }

    async fn download(&self, url: &str) -> FlowscribeResult<Vec<u8>> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text, None));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(FlowscribeError::ApiParseError(
                "Downloaded image is empty".to_string(),
            ));
        }
        Ok(bytes.to_vec())
    }
}
