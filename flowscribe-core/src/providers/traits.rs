use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowscribeResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPrompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl TextPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 256,
            temperature: 0.7,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    /// `WIDTHxHEIGHT`, e.g. `1024x1024`
    pub size: String,
}

/// A generated image that still lives on the provider's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteImage {
    pub url: String,
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

/// Text generation: turns a prompt into natural language.
#[async_trait]
pub trait Describer: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn describe(&self, prompt: &TextPrompt) -> FlowscribeResult<String>;
}

/// Image synthesis plus retrieval of the synthesized bytes.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn generate(&self, request: &ImageRequest) -> FlowscribeResult<RemoteImage>;

    async fn download(&self, url: &str) -> FlowscribeResult<Vec<u8>>;
}
