use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{compute_key, sha256_hex, CacheKind, CacheStore};
use crate::error::{retry_async_with_config, FlowscribeError, FlowscribeResult, RetryConfig};
use crate::models::{FlowDocument, FlowSummary, GeneratedImage};
use crate::pipeline::report::{sanitize_filename_component, IMAGES_SUBDIR};
use crate::pipeline::{with_timeout, RunConfig};
use crate::providers::{ImageProvider, ImageRequest};

/// Keyword (any of) -> theme phrase.
const THEMES: &[(&[&str], &str)] = &[
    (&["scooter"], "modern scooter"),
    (&["shopping", "cart"], "online shopping"),
    (&["target"], "retail shopping experience"),
];

const FALLBACK_THEME: &str = "user journey";

/// `["image", flow_name, sha256_hex(summary_text)]`
pub fn image_key(flow_name: &str, summary_text: &str) -> String {
    compute_key(&[json!("image"), json!(flow_name), json!(sha256_hex(summary_text))])
}

/// `social_media_image_<safe name>_<key prefix>_<timestamp>.png`. The key
/// prefix keeps flows that share a truncated name apart.
pub fn image_filename(flow_name: &str, key: &str, timestamp: &str) -> String {
    let prefix: String = key.chars().take(12).collect();
    format!(
        "social_media_image_{}_{}_{}.png",
        sanitize_filename_component(flow_name),
        prefix,
        timestamp
    )
}

pub fn extract_themes(summary_text: &str) -> Vec<&'static str> {
    let lower = summary_text.to_lowercase();
    THEMES
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, theme)| *theme)
        .collect()
}

pub fn build_image_prompt(flow_name: &str, summary_text: &str, size: &str) -> String {
    let themes = extract_themes(summary_text);
    let themes = if themes.is_empty() {
        FALLBACK_THEME.to_string()
    } else {
        themes.join(", ")
    };

    format!(
        "Create a vibrant, professional social media image for this user flow: \"{flow_name}\"\n\
         \n\
         The image should:\n\
         - Be visually engaging and suitable for social media (Instagram, Twitter, LinkedIn)\n\
         - Represent the theme of: {themes}\n\
         - Use modern, clean design with bright, appealing colors\n\
         - Have a professional but friendly aesthetic\n\
         - Include visual elements that tell a story about the user journey\n\
         - Be optimized for {size} square format\n\
         - Look shareable and engaging\n\
         \n\
         Style: Modern digital illustration, clean composition, professional social media \
         graphic design, colorful and eye-catching"
    )
}

/// Optional illustration stage. Never fails a run: every error is logged
/// and reported as `None`.
pub struct ImageGenerator {
    provider: Arc<dyn ImageProvider>,
    cache: Arc<CacheStore>,
    uncached_dir: PathBuf,
    size: String,
    image_timeout: Duration,
    download_timeout: Duration,
    retry: RetryConfig,
}

impl ImageGenerator {
    pub fn new(provider: Arc<dyn ImageProvider>, cache: Arc<CacheStore>, config: &RunConfig) -> Self {
        Self {
            provider,
            cache,
            uncached_dir: config.output_dir.join(IMAGES_SUBDIR),
            size: config.image_size.clone(),
            image_timeout: config.image_timeout,
            download_timeout: config.request_timeout,
            retry: RetryConfig::for_image(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Images live next to the cache records, or straight in the report's
    /// image directory when the cache is disabled.
    fn image_dir(&self) -> PathBuf {
        if self.cache.is_enabled() {
            self.cache.artifacts_dir()
        } else {
            self.uncached_dir.clone()
        }
    }

    pub async fn generate(
        &self,
        flow: &FlowDocument,
        summary: &FlowSummary,
    ) -> Option<GeneratedImage> {
        match self.try_generate(flow, summary).await {
            Ok(image) => Some(image),
            Err(e) => {
                let e = match e {
                    FlowscribeError::ImageGenerationFailed(_) => e,
                    other => FlowscribeError::ImageGenerationFailed(other.to_string()),
                };
                warn!(flow = %flow.name, error_code = e.error_code(), "{}", e);
                None
            }
        }
    }

    async fn try_generate(
        &self,
        flow: &FlowDocument,
        summary: &FlowSummary,
    ) -> FlowscribeResult<GeneratedImage> {
        let key = image_key(&flow.name, &summary.text);

        let (mut image, outcome) = self
            .cache
            .memoize(
                &key,
                CacheKind::Image,
                |cached: &GeneratedImage| {
                    let exists = cached.file_path.is_file();
                    if !exists {
                        debug!(
                            "Cached image {} no longer exists",
                            cached.file_path.display()
                        );
                    }
                    exists
                },
                || self.create_image(flow, summary, &key),
            )
            .await?;

        image.cached = outcome.is_hit();
        Ok(image)
    }

    async fn create_image(
        &self,
        flow: &FlowDocument,
        summary: &FlowSummary,
        key: &str,
    ) -> FlowscribeResult<GeneratedImage> {
        let request = ImageRequest {
            prompt: build_image_prompt(&flow.name, &summary.text, &self.size),
            size: self.size.clone(),
        };
        debug!(
            "Image prompt preview: {}",
            request.prompt.chars().take(150).collect::<String>()
        );

        let provider = &self.provider;
        let timeout = self.image_timeout;
        let req = &request;
        let remote = retry_async_with_config(
            move || async move {
                with_timeout("generate_image", timeout, provider.generate(req)).await
            },
            self.retry.clone(),
        )
        .await?;

        let bytes = with_timeout(
            "download_image",
            self.download_timeout,
            self.provider.download(&remote.url),
        )
        .await?;

        let dir = self.image_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let file_name = image_filename(&flow.name, key, &timestamp);
        let path: PathBuf = dir.join(file_name);
        tokio::fs::write(&path, &bytes).await?;

        info!(path = %path.display(), bytes = bytes.len(), "Image saved");

        Ok(GeneratedImage {
            file_path: path,
            prompt: request.prompt,
            url: Some(remote.url),
            cached: false,
        })
    }
}
