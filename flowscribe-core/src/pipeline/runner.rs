use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::error::{FlowscribeResult, RetryConfig};
use crate::models::{DescriptionSource, FlowDocument, FlowSummary, GeneratedImage, Interaction};
use crate::pipeline::{ImageGenerator, InteractionExtractor, ReportAssembler, RunConfig, SummaryGenerator};
use crate::providers::{Describer, ImageProvider};

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub report_path: PathBuf,
    pub interactions: Vec<Interaction>,
    pub summary: FlowSummary,
    pub image: Option<GeneratedImage>,
    pub generated_at: DateTime<Utc>,
}

impl PipelineOutcome {
    pub fn fallback_count(&self) -> usize {
        self.interactions
            .iter()
            .filter(|i| i.source == DescriptionSource::Fallback)
            .count()
    }

    pub fn cached_count(&self) -> usize {
        self.interactions
            .iter()
            .filter(|i| i.source == DescriptionSource::Cached)
            .count()
    }
}

/// Extract -> summarize -> (illustrate) -> assemble.
pub struct Pipeline {
    describer: Arc<dyn Describer>,
    images: Option<Arc<dyn ImageProvider>>,
    cache: Arc<CacheStore>,
    config: RunConfig,
    retry: Option<RetryConfig>,
}

impl Pipeline {
    pub fn new(
        describer: Arc<dyn Describer>,
        images: Option<Arc<dyn ImageProvider>>,
        cache: Arc<CacheStore>,
        config: RunConfig,
    ) -> Self {
        Self {
            describer,
            images,
            cache,
            config,
            retry: None,
        }
    }

    /// Overrides the text stages' retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub async fn run_file(&self, path: impl AsRef<Path>) -> FlowscribeResult<PipelineOutcome> {
        let flow = FlowDocument::load(path)?;
        self.run(&flow).await
    }

    pub async fn run(&self, flow: &FlowDocument) -> FlowscribeResult<PipelineOutcome> {
        let started = Instant::now();
        info!(flow = %flow.name, steps = flow.steps.len(), "Starting flow analysis");

        let mut extractor =
            InteractionExtractor::new(Arc::clone(&self.describer), Arc::clone(&self.cache), &self.config);
        let mut summarizer =
            SummaryGenerator::new(Arc::clone(&self.describer), Arc::clone(&self.cache), &self.config);
        if let Some(retry) = &self.retry {
            extractor = extractor.with_retry(retry.clone());
            summarizer = summarizer.with_retry(retry.clone());
        }

        let interactions = extractor.extract(flow).await?;
        info!("Found {} interactions", interactions.len());

        let summary = summarizer.generate(flow, &interactions).await?;

        let image = match (&self.images, self.config.skip_image) {
            (_, true) => {
                info!("Image generation skipped");
                None
            }
            (None, false) => {
                warn!("No image provider configured, skipping image generation");
                None
            }
            (Some(provider), false) => {
                ImageGenerator::new(Arc::clone(provider), Arc::clone(&self.cache), &self.config)
                    .generate(flow, &summary)
                    .await
            }
        };

        let generated_at = Utc::now();
        let report_path = ReportAssembler::new(&self.config.output_dir).assemble(
            flow,
            &summary,
            &interactions,
            image.as_ref(),
            generated_at,
        )?;

        info!(
            flow = %flow.name,
            report = %report_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Flow analysis complete"
        );

        Ok(PipelineOutcome {
            report_path,
            interactions,
            summary,
            image,
            generated_at,
        })
    }
}
