#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::type_complexity,
    clippy::len_zero,
    dead_code,
    unused_imports
)]

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod providers;

pub use cache::{compute_key, sha256_hex, CacheKind, CacheOutcome, CacheRecord, CacheStore};
pub use config::{
    get_config_dir, CacheConfig, ConfigLoadError, FlowscribeConfig, LoggingConfig, OpenAiConfig,
    OutputConfig, PipelineConfig,
};
pub use error::{
    retry_async_with_config, CliErrorDisplay, FlowscribeError, FlowscribeResult, RetryConfig,
};
pub use models::{
    ClickContext, CreatedAt, DescriptionSource, FlowDocument, FlowStep, FlowSummary,
    GeneratedImage, Interaction, PageContext, StepType, DEFAULT_FLOW_NAME,
};
pub use pipeline::{
    build_image_prompt, image_key, interaction_key, placeholder_description, report_filename,
    sanitize_filename_component, summary_key, DescribeFailurePolicy, ImageGenerator,
    InteractionExtractor, Pipeline, PipelineOutcome, ReportAssembler, RunConfig, SummaryGenerator,
};
pub use providers::{Describer, ImageProvider, ImageRequest, OpenAiClient, RemoteImage, TextPrompt};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
