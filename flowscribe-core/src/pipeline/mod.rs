//! The four report stages and the runner that chains them.
//!
//! Every stage shares one [`CacheStore`](crate::cache::CacheStore) and talks
//! to the outside world only through the capabilities in
//! [`providers`](crate::providers).

pub mod extractor;
pub mod image;
pub mod report;
pub mod runner;
pub mod summary;

pub use extractor::{interaction_key, placeholder_description, InteractionExtractor};
pub use image::{build_image_prompt, image_key, ImageGenerator};
pub use report::{report_filename, sanitize_filename_component, ReportAssembler};
pub use runner::{Pipeline, PipelineOutcome};
pub use summary::{summary_key, SummaryGenerator};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FlowscribeError, FlowscribeResult};

/// What the extractor does when a step cannot be described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescribeFailurePolicy {
    /// Substitute an element-type placeholder and continue.
    #[default]
    Placeholder,
    /// Abort the run with the describer error.
    FailFast,
}

impl std::fmt::Display for DescribeFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescribeFailurePolicy::Placeholder => write!(f, "placeholder"),
            DescribeFailurePolicy::FailFast => write!(f, "fail_fast"),
        }
    }
}

/// Per-run knobs, resolved once from config and CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub skip_image: bool,
    pub describe_failure_policy: DescribeFailurePolicy,
    pub describe_concurrency: usize,
    pub request_timeout: Duration,
    pub image_timeout: Duration,
    pub image_size: String,
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            skip_image: false,
            describe_failure_policy: DescribeFailurePolicy::Placeholder,
            describe_concurrency: 1,
            request_timeout: Duration::from_secs(60),
            image_timeout: Duration::from_secs(180),
            image_size: "1024x1024".to_string(),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Bounds an external call. An elapsed timer becomes `ExternalTimeout`,
/// which the retry helpers treat as transient.
pub(crate) async fn with_timeout<T, Fut>(
    operation: &str,
    limit: Duration,
    future: Fut,
) -> FlowscribeResult<T>
where
    Fut: Future<Output = FlowscribeResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(FlowscribeError::ExternalTimeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
