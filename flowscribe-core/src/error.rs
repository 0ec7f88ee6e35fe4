//! Error types for the Flowscribe core library.
//!
//! Every pipeline stage reports failures through [`FlowscribeError`]. Whether an
//! error is fatal is decided by the stage that observes it: the extractor and
//! the image stage degrade, the summary stage and flow loading abort the run.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Flow | Flow document lookup and validation errors |
//! | E2001-E2099 | Config | Environment, config file, and validation errors |
//! | E3001-E3099 | External | Describer / image provider request, parse and timeout errors |
//! | E4001-E4099 | Pipeline | Stage failures (summary, image, report) |
//! | E9001-E9099 | General | Internal, IO and serialization errors |

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to the delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry once, then give up. Used by the extractor and summary stages.
    pub fn for_describer() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Image generation is slow and expensive, so only a single attempt.
    pub fn for_image() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// No retries and no delay.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // up to 25% extra
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Delay before retrying after `error`. A rate-limit response raises the
    /// backoff to its `retry_after_secs`, still capped by `max_delay`.
    pub fn delay_after(&self, attempt: u32, error: &FlowscribeError) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error {
            FlowscribeError::ApiRateLimitExceeded {
                retry_after_secs, ..
            } => backoff.max(Duration::from_secs(*retry_after_secs).min(self.max_delay)),
            _ => backoff,
        }
    }
}

/// Returns a value between 0.0 and 1.0 derived from the current timestamp.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// The main error type for the Flowscribe core library.
#[derive(Debug, Error)]
pub enum FlowscribeError {
    // ========================================================================
    // Flow Errors (E1001-E1099)
    // ========================================================================
    /// Flow file does not exist or cannot be opened
    #[error("[E1001] Flow file not found: {0}")]
    FlowNotFound(String),

    /// Flow file exists but is not a valid flow document
    #[error("[E1002] Invalid flow document: {0}")]
    InvalidFlowDocument(String),

    // ========================================================================
    // Configuration Errors (E2001-E2099)
    // ========================================================================
    /// Required environment variable is missing
    #[error("[E2001] Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Configuration value failed validation
    #[error("[E2002] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    /// General configuration error
    #[error("[E2003] Configuration error: {0}")]
    ConfigError(String),

    // ========================================================================
    // External Capability Errors (E3001-E3099)
    // ========================================================================
    /// API request failed
    #[error("[E3001] API request failed: {0}")]
    ApiRequestFailed(String),

    /// API response could not be interpreted
    #[error("[E3002] Failed to parse API response: {0}")]
    ApiParseError(String),

    /// API rate limit exceeded
    #[error(
        "[E3003] API rate limit exceeded for {service}, retry after {retry_after_secs} seconds"
    )]
    ApiRateLimitExceeded {
        service: String,
        retry_after_secs: u64,
    },

    /// API authentication failed
    #[error("[E3004] API authentication failed for {service}: {message}")]
    ApiAuthenticationFailed { service: String, message: String },

    /// API service unavailable
    #[error("[E3005] API service unavailable: {0}")]
    ApiServiceUnavailable(String),

    /// External call exceeded its time budget
    #[error("[E3006] External call '{operation}' timed out after {secs} seconds")]
    ExternalTimeout { operation: String, secs: u64 },

    // ========================================================================
    // Pipeline Errors (E4001-E4099)
    // ========================================================================
    /// Describing a single step failed (only surfaced under fail-fast)
    #[error("[E4001] Failed to describe step '{step_id}': {message}")]
    DescribeFailed { step_id: String, message: String },

    /// Summary generation failed, the run cannot continue
    #[error("[E4002] Summary generation failed: {0}")]
    SummaryGenerationFailed(String),

    /// Image generation failed (degraded, never fatal to a run)
    #[error("[E4003] Image generation failed: {0}")]
    ImageGenerationFailed(String),

    /// Writing the report failed
    #[error("[E4004] Failed to write report: {0}")]
    ReportWriteFailed(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("[E9002] IO error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("[E9003] Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for Flowscribe operations.
pub type FlowscribeResult<T> = Result<T, FlowscribeError>;

impl From<reqwest::Error> for FlowscribeError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .map(|u| u.host_str().unwrap_or("unknown").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if err.is_timeout() {
            FlowscribeError::ExternalTimeout {
                operation: service,
                secs: 0,
            }
        } else if err.is_connect() {
            FlowscribeError::ApiServiceUnavailable(err.to_string())
        } else if err.is_status() {
            match err.status().map(|s| s.as_u16()) {
                Some(429) => FlowscribeError::ApiRateLimitExceeded {
                    service,
                    retry_after_secs: 60,
                },
                Some(401) | Some(403) => FlowscribeError::ApiAuthenticationFailed {
                    service,
                    message: err.to_string(),
                },
                Some(code) if code >= 500 => {
                    FlowscribeError::ApiServiceUnavailable(err.to_string())
                }
                _ => FlowscribeError::ApiRequestFailed(err.to_string()),
            }
        } else if err.is_decode() {
            FlowscribeError::ApiParseError(err.to_string())
        } else {
            FlowscribeError::ApiRequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FlowscribeError {
    fn from(err: serde_json::Error) -> Self {
        FlowscribeError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for FlowscribeError {
    fn from(err: std::io::Error) -> Self {
        FlowscribeError::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for FlowscribeError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => FlowscribeError::MissingEnvVar(key),
            other => FlowscribeError::ConfigError(other.to_string()),
        }
    }
}

impl FlowscribeError {
    /// Returns true if this is a flow input error.
    pub fn is_flow_error(&self) -> bool {
        matches!(
            self,
            FlowscribeError::FlowNotFound(_) | FlowscribeError::InvalidFlowDocument(_)
        )
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            FlowscribeError::MissingEnvVar(_)
                | FlowscribeError::InvalidConfigValue { .. }
                | FlowscribeError::ConfigError(_)
        )
    }

    /// Returns true if this error came from an external capability.
    pub fn is_external_error(&self) -> bool {
        matches!(
            self,
            FlowscribeError::ApiRequestFailed(_)
                | FlowscribeError::ApiParseError(_)
                | FlowscribeError::ApiRateLimitExceeded { .. }
                | FlowscribeError::ApiAuthenticationFailed { .. }
                | FlowscribeError::ApiServiceUnavailable(_)
                | FlowscribeError::ExternalTimeout { .. }
        )
    }

    /// Returns true if the operation might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FlowscribeError::ApiRequestFailed(_)
                | FlowscribeError::ApiRateLimitExceeded { .. }
                | FlowscribeError::ApiServiceUnavailable(_)
                | FlowscribeError::ExternalTimeout { .. }
        )
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlowscribeError::FlowNotFound(_) => "E1001",
            FlowscribeError::InvalidFlowDocument(_) => "E1002",
            FlowscribeError::MissingEnvVar(_) => "E2001",
            FlowscribeError::InvalidConfigValue { .. } => "E2002",
            FlowscribeError::ConfigError(_) => "E2003",
            FlowscribeError::ApiRequestFailed(_) => "E3001",
            FlowscribeError::ApiParseError(_) => "E3002",
            FlowscribeError::ApiRateLimitExceeded { .. } => "E3003",
            FlowscribeError::ApiAuthenticationFailed { .. } => "E3004",
            FlowscribeError::ApiServiceUnavailable(_) => "E3005",
            FlowscribeError::ExternalTimeout { .. } => "E3006",
            FlowscribeError::DescribeFailed { .. } => "E4001",
            FlowscribeError::SummaryGenerationFailed(_) => "E4002",
            FlowscribeError::ImageGenerationFailed(_) => "E4003",
            FlowscribeError::ReportWriteFailed(_) => "E4004",
            FlowscribeError::Internal(_) => "E9001",
            FlowscribeError::IoError(_) => "E9002",
            FlowscribeError::SerializationError(_) => "E9003",
        }
    }

    /// Returns a user-facing hint for resolving the error, if there is one.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            FlowscribeError::FlowNotFound(_) => {
                Some("Check the path to the flow JSON file and try again.")
            }
            FlowscribeError::InvalidFlowDocument(_) => {
                Some("Make sure the file is a flow export with a 'steps' array.")
            }
            FlowscribeError::MissingEnvVar(_) => {
                Some("Set OPENAI_API_KEY in your environment or in a .env file.")
            }
            FlowscribeError::InvalidConfigValue { .. } => {
                Some("Review flowscribe.toml and FLOWSCRIBE_* environment variables.")
            }
            FlowscribeError::ApiAuthenticationFailed { .. } => {
                Some("Verify that the API key is valid and has access to the configured models.")
            }
            FlowscribeError::ApiRateLimitExceeded { .. } => {
                Some("Wait a moment and run again; cached steps will not be re-requested.")
            }
            FlowscribeError::SummaryGenerationFailed(_) => {
                Some("The summary is required for the report. Re-run once the API is reachable.")
            }
            _ => None,
        }
    }
}

// ============================================================================
// Retry utilities
// ============================================================================

/// Execute an async operation, retrying transient failures per `config`.
///
/// Non-transient errors are returned immediately. The last error is returned
/// once `max_attempts` is exhausted.
///
/// # Example
/// ```ignore
/// use flowscribe_core::error::{retry_async_with_config, RetryConfig};
///
/// let text = retry_async_with_config(
///     || async { describer.describe(&prompt).await },
///     RetryConfig::for_describer(),
/// )
/// .await?;
/// ```
pub async fn retry_async_with_config<F, Fut, T>(
    operation: F,
    config: RetryConfig,
) -> FlowscribeResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = FlowscribeResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() || attempt == max_attempts - 1 {
                    return Err(e);
                }

                let delay = config.delay_after(attempt, &e);
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        FlowscribeError::Internal("Retry loop exhausted without error".to_string())
    }))
}

// ============================================================================
// User-friendly error formatting for CLI
// ============================================================================

/// Format an error for CLI display with its suggestion.
pub struct CliErrorDisplay<'a> {
    error: &'a FlowscribeError,
    show_suggestion: bool,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a FlowscribeError) -> Self {
        Self {
            error,
            show_suggestion: true,
        }
    }

    pub fn without_suggestion(mut self) -> Self {
        self.show_suggestion = false;
        self
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;

        if self.show_suggestion {
            if let Some(suggestion) = self.error.user_suggestion() {
                writeln!(f)?;
                writeln!(f, "  Suggestion: {}", suggestion)?;
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
