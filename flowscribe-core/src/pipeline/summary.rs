use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::{compute_key, CacheKind, CacheStore};
use crate::error::{retry_async_with_config, FlowscribeError, FlowscribeResult, RetryConfig};
use crate::models::{FlowDocument, FlowSummary, Interaction};
use crate::pipeline::{with_timeout, RunConfig};
use crate::providers::{Describer, TextPrompt};

const SYSTEM_PROMPT: &str = "Create clear, engaging summaries of user journeys.";

/// `["summary", flow_name, interaction_count]`
///
/// Keyed on the count only: a flow whose interactions change but keep the
/// same count reuses the earlier summary.
pub fn summary_key(flow_name: &str, interaction_count: usize) -> String {
    compute_key(&[json!("summary"), json!(flow_name), json!(interaction_count)])
}

pub fn build_summary_prompt(
    flow_name: &str,
    flow_description: &str,
    interactions: &[Interaction],
) -> TextPrompt {
    let actions = if interactions.is_empty() {
        "- (no recorded interactions)".to_string()
    } else {
        interactions
            .iter()
            .map(Interaction::action_line)
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user = format!(
        "Analyze this user flow and create a clear, readable summary.\n\
         \n\
         Flow: {flow_name}\n\
         Description: {flow_description}\n\
         \n\
         User Actions:\n\
         {actions}\n\
         \n\
         Write a concise 2-3 paragraph summary that:\n\
         1. Describes what the user was trying to accomplish\n\
         2. Summarizes the key steps they took\n\
         3. Notes the final outcome\n\
         \n\
         Use natural, conversational language:"
    );

    TextPrompt::new(SYSTEM_PROMPT, user)
        .with_max_tokens(300)
        .with_temperature(0.7)
}

pub struct SummaryGenerator {
    describer: Arc<dyn Describer>,
    cache: Arc<CacheStore>,
    request_timeout: Duration,
    retry: RetryConfig,
}

impl SummaryGenerator {
    pub fn new(describer: Arc<dyn Describer>, cache: Arc<CacheStore>, config: &RunConfig) -> Self {
        Self {
            describer,
            cache,
            request_timeout: config.request_timeout,
            retry: RetryConfig::for_describer(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Any failure here is fatal to the run.
    pub async fn generate(
        &self,
        flow: &FlowDocument,
        interactions: &[Interaction],
    ) -> FlowscribeResult<FlowSummary> {
        let key = summary_key(&flow.name, interactions.len());
        let prompt = build_summary_prompt(&flow.name, &flow.flow_description(), interactions);

        let this = self;
        let prompt = &prompt;
        let request = move || async move { this.request_summary(prompt).await };
        let retry = self.retry.clone();

        let (text, outcome) = self
            .cache
            .memoize(
                &key,
                CacheKind::Summary,
                |cached: &String| !cached.trim().is_empty(),
                || retry_async_with_config(request, retry),
            )
            .await
            .map_err(|e| match e {
                FlowscribeError::SummaryGenerationFailed(_) => e,
                other => FlowscribeError::SummaryGenerationFailed(other.to_string()),
            })?;

        info!(
            flow = %flow.name,
            cached = outcome.is_hit(),
            chars = text.len(),
            "Summary ready"
        );

        Ok(FlowSummary {
            text,
            cached: outcome.is_hit(),
        })
    }

    async fn request_summary(&self, prompt: &TextPrompt) -> FlowscribeResult<String> {
        let text = with_timeout(
            "generate_summary",
            self.request_timeout,
            self.describer.describe(prompt),
        )
        .await?;

        let text = text.trim();
        if text.is_empty() {
            return Err(FlowscribeError::SummaryGenerationFailed(
                "Describer returned an empty summary".to_string(),
            ));
        }
        Ok(text.to_string())
    }
}
