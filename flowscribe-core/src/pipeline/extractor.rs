use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{compute_key, CacheKind, CacheStore};
use crate::error::{retry_async_with_config, FlowscribeError, FlowscribeResult, RetryConfig};
use crate::models::{DescriptionSource, FlowDocument, FlowStep, Interaction};
use crate::pipeline::{with_timeout, DescribeFailurePolicy, RunConfig};
use crate::providers::{Describer, TextPrompt};

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that describes user interactions in simple, clear language.";

/// `["interaction", step_id, clicked_text]`
pub fn interaction_key(step_id: &str, clicked_text: &str) -> String {
    compute_key(&[json!("interaction"), json!(step_id), json!(clicked_text)])
}

/// Description used when the describer gives up on a step.
pub fn placeholder_description(element_type: &str, clicked_text: &str) -> String {
    match element_type {
        "button" => format!("Clicked on button: {}", clicked_text),
        "image" => format!("Clicked on image: {}", clicked_text),
        "link" => format!("Clicked on link: {}", clicked_text),
        _ => format!("Interacted with: {}", clicked_text),
    }
}

fn element_type(step: &FlowStep) -> &str {
    step.click_context
        .as_ref()
        .map(|c| c.element_type_or_unknown())
        .unwrap_or("unknown")
}

pub fn build_interaction_prompt(step: &FlowStep) -> TextPrompt {
    let user = format!(
        "Given this user interaction data from a web flow:\n\
         - Page: {page}\n\
         - URL: {url}\n\
         - Clicked element type: {element_type}\n\
         - Clicked element text: {text}\n\
         \n\
         Create a concise, human-readable description of what the user did.\n\
         Format it as: \"Clicked on [action]\" or \"Interacted with [element]\"\n\
         Keep it under 20 words and make it natural.\n\
         \n\
         Examples:\n\
         - \"Clicked on search bar\"\n\
         - \"Selected scooter product\"\n\
         - \"Chose Blue color option\"\n\
         - \"Added item to cart\"\n\
         - \"Clicked on cart icon\"\n\
         \n\
         Just return the description, nothing else:",
        page = step.page_title(),
        url = step.page_url(),
        element_type = element_type(step),
        text = step.clicked_text(),
    );

    TextPrompt::new(SYSTEM_PROMPT, user)
        .with_max_tokens(50)
        .with_temperature(0.3)
}

/// Turns the interactive steps of a flow into described [`Interaction`]s.
///
/// Descriptions are memoized per `(step id, clicked text)`. With
/// `describe_concurrency > 1` steps are described in parallel, but the
/// returned list is always in flow order.
#[derive(Clone)]
pub struct InteractionExtractor {
    describer: Arc<dyn Describer>,
    cache: Arc<CacheStore>,
    policy: DescribeFailurePolicy,
    concurrency: usize,
    request_timeout: Duration,
    retry: RetryConfig,
}

impl InteractionExtractor {
    pub fn new(describer: Arc<dyn Describer>, cache: Arc<CacheStore>, config: &RunConfig) -> Self {
        Self {
            describer,
            cache,
            policy: config.describe_failure_policy,
            concurrency: config.describe_concurrency.max(1),
            request_timeout: config.request_timeout,
            retry: RetryConfig::for_describer(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn extract(&self, flow: &FlowDocument) -> FlowscribeResult<Vec<Interaction>> {
        let steps: Vec<&FlowStep> = flow.interactive_steps().collect();
        info!(
            flow = %flow.name,
            steps = steps.len(),
            concurrency = self.concurrency,
            "Extracting interactions"
        );

        if steps.is_empty() {
            return Ok(Vec::new());
        }

        let described = if self.concurrency > 1 && steps.len() > 1 {
            self.describe_parallel(&steps).await?
        } else {
            let mut out = Vec::with_capacity(steps.len());
            for step in &steps {
                out.push(self.describe_step(step).await?);
            }
            out
        };

        let interactions = steps
            .iter()
            .zip(described)
            .enumerate()
            .map(|(idx, (step, (description, source)))| Interaction {
                step_number: idx + 1,
                step_id: step.id.clone(),
                step_type: step.step_type.clone(),
                element_text: step.clicked_text().to_string(),
                description,
                page_title: step.page_title().to_string(),
                page_url: step.page_url().to_string(),
                source,
            })
            .collect::<Vec<_>>();

        let fallbacks = interactions
            .iter()
            .filter(|i| i.source == DescriptionSource::Fallback)
            .count();
        if fallbacks > 0 {
            warn!("{} of {} steps used placeholder descriptions", fallbacks, interactions.len());
        }

        Ok(interactions)
    }

    async fn describe_parallel(
        &self,
        steps: &[&FlowStep],
    ) -> FlowscribeResult<Vec<(String, DescriptionSource)>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (idx, step) in steps.iter().enumerate() {
            let this = self.clone();
            let step = (*step).clone();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.describe_step(&step).await,
                    Err(e) => Err(FlowscribeError::Internal(format!(
                        "Describe semaphore closed: {}",
                        e
                    ))),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<(String, DescriptionSource)>> = vec![None; steps.len()];
        while let Some(joined) = tasks.join_next().await {
            let (idx, result) = joined
                .map_err(|e| FlowscribeError::Internal(format!("Describe task failed: {}", e)))?;
            match result {
                Ok(described) => slots[idx] = Some(described),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.ok_or_else(|| {
                    FlowscribeError::Internal(format!("No description produced for step {}", idx + 1))
                })
            })
            .collect()
    }

    async fn describe_step(&self, step: &FlowStep) -> FlowscribeResult<(String, DescriptionSource)> {
        let text = step.clicked_text();
        let key = interaction_key(&step.id, text);
        let prompt = build_interaction_prompt(step);

        let this = self;
        let prompt = &prompt;
        let request = move || async move { this.request_description(prompt).await };
        let retry = self.retry.clone();

        let result = self
            .cache
            .memoize(
                &key,
                CacheKind::Interaction,
                |cached: &String| !cached.trim().is_empty(),
                || retry_async_with_config(request, retry),
            )
            .await;

        match result {
            Ok((description, outcome)) => {
                let source = if outcome.is_hit() {
                    DescriptionSource::Cached
                } else {
                    DescriptionSource::Generated
                };
                debug!(step_id = %step.id, source = %source, "Step described");
                Ok((description, source))
            }
            Err(e) => match self.policy {
                DescribeFailurePolicy::FailFast => Err(FlowscribeError::DescribeFailed {
                    step_id: step.id.clone(),
                    message: e.to_string(),
                }),
                DescribeFailurePolicy::Placeholder => {
                    warn!(step_id = %step.id, "Describer failed, using placeholder: {}", e);
                    Ok((
                        placeholder_description(element_type(step), text),
                        DescriptionSource::Fallback,
                    ))
                }
            },
        }
    }

    async fn request_description(&self, prompt: &TextPrompt) -> FlowscribeResult<String> {
        let description = with_timeout(
            "describe_interaction",
            self.request_timeout,
            self.describer.describe(prompt),
        )
        .await?;

        let description = description.trim();
        if description.is_empty() {
            return Err(FlowscribeError::ApiParseError(
                "Describer returned an empty description".to_string(),
            ));
        }
        Ok(description.to_string())
    }
}
