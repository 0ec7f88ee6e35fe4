use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::flow::StepType;

/// Where an interaction's description came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionSource {
    Generated,
    Cached,
    Fallback,
}

impl std::fmt::Display for DescriptionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptionSource::Generated => write!(f, "generated"),
            DescriptionSource::Cached => write!(f, "cached"),
            DescriptionSource::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// 1-based position in the interaction list
    pub step_number: usize,
    pub step_id: String,
    pub step_type: StepType,
    pub element_text: String,
    pub description: String,
    pub page_title: String,
    pub page_url: String,
    pub source: DescriptionSource,
}

impl Interaction {
    /// One bullet of the summary prompt, e.g. `- Clicked on cart icon (on Target)`.
    pub fn action_line(&self) -> String {
        if !self.page_title.is_empty() && !self.description.contains(&self.page_title) {
            format!("- {} (on {})", self.description, self.page_title)
        } else {
            format!("- {}", self.description)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub text: String,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub file_path: PathBuf,
    pub prompt: String,
    pub url: Option<String>,
    pub cached: bool,
}
