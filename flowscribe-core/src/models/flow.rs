use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{FlowscribeError, FlowscribeResult};

pub const DEFAULT_FLOW_NAME: &str = "User Flow";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    Chapter,
    Image,
    Video,
    Other(String),
}

impl StepType {
    pub fn is_interactive(&self) -> bool {
        matches!(self, StepType::Chapter | StepType::Image | StepType::Video)
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepType::Chapter => "CHAPTER",
            StepType::Image => "IMAGE",
            StepType::Video => "VIDEO",
            StepType::Other(s) => s,
        }
    }
}

impl From<String> for StepType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "CHAPTER" => StepType::Chapter,
            "IMAGE" => StepType::Image,
            "VIDEO" => StepType::Video,
            _ => StepType::Other(value),
        }
    }
}

impl From<StepType> for String {
    fn from(value: StepType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the user clicked. Fields beyond `text` and `elementType` are kept
/// verbatim so they can be forwarded to the describer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClickContext {
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, |t| t.trim().is_empty())
            && self.element_type.is_none()
            && self.extra.is_empty()
    }

    pub fn text_or_na(&self) -> &str {
        match self.text.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => "N/A",
        }
    }

    pub fn element_type_or_unknown(&self) -> &str {
        self.element_type.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    pub id: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub subtitle: Option<String>,

    #[serde(default)]
    pub click_context: Option<ClickContext>,

    #[serde(default)]
    pub page_context: Option<PageContext>,
}

impl FlowStep {
    /// A step is worth describing when it is a chapter, image or video and
    /// carries a non-empty click context.
    pub fn is_interactive(&self) -> bool {
        self.step_type.is_interactive()
            && self.click_context.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Click text, or `N/A` when the step has none.
    pub fn clicked_text(&self) -> &str {
        self.click_context
            .as_ref()
            .map(|c| c.text_or_na())
            .unwrap_or("N/A")
    }

    pub fn page_title(&self) -> &str {
        self.page_context
            .as_ref()
            .map(|p| p.title.as_str())
            .unwrap_or("")
    }

    pub fn page_url(&self) -> &str {
        self.page_context
            .as_ref()
            .map(|p| p.url.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatedAt {
    #[serde(rename = "_seconds", default)]
    pub seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDocument {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default = "default_flow_name")]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub schema_version: Option<Value>,

    #[serde(default)]
    pub created: Option<CreatedAt>,

    #[serde(default)]
    pub upload_id: Option<String>,

    #[serde(default)]
    pub created_by: Option<String>,

    #[serde(default)]
    pub use_case: Option<String>,

    pub steps: Vec<FlowStep>,
}

fn default_flow_name() -> String {
    DEFAULT_FLOW_NAME.to_string()
}

impl FlowDocument {
    pub fn load(path: impl AsRef<Path>) -> FlowscribeResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(FlowscribeError::FlowNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            FlowscribeError::FlowNotFound(format!("{}: {}", path.display(), e))
        })?;

        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> FlowscribeResult<Self> {
        let document: FlowDocument = serde_json::from_str(contents)
            .map_err(|e| FlowscribeError::InvalidFlowDocument(e.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    pub fn validate(&self) -> FlowscribeResult<()> {
        if self.name.trim().is_empty() {
            return Err(FlowscribeError::InvalidFlowDocument(
                "flow name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(FlowscribeError::InvalidFlowDocument(
                    "step id must not be empty".to_string(),
                ));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(FlowscribeError::InvalidFlowDocument(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        Ok(())
    }

    pub fn interactive_steps(&self) -> impl Iterator<Item = &FlowStep> {
        self.steps.iter().filter(|s| s.is_interactive())
    }

    /// The explicit description, falling back to the subtitle of the first
    /// chapter that has one.
    pub fn flow_description(&self) -> String {
        if let Some(desc) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            return desc.to_string();
        }

        self.steps
            .iter()
            .filter(|s| s.step_type == StepType::Chapter)
            .find_map(|s| s.subtitle.as_deref().filter(|t| !t.trim().is_empty()))
            .unwrap_or_default()
            .to_string()
    }

    pub fn upload_id(&self) -> &str {
        self.upload_id.as_deref().unwrap_or("unknown")
    }

    pub fn author(&self) -> &str {
        self.created_by.as_deref().unwrap_or("unknown")
    }

    pub fn use_case(&self) -> &str {
        self.use_case.as_deref().unwrap_or("N/A")
    }

    pub fn schema_version_label(&self) -> String {
        match &self.schema_version {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "N/A".to_string(),
            Some(other) => other.to_string(),
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created
            .as_ref()
            .and_then(|c| c.seconds)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}
