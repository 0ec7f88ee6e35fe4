pub mod flow;
pub mod interaction;

pub use flow::{
    ClickContext, CreatedAt, FlowDocument, FlowStep, PageContext, StepType, DEFAULT_FLOW_NAME,
};
pub use interaction::{DescriptionSource, FlowSummary, GeneratedImage, Interaction};
