//! Request coordination
//!
//! Two implementations of the same contract share this data model:
//! the message-driven [`Orchestrator`] and the synchronous [`PipelineDriver`].

pub mod correlation;
pub mod fan_in;
pub mod orchestrator;
pub mod payload;
pub mod pipeline;
pub mod state;
pub mod types;

pub use correlation::{CorrelationHandle, CorrelationTable};
pub use fan_in::FanIn;
pub use orchestrator::{Orchestrator, OrchestratorHandle, Submission};
pub use payload::{
    normalize, normalize_inline, HttpTemplateFetcher, NoRemoteTemplates, TemplateFetcher,
    TemplatePayload,
};
pub use pipeline::PipelineDriver;
pub use state::{OrchestratorSnapshot, Phase, RequestSnapshot};
pub use types::*;
