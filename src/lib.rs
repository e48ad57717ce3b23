// Core infrastructure shared by both orchestration variants
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod telemetry;
}

pub mod coord;   // Data model, state machine, fan-in, correlation, pipeline
pub mod worker;  // Worker traits and transports
pub mod extract; // In-process feature extractor

// Re-exports for convenience
pub use core::config::{GeneratorEndpoint, OrchestratorConfig, WorkerEndpoint};
pub use core::errors::{OrchestratorError, Result};
pub use core::telemetry::init_tracing;

pub use coord::{
    Orchestrator, OrchestratorHandle, OrchestratorSnapshot, Phase, PipelineDriver, Request,
    RequestId, Section, Submission, TechPack,
};
pub use extract::SvgFeatureExtractor;
pub use worker::{
    CorrelatedCaller, HttpWorkerClient, LocalWorkerClient, TransportRouter, Worker, WorkerClient,
    WorkerRegistry,
};
