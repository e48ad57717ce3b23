use std::fmt;
use thiserror::Error;

/// Unified error type for the orchestration layer
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed or undecodable template payload; rejected before any worker is contacted
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// Transport failure reaching a worker
    #[error("Worker unavailable: {worker} - {message}")]
    WorkerUnavailable {
        worker: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A worker answered but the payload could not be interpreted
    #[error("Worker protocol error: {worker} - {message}")]
    WorkerProtocol {
        worker: String,
        message: String,
        raw: Option<String>,
    },

    /// The extractor answered with an error payload
    #[error("Feature extraction failed: {message}")]
    ExtractionFailed { message: String },

    /// Admission attempted while the orchestrator had no free slot
    #[error("Request {request_id} rejected: {reason}")]
    DuplicateRequestRejected { request_id: String, reason: String },

    /// A request stayed in one phase longer than allowed
    #[error("Timed out in {phase} after {timeout_ms}ms")]
    Timeout { phase: String, timeout_ms: u64 },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Mailbox or reply channel closed
    #[error("Channel error: {channel} - {message}")]
    Channel { channel: String, message: String },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl OrchestratorError {
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn worker_unavailable<W: Into<String>, M: Into<String>>(worker: W, message: M) -> Self {
        Self::WorkerUnavailable {
            worker: worker.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn worker_unavailable_with_source<W, M, E>(worker: W, message: M, source: E) -> Self
    where
        W: Into<String>,
        M: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WorkerUnavailable {
            worker: worker.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn worker_protocol<W: Into<String>, M: Into<String>>(worker: W, message: M) -> Self {
        Self::WorkerProtocol {
            worker: worker.into(),
            message: message.into(),
            raw: None,
        }
    }

    /// Protocol error that keeps the worker's uninterpretable output
    pub fn worker_protocol_raw<W, M, R>(worker: W, message: M, raw: R) -> Self
    where
        W: Into<String>,
        M: Into<String>,
        R: Into<String>,
    {
        Self::WorkerProtocol {
            worker: worker.into(),
            message: message.into(),
            raw: Some(raw.into()),
        }
    }

    pub fn extraction_failed<S: Into<String>>(message: S) -> Self {
        Self::ExtractionFailed {
            message: message.into(),
        }
    }

    pub fn duplicate_request<I: fmt::Display, R: Into<String>>(request_id: I, reason: R) -> Self {
        Self::DuplicateRequestRejected {
            request_id: request_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn timeout<P: fmt::Display>(phase: P, timeout_ms: u64) -> Self {
        Self::Timeout {
            phase: phase.to_string(),
            timeout_ms,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    pub fn channel<C: Into<String>, M: Into<String>>(channel: C, message: M) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::WorkerUnavailable { .. } => "worker_unavailable",
            Self::WorkerProtocol { .. } => "worker_protocol",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::DuplicateRequestRejected { .. } => "duplicate_request",
            Self::Timeout { .. } => "timeout",
            Self::Configuration { .. } => "configuration",
            Self::Serialization { .. } => "serialization",
            Self::Channel { .. } => "channel",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: "io operation failed".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}
