//! Per-request working memory of the orchestrator
//!
//! ```text
//! IDLE -> EXTRACTING -> GENERATING -> IDLE
//!              |             |
//!              +--> FAILED <-+--> IDLE
//! ```
//!
//! IDLE is represented by the absence of a `RequestState`; FAILED is passed
//! through on the way out.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::coord::types::{FeatureMap, Request, RequestId, TechPack};
use crate::core::errors::{OrchestratorError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Extracting,
    Generating,
    Failed,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Extracting)
                | (Phase::Extracting, Phase::Generating)
                | (Phase::Extracting, Phase::Failed)
                | (Phase::Generating, Phase::Idle)
                | (Phase::Generating, Phase::Failed)
                | (Phase::Failed, Phase::Idle)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "IDLE",
            Phase::Extracting => "EXTRACTING",
            Phase::Generating => "GENERATING",
            Phase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

pub(crate) type OutcomeSender = oneshot::Sender<Result<TechPack>>;

/// Working memory for one admitted request. Only the orchestrator loop
/// mutates it.
#[derive(Debug)]
pub struct RequestState {
    phase: Phase,
    request: Request,
    features: Option<FeatureMap>,
    entered_at: Instant,
    outcome_tx: Option<OutcomeSender>,
}

impl RequestState {
    /// Admit a request: IDLE -> EXTRACTING
    pub(crate) fn admit(request: Request, outcome_tx: OutcomeSender) -> Self {
        Self {
            phase: Phase::Extracting,
            request,
            features: None,
            entered_at: Instant::now(),
            outcome_tx: Some(outcome_tx),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request.request_id
    }

    pub fn features(&self) -> Option<&FeatureMap> {
        self.features.as_ref()
    }

    pub fn time_in_phase(&self) -> std::time::Duration {
        self.entered_at.elapsed()
    }

    pub(crate) fn transition(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(OrchestratorError::internal(format!(
                "illegal transition {} -> {} for {}",
                self.phase, next, self.request.request_id
            )));
        }
        self.phase = next;
        self.entered_at = Instant::now();
        Ok(())
    }

    /// EXTRACTING -> GENERATING, keeping the extracted features
    pub(crate) fn begin_generating(&mut self, features: FeatureMap) -> Result<()> {
        self.transition(Phase::Generating)?;
        self.features = Some(features);
        Ok(())
    }

    /// Hand the terminal outcome to whoever submitted the request
    pub(crate) fn settle(&mut self, outcome: Result<TechPack>) -> bool {
        match self.outcome_tx.take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Read-only view of one in-flight request
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub request_id: RequestId,
    pub phase: Phase,
    pub outstanding_sections: Option<usize>,
    pub millis_in_phase: u64,
}

/// Read-only view of the orchestrator
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorSnapshot {
    pub in_flight: Vec<RequestSnapshot>,
}

impl OrchestratorSnapshot {
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn phase_of(&self, request_id: &RequestId) -> Phase {
        self.in_flight
            .iter()
            .find(|r| &r.request_id == request_id)
            .map(|r| r.phase)
            .unwrap_or(Phase::Idle)
    }
}
