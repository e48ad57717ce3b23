//! Message-driven orchestrator
//!
//! One task owns every `RequestState` and processes its mailbox strictly in
//! arrival order, so state is never shared or locked. Workers are reached
//! through fire-and-forget dispatch and their replies come back through the
//! same mailbox, tagged with the request id as correlation id.
//!
//! With the default `max_in_flight = 1` the orchestrator is single-flight:
//! a request arriving while another is in progress is rejected, not queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::coord::fan_in::FanIn;
use crate::coord::payload::{fetcher_for, normalize, TemplateFetcher};
use crate::coord::state::{
    OrchestratorSnapshot, OutcomeSender, Phase, RequestSnapshot, RequestState,
};
use crate::coord::types::{
    ContentMap, ExtractionTask, ReplyEnvelope, Request, RequestId, Section, SectionTask,
    TaskEnvelope, TaskKind, TechPack, WorkerReply, WorkerTask,
};
use crate::core::config::OrchestratorConfig;
use crate::core::errors::{OrchestratorError, Result};
use crate::worker::content::{extracted_features, section_content};
use crate::worker::{ReplySink, SpawnDispatcher, TaskDispatcher, WorkerClient};

const MAILBOX: &str = "orchestrator";

enum Inbound {
    Admit {
        request: Request,
        reply: OutcomeSender,
    },
    Reply(ReplyEnvelope),
    Deadline {
        request_id: RequestId,
        phase: Phase,
        token: u64,
        timeout: Duration,
    },
    Snapshot {
        reply: oneshot::Sender<OrchestratorSnapshot>,
    },
    Shutdown,
}

/// Routes worker replies into the mailbox without keeping it open
struct MailboxSink {
    mailbox: mpsc::WeakSender<Inbound>,
}

#[async_trait]
impl ReplySink for MailboxSink {
    async fn deliver(&self, reply: ReplyEnvelope) {
        let id = reply.correlation_id.clone();
        match self.mailbox.upgrade() {
            Some(tx) => {
                if tx.send(Inbound::Reply(reply)).await.is_err() {
                    debug!(request_id = %id, "Orchestrator stopped, reply dropped");
                }
            }
            None => debug!(request_id = %id, "Orchestrator gone, reply dropped"),
        }
    }
}

pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    dispatcher: Arc<dyn TaskDispatcher>,
    mailbox: mpsc::WeakSender<Inbound>,
    inflight: HashMap<RequestId, RequestState>,
    fan_in: FanIn<Section, ContentMap>,
    deadlines: HashMap<RequestId, u64>,
    next_token: u64,
}

impl Orchestrator {
    /// Start an orchestrator whose tasks are carried out by `client`.
    ///
    /// Must be called from within a tokio runtime. The loop stops when
    /// [`OrchestratorHandle::shutdown`] is called or every handle is dropped.
    pub fn spawn(config: OrchestratorConfig, client: Arc<dyn WorkerClient>) -> Result<OrchestratorHandle> {
        Self::spawn_with(config, |mailbox| {
            let sink = Arc::new(MailboxSink { mailbox });
            let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(SpawnDispatcher::new(client, sink));
            dispatcher
        })
    }

    /// Start an orchestrator over an externally driven transport. Replies
    /// must be fed back through [`OrchestratorHandle::deliver`].
    pub fn spawn_with_dispatcher(
        config: OrchestratorConfig,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Result<OrchestratorHandle> {
        Self::spawn_with(config, |_| dispatcher)
    }

    fn spawn_with<F>(config: OrchestratorConfig, make_dispatcher: F) -> Result<OrchestratorHandle>
    where
        F: FnOnce(mpsc::WeakSender<Inbound>) -> Arc<dyn TaskDispatcher>,
    {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            OrchestratorError::internal(format!("orchestrator needs a tokio runtime: {}", e))
        })?;

        let fetcher = fetcher_for(&config)?;
        let (tx, rx) = mpsc::channel(config.mailbox_capacity);
        let mailbox = tx.downgrade();
        let orchestrator = Orchestrator {
            config: Arc::new(config),
            dispatcher: make_dispatcher(mailbox.clone()),
            mailbox,
            inflight: HashMap::new(),
            fan_in: FanIn::new(),
            deadlines: HashMap::new(),
            next_token: 0,
        };
        runtime.spawn(orchestrator.run(rx));

        Ok(OrchestratorHandle { tx, fetcher })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Inbound>) {
        info!(
            max_in_flight = self.config.max_in_flight,
            sections = self.config.generators.len(),
            "Orchestrator started"
        );
        while let Some(message) = rx.recv().await {
            match message {
                Inbound::Admit { request, reply } => self.admit(request, reply),
                Inbound::Reply(reply) => self.on_reply(reply),
                Inbound::Deadline {
                    request_id,
                    phase,
                    token,
                    timeout,
                } => self.on_deadline(request_id, phase, token, timeout),
                Inbound::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Inbound::Shutdown => break,
            }
        }

        let abandoned: Vec<RequestId> = self.inflight.keys().cloned().collect();
        for id in abandoned {
            self.fail(&id, OrchestratorError::channel(MAILBOX, "orchestrator shut down"));
        }
        info!("Orchestrator stopped");
    }

    /// IDLE -> EXTRACTING, or rejection
    fn admit(&mut self, request: Request, reply: OutcomeSender) {
        let id = request.request_id.clone();
        let rejection = if self.inflight.contains_key(&id) {
            Some("request id already in flight")
        } else if self.inflight.len() >= self.config.max_in_flight {
            Some("orchestrator is busy")
        } else {
            None
        };
        if let Some(reason) = rejection {
            warn!(request_id = %id, in_flight = self.inflight.len(), reason, "Request rejected");
            let _ = reply.send(Err(OrchestratorError::duplicate_request(&id, reason)));
            return;
        }

        let task = WorkerTask::Extraction(ExtractionTask {
            template_payload: request.template_payload.as_str().to_string(),
            brief: request.brief.clone(),
        });
        info!(request_id = %id, brief = %request.brief, "Request admitted, extracting features");
        self.inflight
            .insert(id.clone(), RequestState::admit(request, reply));

        let envelope = TaskEnvelope::new(id.clone(), task);
        if let Err(e) = self.dispatcher.dispatch(&self.config.extractor.address, envelope) {
            self.fail(&id, e);
            return;
        }
        self.arm_deadline(&id, Phase::Extracting);
    }

    fn on_reply(&mut self, reply: ReplyEnvelope) {
        let ReplyEnvelope {
            correlation_id: id,
            worker,
            kind,
            outcome,
        } = reply;

        let Some(phase) = self.inflight.get(&id).map(RequestState::phase) else {
            warn!(request_id = %id, worker = %worker, kind = %kind, "Stray reply discarded, request not in flight");
            return;
        };

        match (kind, phase) {
            (TaskKind::Extraction, Phase::Extracting) => self.on_extraction(&id, outcome),
            (TaskKind::Section(section), Phase::Generating) if self.is_configured(section) => {
                self.on_section(&id, section, outcome)
            }
            _ => {
                warn!(request_id = %id, worker = %worker, kind = %kind, phase = %phase, "Stray reply discarded");
            }
        }
    }

    /// EXTRACTING -> GENERATING, fanning out one task per generator
    fn on_extraction(&mut self, id: &RequestId, outcome: Result<WorkerReply>) {
        let features = match extracted_features(outcome) {
            Ok(features) => features,
            Err(e) => {
                self.fail(id, e);
                return;
            }
        };
        let Some(state) = self.inflight.get_mut(id) else {
            return;
        };

        let request = state.request();
        let tasks: Vec<(Section, String, WorkerTask)> = self
            .config
            .generators
            .iter()
            .map(|generator| {
                let task = WorkerTask::Section(SectionTask {
                    section: generator.section,
                    brief: request.brief.clone(),
                    template_payload: request.template_payload.as_str().to_string(),
                    features: features.clone(),
                });
                (generator.section, generator.address.clone(), task)
            })
            .collect();

        if let Err(e) = state.begin_generating(features) {
            self.fail(id, e);
            return;
        }
        info!(request_id = %id, sections = tasks.len(), "Features extracted, generating sections");
        self.fan_in.open(id, tasks.len());
        self.arm_deadline(id, Phase::Generating);

        for (section, address, task) in tasks {
            if let Err(e) = self
                .dispatcher
                .dispatch(&address, TaskEnvelope::new(id.clone(), task))
            {
                let content = section_content(section, Err(e));
                if self.fan_in.record(id, section, content) {
                    self.complete(id);
                }
            }
        }
    }

    fn on_section(&mut self, id: &RequestId, section: Section, outcome: Result<WorkerReply>) {
        let content = section_content(section, outcome);
        if self.fan_in.record(id, section, content) {
            self.complete(id);
        }
    }

    /// GENERATING -> IDLE with the assembled result
    fn complete(&mut self, id: &RequestId) {
        let Some(mut state) = self.inflight.remove(id) else {
            return;
        };
        self.deadlines.remove(id);
        let sections = self.fan_in.drain(id);
        let features = state.features().cloned().unwrap_or_default();
        let pack = TechPack::assemble(state.request().brief.clone(), features, sections);

        if let Err(e) = state.transition(Phase::Idle) {
            error!(request_id = %id, error = %e, "Completing request in unexpected phase");
        }
        info!(request_id = %id, sections = pack.sections.len(), "Request complete");
        if !state.settle(Ok(pack)) {
            warn!(request_id = %id, "Submitter left before the result was ready");
        }
    }

    /// Any non-IDLE phase -> FAILED -> IDLE
    fn fail(&mut self, id: &RequestId, error: OrchestratorError) {
        let Some(mut state) = self.inflight.remove(id) else {
            return;
        };
        self.deadlines.remove(id);
        if self.fan_in.is_open(id) {
            self.fan_in.drain(id);
        }

        let from = state.phase();
        if let Err(e) = state.transition(Phase::Failed) {
            error!(request_id = %id, error = %e, "Failing request in unexpected phase");
        }
        error!(request_id = %id, phase = %from, category = error.category(), error = %error, "Request failed");
        state.settle(Err(error));
        if let Err(e) = state.transition(Phase::Idle) {
            error!(request_id = %id, error = %e, "Could not reset failed request");
        }
    }

    fn arm_deadline(&mut self, id: &RequestId, phase: Phase) {
        let timeout = match phase {
            Phase::Extracting => self.config.extraction_timeout(),
            Phase::Generating => self.config.generation_timeout(),
            _ => None,
        };
        let Some(timeout) = timeout else {
            self.deadlines.remove(id);
            return;
        };

        self.next_token += 1;
        let token = self.next_token;
        self.deadlines.insert(id.clone(), token);

        let mailbox = self.mailbox.clone();
        let request_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx
                    .send(Inbound::Deadline {
                        request_id,
                        phase,
                        token,
                        timeout,
                    })
                    .await;
            }
        });
    }

    fn on_deadline(&mut self, id: RequestId, phase: Phase, token: u64, timeout: Duration) {
        if self.deadlines.get(&id) != Some(&token) {
            debug!(request_id = %id, phase = %phase, "Stale deadline ignored");
            return;
        }
        warn!(request_id = %id, phase = %phase, timeout_ms = timeout.as_millis() as u64, "Request timed out");
        self.fail(&id, OrchestratorError::timeout(phase, timeout.as_millis() as u64));
    }

    fn is_configured(&self, section: Section) -> bool {
        self.config.generators.iter().any(|g| g.section == section)
    }

    fn snapshot(&self) -> OrchestratorSnapshot {
        let mut in_flight: Vec<RequestSnapshot> = self
            .inflight
            .values()
            .map(|state| RequestSnapshot {
                request_id: state.request_id().clone(),
                phase: state.phase(),
                outstanding_sections: self.fan_in.remaining(state.request_id()),
                millis_in_phase: state.time_in_phase().as_millis() as u64,
            })
            .collect();
        in_flight.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        OrchestratorSnapshot { in_flight }
    }
}

/// A request that has been handed to the orchestrator
#[derive(Debug)]
pub struct Submission {
    request_id: RequestId,
    rx: oneshot::Receiver<Result<TechPack>>,
}

impl Submission {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Wait for the terminal outcome. A rejected admission resolves
    /// immediately with `DuplicateRequestRejected`.
    pub async fn outcome(self) -> Result<TechPack> {
        self.rx.await.map_err(|_| {
            OrchestratorError::channel(MAILBOX, "orchestrator stopped before answering")
        })?
    }
}

/// Cloneable front door to a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Inbound>,
    fetcher: Arc<dyn TemplateFetcher>,
}

impl OrchestratorHandle {
    /// Replace the fetcher used for remote template references
    pub fn with_fetcher(mut self, fetcher: Arc<dyn TemplateFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Normalize the payload, submit, and wait for the result.
    ///
    /// Invalid payloads are rejected here, before the orchestrator or any
    /// worker sees them.
    pub async fn submit(&self, brief: impl Into<String>, template_payload: &str) -> Result<TechPack> {
        let payload = normalize(template_payload, self.fetcher.as_ref()).await?;
        self.begin(Request::new(brief, payload)).await?.outcome().await
    }

    /// Hand an already-normalized request to the orchestrator
    pub async fn begin(&self, request: Request) -> Result<Submission> {
        let request_id = request.request_id.clone();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Inbound::Admit { request, reply })
            .await
            .map_err(|_| OrchestratorError::channel(MAILBOX, "orchestrator is not running"))?;
        Ok(Submission { request_id, rx })
    }

    /// Feed back a reply from an externally driven transport
    pub async fn deliver(&self, reply: ReplyEnvelope) -> Result<()> {
        self.tx
            .send(Inbound::Reply(reply))
            .await
            .map_err(|_| OrchestratorError::channel(MAILBOX, "orchestrator is not running"))
    }

    pub async fn snapshot(&self) -> Result<OrchestratorSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Inbound::Snapshot { reply })
            .await
            .map_err(|_| OrchestratorError::channel(MAILBOX, "orchestrator is not running"))?;
        rx.await
            .map_err(|_| OrchestratorError::channel(MAILBOX, "orchestrator stopped"))
    }

    /// Stop the loop. Requests still in flight fail with a channel error.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(Inbound::Shutdown)
            .await
            .map_err(|_| OrchestratorError::channel(MAILBOX, "orchestrator is not running"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::payload::TemplatePayload;
    use crate::coord::types::{ExtractionResult, SectionResult};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Transport that records dispatches; replies are delivered by hand
    #[derive(Default)]
    struct RecordingBus {
        sent: Mutex<Vec<(String, TaskEnvelope)>>,
    }

    impl RecordingBus {
        fn kinds(&self) -> Vec<TaskKind> {
            self.sent.lock().iter().map(|(_, e)| e.task.kind()).collect()
        }
    }

    impl TaskDispatcher for RecordingBus {
        fn dispatch(&self, address: &str, envelope: TaskEnvelope) -> Result<()> {
            self.sent.lock().push((address.to_string(), envelope));
            Ok(())
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            allow_remote_templates: false,
            ..Default::default()
        }
    }

    fn request(id: &str) -> Request {
        Request::new("Hoodie", TemplatePayload::from_markup("<svg width=\"100\" height=\"220\"/>"))
            .with_id(id)
    }

    fn features_reply(id: &str) -> ReplyEnvelope {
        let features = json!({"elementCount": 12}).as_object().cloned().unwrap();
        ReplyEnvelope {
            correlation_id: id.into(),
            worker: "extractor".into(),
            kind: TaskKind::Extraction,
            outcome: Ok(WorkerReply::Extraction(ExtractionResult::Features(features))),
        }
    }

    fn section_reply(id: &str, section: Section) -> ReplyEnvelope {
        let content = json!({"ok": section.as_str()}).as_object().cloned().unwrap();
        ReplyEnvelope {
            correlation_id: id.into(),
            worker: section.as_str().into(),
            kind: TaskKind::Section(section),
            outcome: Ok(WorkerReply::Section(SectionResult::content(section, content))),
        }
    }

    #[tokio::test]
    async fn test_section_reply_before_extraction_is_stray() {
        let bus = Arc::new(RecordingBus::default());
        let handle = Orchestrator::spawn_with_dispatcher(config(), bus.clone()).unwrap();
        let submission = handle.begin(request("r1")).await.unwrap();

        handle.deliver(section_reply("r1", Section::Design)).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase_of(&"r1".into()), Phase::Extracting);
        assert_eq!(bus.kinds(), vec![TaskKind::Extraction]);

        handle.deliver(features_reply("r1")).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase_of(&"r1".into()), Phase::Generating);
        assert_eq!(snapshot.in_flight[0].outstanding_sections, Some(2));

        handle.deliver(section_reply("r1", Section::Materials)).await.unwrap();
        // duplicate before completion does not count twice
        handle.deliver(section_reply("r1", Section::Materials)).await.unwrap();
        assert_eq!(
            handle.snapshot().await.unwrap().in_flight[0].outstanding_sections,
            Some(1)
        );
        handle.deliver(section_reply("r1", Section::Design)).await.unwrap();

        let pack = submission.outcome().await.unwrap();
        assert_eq!(pack.sections.len(), 2);
        assert_eq!(pack.features["elementCount"], 12);
        assert!(handle.snapshot().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn test_unconfigured_section_cannot_complete_fan_in() {
        let bus = Arc::new(RecordingBus::default());
        let handle = Orchestrator::spawn_with_dispatcher(config(), bus).unwrap();
        let _submission = handle.begin(request("r1")).await.unwrap();
        handle.deliver(features_reply("r1")).await.unwrap();

        handle.deliver(section_reply("r1", Section::Construction)).await.unwrap();
        handle.deliver(section_reply("r1", Section::Design)).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase_of(&"r1".into()), Phase::Generating);
        assert_eq!(snapshot.in_flight[0].outstanding_sections, Some(1));
    }

    #[tokio::test]
    async fn test_reply_after_completion_is_ignored() {
        let bus = Arc::new(RecordingBus::default());
        let handle = Orchestrator::spawn_with_dispatcher(config(), bus).unwrap();
        let submission = handle.begin(request("r1")).await.unwrap();
        handle.deliver(features_reply("r1")).await.unwrap();
        handle.deliver(section_reply("r1", Section::Design)).await.unwrap();
        handle.deliver(section_reply("r1", Section::Materials)).await.unwrap();
        assert!(submission.outcome().await.is_ok());

        handle.deliver(section_reply("r1", Section::Design)).await.unwrap();
        handle.deliver(features_reply("r1")).await.unwrap();
        assert!(handle.snapshot().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_while_in_flight() {
        let bus = Arc::new(RecordingBus::default());
        let config = OrchestratorConfig {
            max_in_flight: 4,
            ..config()
        };
        let handle = Orchestrator::spawn_with_dispatcher(config, bus.clone()).unwrap();
        let _first = handle.begin(request("same")).await.unwrap();
        let second = handle.begin(request("same")).await.unwrap();
        let err = second.outcome().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateRequestRejected { .. }));
        assert_eq!(bus.kinds().len(), 1);

        let other = handle.begin(request("other")).await.unwrap();
        assert_eq!(other.request_id().as_str(), "other");
        assert_eq!(handle.snapshot().await.unwrap().in_flight.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_fails_in_flight_requests() {
        let handle =
            Orchestrator::spawn_with_dispatcher(config(), Arc::new(RecordingBus::default())).unwrap();
        let submission = handle.begin(request("r1")).await.unwrap();
        handle.shutdown().await.unwrap();
        let err = submission.outcome().await.unwrap_err();
        assert_eq!(err.category(), "channel");
    }

    #[tokio::test]
    async fn test_extraction_error_payload_fails_request() {
        let bus = Arc::new(RecordingBus::default());
        let handle = Orchestrator::spawn_with_dispatcher(config(), bus.clone()).unwrap();
        let submission = handle.begin(request("r1")).await.unwrap();
        handle
            .deliver(ReplyEnvelope {
                correlation_id: "r1".into(),
                worker: "extractor".into(),
                kind: TaskKind::Extraction,
                outcome: Ok(WorkerReply::Extraction(ExtractionResult::Error(
                    "Could not parse SVG".into(),
                ))),
            })
            .await
            .unwrap();

        let err = submission.outcome().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ExtractionFailed { .. }));
        assert_eq!(bus.kinds(), vec![TaskKind::Extraction]);
        assert!(handle.snapshot().await.unwrap().is_idle());
    }
}
