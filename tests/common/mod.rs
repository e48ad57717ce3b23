//! Shared harness: a scripted transport standing in for real workers

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;

use techpack::coord::types::{
    ExtractionResult, SectionResult, TaskKind, WorkerReply, WorkerTask,
};
use techpack::{GeneratorEndpoint, OrchestratorConfig, OrchestratorError, Result, Section, WorkerClient, WorkerEndpoint};

pub const EXTRACTOR: &str = "mem://extractor";
pub const DESIGN: &str = "mem://design";
pub const MATERIALS: &str = "mem://materials";

pub const HOODIE_SVG: &str = r#"<svg width="100" height="220"><path d="M0 0 L10 10"/></svg>"#;

pub type Script = Arc<dyn Fn(&WorkerTask) -> Result<WorkerReply> + Send + Sync>;

#[derive(Clone)]
struct Route {
    script: Script,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

/// Transport whose workers are closures, with per-route delays and gates
#[derive(Default)]
pub struct ScriptedClient {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<(String, TaskKind)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, address: &str, script: Script) -> Self {
        self.routes.lock().insert(
            address.to_string(),
            Route {
                script,
                delay: None,
                gate: None,
            },
        );
        self
    }

    pub fn with_delay(self, address: &str, delay: Duration) -> Self {
        if let Some(route) = self.routes.lock().get_mut(address) {
            route.delay = Some(delay);
        }
        self
    }

    /// Calls to `address` block until the gate has a permit
    pub fn with_gate(self, address: &str, gate: Arc<Semaphore>) -> Self {
        if let Some(route) = self.routes.lock().get_mut(address) {
            route.gate = Some(gate);
        }
        self
    }

    pub fn calls(&self) -> Vec<(String, TaskKind)> {
        self.calls.lock().clone()
    }

    pub fn section_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(_, kind)| matches!(kind, TaskKind::Section(_)))
            .count()
    }

    pub fn extraction_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(_, kind)| matches!(kind, TaskKind::Extraction))
            .count()
    }
}

#[async_trait]
impl WorkerClient for ScriptedClient {
    async fn call(&self, address: &str, task: WorkerTask) -> Result<WorkerReply> {
        self.calls.lock().push((address.to_string(), task.kind()));
        let route = self.routes.lock().get(address).cloned();
        let Some(route) = route else {
            return Err(OrchestratorError::worker_unavailable(address, "connection refused"));
        };
        if let Some(gate) = &route.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| OrchestratorError::worker_unavailable(address, "gate closed"))?;
            permit.forget();
        }
        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }
        (route.script)(&task)
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn features(value: Value) -> Script {
    Arc::new(move |_| {
        Ok(WorkerReply::Extraction(ExtractionResult::Features(object(
            value.clone(),
        ))))
    })
}

pub fn content(value: Value) -> Script {
    Arc::new(move |task| match task {
        WorkerTask::Section(t) => Ok(WorkerReply::Section(SectionResult::content(
            t.section,
            object(value.clone()),
        ))),
        WorkerTask::Extraction(_) => Err(OrchestratorError::worker_protocol(
            "generator",
            "unexpected extraction task",
        )),
    })
}

pub fn failing(make: fn() -> OrchestratorError) -> Script {
    Arc::new(move |_| Err(make()))
}

/// Hoodie scenario: extractor plus design and materials generators
pub fn hoodie_client() -> ScriptedClient {
    ScriptedClient::new()
        .with(EXTRACTOR, features(json!({"elementCount": 12, "aspectRatio": 2.2})))
        .with(DESIGN, content(json!({"style": "oversized"})))
        .with(MATERIALS, content(json!({"shell": "cotton fleece"})))
}

pub fn hoodie_expected() -> Value {
    json!({
        "brief": "Hoodie",
        "features": {"elementCount": 12, "aspectRatio": 2.2},
        "sections": {
            "design": {"style": "oversized"},
            "materials": {"shell": "cotton fleece"}
        }
    })
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        extractor: WorkerEndpoint::new(EXTRACTOR),
        generators: vec![
            GeneratorEndpoint::new(Section::Design, DESIGN),
            GeneratorEndpoint::new(Section::Materials, MATERIALS),
        ],
        allow_remote_templates: false,
        ..Default::default()
    }
}

/// Counts calls and fails the first `failures` of them
pub fn flaky_then(failures: usize, then: Script) -> Script {
    let seen = AtomicUsize::new(0);
    Arc::new(move |task| {
        if seen.fetch_add(1, Ordering::SeqCst) < failures {
            Err(OrchestratorError::worker_unavailable(EXTRACTOR, "connection reset"))
        } else {
            then(task)
        }
    })
}
