//! Produce one tech pack from an SVG template.
//!
//! Usage: `techpack-example [config.yaml] [template.svg] [brief]`
//!
//! Without a config file the section generators run in-process with canned
//! heuristics, so the demo works offline. With one, generators at
//! `http(s)://` addresses are reached over HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use techpack::coord::types::{ContentMap, SectionResult, WorkerReply, WorkerTask};
use techpack::{
    init_tracing, GeneratorEndpoint, HttpWorkerClient, LocalWorkerClient, Orchestrator,
    OrchestratorConfig, PipelineDriver, Section, SvgFeatureExtractor, TransportRouter, Worker,
    WorkerClient, WorkerEndpoint, WorkerRegistry,
};

const HOODIE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="220">
  <g id="body"><path d="M20 10 L80 10 L90 200 L10 200 Z" fill="#2f4f4f" stroke="#111111"/></g>
  <g id="hood"><path d="M35 10 C35 -10 65 -10 65 10" fill="#2f4f4f"/></g>
  <rect id="kangaroo-pocket" x="30" y="120" width="40" height="25" fill="#2f4f4f"/>
  <line x1="50" y1="10" x2="50" y2="40" stroke="#cccccc"/>
</svg>"##;

/// Offline stand-in for a language-model backed generator
struct HeuristicGenerator;

impl HeuristicGenerator {
    fn content(section: Section, brief: &str, features: &ContentMap) -> Value {
        let silhouette = features
            .get("estimated_silhouette")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        match section {
            Section::Design => json!({
                "style": format!("{} ({})", brief, silhouette),
                "details": features.get("detected_features").cloned().unwrap_or(Value::Null),
                "palette": features.get("colors").and_then(|c| c.get("fills")).cloned(),
            }),
            Section::Materials => json!({
                "shell": "cotton fleece, 320 gsm",
                "trims": ["rib knit cuffs", "flat drawcord"],
            }),
            Section::Construction => json!({
                "seams": "overlocked, twin-needle coverstitch at hems",
                "detail_level": features.get("detail_level").cloned(),
            }),
        }
    }
}

#[async_trait]
impl Worker for HeuristicGenerator {
    fn name(&self) -> &str {
        "heuristic-generator"
    }

    async fn handle(&self, task: WorkerTask) -> anyhow::Result<WorkerReply> {
        let WorkerTask::Section(task) = task else {
            anyhow::bail!("generators only accept section tasks");
        };
        let content = match Self::content(task.section, &task.brief, &task.features) {
            Value::Object(map) => map,
            _ => ContentMap::new(),
        };
        Ok(WorkerReply::Section(SectionResult::content(task.section, content)))
    }
}

fn offline_config() -> OrchestratorConfig {
    OrchestratorConfig {
        extractor: WorkerEndpoint::new("local://svg-extractor"),
        generators: vec![
            GeneratorEndpoint::new(Section::Design, "local://design"),
            GeneratorEndpoint::new(Section::Materials, "local://materials"),
            GeneratorEndpoint::new(Section::Construction, "local://construction"),
        ],
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let mut args = std::env::args().skip(1);

    let config = match args.next() {
        Some(path) => OrchestratorConfig::from_yaml_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => offline_config(),
    };
    let template = match args.next() {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading template {}", path))?,
        None => HOODIE.to_string(),
    };
    let brief = args.next().unwrap_or_else(|| "Hoodie".to_string());

    let registry = WorkerRegistry::new();
    registry.register("local://svg-extractor", Arc::new(SvgFeatureExtractor));
    for section in [Section::Design, Section::Materials, Section::Construction] {
        registry.register(format!("local://{}", section), Arc::new(HeuristicGenerator));
    }
    let remote = HttpWorkerClient::new(Duration::from_secs(config.call_timeout_secs))?;
    let client: Arc<dyn WorkerClient> =
        Arc::new(TransportRouter::new(LocalWorkerClient::new(registry)).with_remote(Arc::new(remote)));

    // Synchronous variant
    let driver = PipelineDriver::new(config.clone(), client.clone())?;
    let pack = driver.run(&brief, &template).await?;
    info!(sections = pack.sections.len(), "Pipeline driver finished");
    println!("{}", serde_json::to_string_pretty(&pack)?);

    // Message-driven variant over the same workers
    let handle = Orchestrator::spawn(config, client)?;
    let pack = handle.submit(brief, &template).await?;
    info!(sections = pack.sections.len(), "Orchestrator finished");
    handle.shutdown().await?;

    Ok(())
}
