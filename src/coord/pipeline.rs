//! Synchronous pipeline driver
//!
//! Awaits each step directly: normalize, extract, generate every section
//! concurrently behind a join barrier, assemble. Holds no per-request state,
//! so any number of runs may proceed at once.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{error, info};

use crate::coord::payload::{fetcher_for, normalize, TemplateFetcher};
use crate::coord::types::{
    ExtractionTask, RequestId, SectionTask, TaskKind, TechPack, WorkerReply, WorkerTask,
};
use crate::core::config::OrchestratorConfig;
use crate::core::errors::{OrchestratorError, Result};
use crate::worker::content::{extracted_features, section_content};
use crate::worker::{expect_kind, WorkerClient};

pub struct PipelineDriver {
    config: Arc<OrchestratorConfig>,
    client: Arc<dyn WorkerClient>,
    fetcher: Arc<dyn TemplateFetcher>,
}

impl PipelineDriver {
    pub fn new(config: OrchestratorConfig, client: Arc<dyn WorkerClient>) -> Result<Self> {
        config.validate()?;
        let fetcher = fetcher_for(&config)?;
        Ok(Self {
            config: Arc::new(config),
            client,
            fetcher,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn TemplateFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one request end to end.
    ///
    /// Invalid input and extractor failures abort the run. Section failures
    /// are replaced by placeholders so the result always has every section.
    pub async fn run(&self, brief: &str, template_payload: &str) -> Result<TechPack> {
        let run_id = RequestId::new();
        let started = Instant::now();
        let payload = normalize(template_payload, self.fetcher.as_ref()).await?;
        info!(run_id = %run_id, brief = %brief, "Pipeline run started");

        let extractor = self.config.extractor.address.as_str();
        let task = WorkerTask::Extraction(ExtractionTask {
            template_payload: payload.as_str().to_string(),
            brief: brief.to_string(),
        });
        let outcome = bounded("extraction", self.config.extraction_timeout(), self.client.call(extractor, task))
            .await
            .and_then(|reply| expect_kind(extractor, TaskKind::Extraction, reply));
        let features = extracted_features(outcome).map_err(|e| {
            error!(run_id = %run_id, category = e.category(), error = %e, "Extraction failed, aborting run");
            e
        })?;

        let calls = self.config.generators.iter().map(|generator| {
            let task = WorkerTask::Section(SectionTask {
                section: generator.section,
                brief: brief.to_string(),
                template_payload: payload.as_str().to_string(),
                features: features.clone(),
            });
            let address = generator.address.as_str();
            let section = generator.section;
            let timeout = self.config.generation_timeout();
            async move {
                let outcome = bounded("generation", timeout, self.client.call(address, task))
                    .await
                    .and_then(|reply| expect_kind(address, TaskKind::Section(section), reply));
                (section, section_content(section, outcome))
            }
        });
        let sections: BTreeMap<_, _> = join_all(calls).await.into_iter().collect();

        info!(
            run_id = %run_id,
            sections = sections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );
        Ok(TechPack::assemble(brief, features, sections))
    }
}

async fn bounded<F>(phase: &str, timeout: Option<Duration>, call: F) -> Result<WorkerReply>
where
    F: Future<Output = Result<WorkerReply>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| OrchestratorError::timeout(phase, limit.as_millis() as u64))?,
        None => call.await,
    }
}
