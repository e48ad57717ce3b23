//! Orchestrator configuration
//!
//! Loaded from YAML or built in code. Every field has a default, so a
//! partial file only overrides what it names.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coord::types::Section;
use crate::core::errors::{OrchestratorError, Result};

/// Address of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    pub address: String,
}

impl WorkerEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// A section generator and where to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorEndpoint {
    pub section: Section,
    pub address: String,
}

impl GeneratorEndpoint {
    pub fn new(section: Section, address: impl Into<String>) -> Self {
        Self {
            section,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub extractor: WorkerEndpoint,
    pub generators: Vec<GeneratorEndpoint>,
    /// 1 keeps the orchestrator single-flight
    pub max_in_flight: usize,
    pub mailbox_capacity: usize,
    pub extraction_timeout_secs: Option<u64>,
    pub generation_timeout_secs: Option<u64>,
    pub call_timeout_secs: u64,
    pub allow_remote_templates: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            extractor: WorkerEndpoint::new("local://svg-extractor"),
            generators: vec![
                GeneratorEndpoint::new(Section::Design, "http://localhost:8001/submit"),
                GeneratorEndpoint::new(Section::Materials, "http://localhost:8002/submit"),
            ],
            max_in_flight: 1,
            mailbox_capacity: 64,
            extraction_timeout_secs: None,
            generation_timeout_secs: None,
            call_timeout_secs: 30,
            allow_remote_templates: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.extractor.address.trim().is_empty() {
            return Err(OrchestratorError::configuration_field(
                "extractor address must not be empty",
                "extractor.address",
            ));
        }
        if self.generators.is_empty() {
            return Err(OrchestratorError::configuration_field(
                "at least one section generator is required",
                "generators",
            ));
        }
        let mut seen = HashSet::new();
        for generator in &self.generators {
            if generator.address.trim().is_empty() {
                return Err(OrchestratorError::configuration_field(
                    format!("address for section '{}' must not be empty", generator.section),
                    "generators.address",
                ));
            }
            if !seen.insert(generator.section) {
                return Err(OrchestratorError::configuration_field(
                    format!("section '{}' is configured more than once", generator.section),
                    "generators.section",
                ));
            }
        }
        if self.max_in_flight == 0 {
            return Err(OrchestratorError::configuration_field(
                "max_in_flight must be greater than 0",
                "max_in_flight",
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(OrchestratorError::configuration_field(
                "mailbox_capacity must be greater than 0",
                "mailbox_capacity",
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(OrchestratorError::configuration_field(
                "call_timeout_secs must be greater than 0",
                "call_timeout_secs",
            ));
        }
        for (field, value) in [
            ("extraction_timeout_secs", self.extraction_timeout_secs),
            ("generation_timeout_secs", self.generation_timeout_secs),
        ] {
            if value == Some(0) {
                return Err(OrchestratorError::configuration_field(
                    format!("{} must be greater than 0", field),
                    field,
                ));
            }
        }
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn extraction_timeout(&self) -> Option<Duration> {
        self.extraction_timeout_secs.map(Duration::from_secs)
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_secs.map(Duration::from_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn sections(&self) -> Vec<Section> {
        self.generators.iter().map(|g| g.section).collect()
    }
}
