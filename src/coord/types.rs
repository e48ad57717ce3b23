//! Data model shared by the message-driven orchestrator and the pipeline driver
//!
//! Task and reply shapes are the stable wire contract with workers; field
//! names serialize in camelCase.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::coord::payload::TemplatePayload;
use crate::core::errors::{OrchestratorError, Result};

/// Structured output of the extractor. Opaque to the orchestrator.
pub type FeatureMap = Map<String, Value>;

/// Structured content of one generated section
pub type ContentMap = Map<String, Value>;

/// Opaque identifier of one orchestration attempt or one correlated call
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Named, independently generated portion of the final document
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Design,
    Materials,
    Construction,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Design => "design",
            Section::Materials => "materials",
            Section::Construction => "construction",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "design" => Ok(Section::Design),
            "materials" => Ok(Section::Materials),
            "construction" => Ok(Section::Construction),
            other => Err(OrchestratorError::invalid_field(
                format!("unknown section '{}'", other),
                "section",
            )),
        }
    }
}

/// One orchestration attempt. Immutable once admitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: RequestId,
    pub brief: String,
    pub template_payload: TemplatePayload,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn new(brief: impl Into<String>, template_payload: TemplatePayload) -> Self {
        Self {
            request_id: RequestId::new(),
            brief: brief.into(),
            template_payload,
            created_at: Utc::now(),
        }
    }

    /// Use a caller-supplied identifier instead of a generated one
    pub fn with_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionTask {
    pub template_payload: String,
    pub brief: String,
}

/// `{"features": {...}}` or `{"error": "..."}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionResult {
    Features(FeatureMap),
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionTask {
    pub section: Section,
    pub brief: String,
    pub template_payload: String,
    pub features: FeatureMap,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SectionOutcome {
    Content(ContentMap),
    Error(String),
}

/// `{"section": ..., "content": {...}}` or `{"section": ..., "error": "..."}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    pub section: Section,
    #[serde(flatten)]
    pub outcome: SectionOutcome,
}

impl SectionResult {
    pub fn content(section: Section, content: ContentMap) -> Self {
        Self {
            section,
            outcome: SectionOutcome::Content(content),
        }
    }

    pub fn error(section: Section, message: impl Into<String>) -> Self {
        Self {
            section,
            outcome: SectionOutcome::Error(message.into()),
        }
    }
}

/// Closed set of task kinds, one variant per worker type.
///
/// Serializes as `{"type": "SectionTask", "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkerTask {
    #[serde(rename = "ExtractionTask")]
    Extraction(ExtractionTask),
    #[serde(rename = "SectionTask")]
    Section(SectionTask),
}

impl WorkerTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            WorkerTask::Extraction(_) => TaskKind::Extraction,
            WorkerTask::Section(task) => TaskKind::Section(task.section),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WorkerTask::Extraction(_) => "ExtractionTask",
            WorkerTask::Section(_) => "SectionTask",
        }
    }
}

/// What a dispatched task was for, kept alongside its reply so that a
/// transport failure can still be attributed to the right step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Extraction,
    Section(Section),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Extraction => f.write_str("extraction"),
            TaskKind::Section(section) => write!(f, "section:{}", section),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkerReply {
    #[serde(rename = "ExtractionResult")]
    Extraction(ExtractionResult),
    #[serde(rename = "SectionResult")]
    Section(SectionResult),
}

impl WorkerReply {
    pub fn matches(&self, kind: TaskKind) -> bool {
        match (self, kind) {
            (WorkerReply::Extraction(_), TaskKind::Extraction) => true,
            (WorkerReply::Section(result), TaskKind::Section(section)) => result.section == section,
            _ => false,
        }
    }
}

/// A task addressed to a worker together with its correlation id
#[derive(Clone, Debug)]
pub struct TaskEnvelope {
    pub correlation_id: RequestId,
    pub task: WorkerTask,
    pub dispatched_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(correlation_id: RequestId, task: WorkerTask) -> Self {
        Self {
            correlation_id,
            task,
            dispatched_at: Utc::now(),
        }
    }
}

/// A worker's answer (or the transport's failure) routed back to its sender
#[derive(Debug)]
pub struct ReplyEnvelope {
    pub correlation_id: RequestId,
    pub worker: String,
    pub kind: TaskKind,
    pub outcome: Result<WorkerReply>,
}

/// Final assembled document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TechPack {
    pub brief: String,
    pub features: FeatureMap,
    pub sections: BTreeMap<Section, ContentMap>,
}

impl TechPack {
    pub fn assemble(
        brief: impl Into<String>,
        features: FeatureMap,
        sections: BTreeMap<Section, ContentMap>,
    ) -> Self {
        Self {
            brief: brief.into(),
            features,
            sections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_section_task_wire_shape() {
        let task = WorkerTask::Section(SectionTask {
            section: Section::Design,
            brief: "Hoodie".to_string(),
            template_payload: "PHN2Zy8+".to_string(),
            features: object(json!({"elementCount": 12})),
        });
        let wire = serde_json::to_value(&task).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "SectionTask",
                "data": {
                    "section": "design",
                    "brief": "Hoodie",
                    "templatePayload": "PHN2Zy8+",
                    "features": {"elementCount": 12}
                }
            })
        );
    }

    #[test]
    fn test_result_variants_wire_shape() {
        let ok = SectionResult::content(Section::Materials, object(json!({"shell": "cotton"})));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"section": "materials", "content": {"shell": "cotton"}})
        );

        let failed: SectionResult =
            serde_json::from_value(json!({"section": "design", "error": "quota"})).unwrap();
        assert_eq!(failed.outcome, SectionOutcome::Error("quota".to_string()));

        let extraction: ExtractionResult =
            serde_json::from_value(json!({"features": {"aspectRatio": 2.2}})).unwrap();
        assert!(matches!(extraction, ExtractionResult::Features(_)));
    }

    #[test]
    fn test_techpack_sections_keyed_by_name() {
        let mut sections = BTreeMap::new();
        sections.insert(Section::Materials, object(json!({"shell": "cotton fleece"})));
        sections.insert(Section::Design, object(json!({"style": "oversized"})));
        let pack = TechPack::assemble("Hoodie", FeatureMap::new(), sections);
        let wire = serde_json::to_value(&pack).unwrap();
        assert_eq!(wire["sections"]["design"]["style"], "oversized");
        assert_eq!(wire["sections"]["materials"]["shell"], "cotton fleece");
    }

    #[test]
    fn test_section_parse() {
        assert_eq!("Materials".parse::<Section>().unwrap(), Section::Materials);
        assert!("sleeves".parse::<Section>().is_err());
    }

    #[test]
    fn test_reply_matches_kind() {
        let reply = WorkerReply::Section(SectionResult::error(Section::Design, "x"));
        assert!(reply.matches(TaskKind::Section(Section::Design)));
        assert!(!reply.matches(TaskKind::Section(Section::Materials)));
        assert!(!reply.matches(TaskKind::Extraction));
    }
}
