//! Interpreting worker replies as structured content
//!
//! Generators typically answer with free text from a language model. That
//! text is parsed as a JSON object, tolerating a surrounding markdown code
//! fence. A section that cannot be interpreted is replaced by an error
//! placeholder so it never blocks the other sections.

use serde_json::{json, Value};
use tracing::warn;

use crate::coord::types::{
    ContentMap, ExtractionResult, FeatureMap, Section, SectionOutcome, WorkerReply,
};
use crate::core::errors::{OrchestratorError, Result};

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    trimmed
}

/// Parse a generator's free-text output into a content map
pub fn parse_structured(worker: &str, text: &str) -> Result<ContentMap> {
    let candidate = strip_code_fence(text);
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(OrchestratorError::worker_protocol_raw(
            worker,
            format!("expected a JSON object, got {}", json_kind(&other)),
            text,
        )),
        Err(_) => Err(OrchestratorError::worker_protocol_raw(
            worker,
            "Invalid JSON",
            text,
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Content substituted for a section that failed
pub fn placeholder(error: &OrchestratorError) -> ContentMap {
    let value = match error {
        OrchestratorError::WorkerProtocol {
            message,
            raw: Some(raw),
            ..
        } => json!({ "error": message, "raw": raw }),
        OrchestratorError::WorkerProtocol { message, .. } => json!({ "error": message }),
        other => json!({ "error": other.to_string() }),
    };
    match value {
        Value::Object(map) => map,
        _ => ContentMap::new(),
    }
}

/// Resolve one section's reply into content, absorbing any failure
pub fn section_content(section: Section, outcome: Result<WorkerReply>) -> ContentMap {
    let failure = match outcome {
        Ok(WorkerReply::Section(result)) if result.section == section => match result.outcome {
            SectionOutcome::Content(content) => return content,
            SectionOutcome::Error(message) => {
                OrchestratorError::worker_protocol(section.as_str(), message)
            }
        },
        Ok(_) => OrchestratorError::worker_protocol(
            section.as_str(),
            "reply does not answer this section",
        ),
        Err(e) => e,
    };
    warn!(section = %section, error = %failure, "Section failed, substituting placeholder");
    placeholder(&failure)
}

/// Resolve the extractor's reply into features. Any failure is terminal.
pub fn extracted_features(outcome: Result<WorkerReply>) -> Result<FeatureMap> {
    match outcome? {
        WorkerReply::Extraction(ExtractionResult::Features(features)) => Ok(features),
        WorkerReply::Extraction(ExtractionResult::Error(message)) => {
            Err(OrchestratorError::extraction_failed(message))
        }
        WorkerReply::Section(result) => Err(OrchestratorError::worker_protocol(
            "extractor",
            format!("expected extraction result, got {} section", result.section),
        )),
    }
}
