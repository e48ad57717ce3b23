//! HTTP transport for remote workers
//!
//! Each task is POSTed as `{"type": "<TaskType>", "data": {...}}` and the
//! response body is the worker's reply. Replies may also arrive wrapped in
//! the same `{type, data}` envelope.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use crate::coord::types::{
    ExtractionResult, Section, SectionResult, WorkerReply, WorkerTask,
};
use crate::core::errors::{OrchestratorError, Result};
use crate::worker::content::parse_structured;
use crate::worker::WorkerClient;

pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                OrchestratorError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn call(&self, address: &str, task: WorkerTask) -> Result<WorkerReply> {
        debug!(worker = %address, task = task.type_name(), "POST worker task");
        let response = self
            .client
            .post(address)
            .json(&task)
            .send()
            .await
            .map_err(|e| {
                error!(worker = %address, error = %e, "Worker request failed");
                OrchestratorError::worker_unavailable_with_source(address, "request failed", e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::worker_unavailable(
                address,
                format!("HTTP {}", status),
            ));
        }

        let body = response.text().await.map_err(|e| {
            OrchestratorError::worker_unavailable_with_source(address, "reading response failed", e)
        })?;
        let value: Value = serde_json::from_str(&body).map_err(|_| {
            OrchestratorError::worker_protocol_raw(address, "response is not JSON", body.clone())
        })?;
        decode_reply(address, &task, value)
    }
}

fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("type") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Interpret a worker's JSON body as the reply to `task`
pub fn decode_reply(address: &str, task: &WorkerTask, value: Value) -> Result<WorkerReply> {
    let Value::Object(mut body) = unwrap_envelope(value) else {
        return Err(OrchestratorError::worker_protocol(
            address,
            "response is not a JSON object",
        ));
    };

    match task {
        WorkerTask::Extraction(_) => {
            if let Some(Value::Object(features)) = body.remove("features") {
                return Ok(WorkerReply::Extraction(ExtractionResult::Features(features)));
            }
            if let Some(Value::String(message)) = body.remove("error") {
                return Ok(WorkerReply::Extraction(ExtractionResult::Error(message)));
            }
            Err(OrchestratorError::worker_protocol(
                address,
                "extractor returned no features",
            ))
        }
        WorkerTask::Section(section_task) => {
            let section = match body.remove("section") {
                Some(Value::String(name)) => name.parse::<Section>().map_err(|_| {
                    OrchestratorError::worker_protocol(address, format!("unknown section '{}'", name))
                })?,
                _ => section_task.section,
            };
            match body.remove("content") {
                Some(Value::Object(content)) => {
                    Ok(WorkerReply::Section(SectionResult::content(section, content)))
                }
                Some(Value::String(text)) => {
                    let content = parse_structured(address, &text)?;
                    Ok(WorkerReply::Section(SectionResult::content(section, content)))
                }
                Some(_) => Err(OrchestratorError::worker_protocol(
                    address,
                    "section content is neither an object nor text",
                )),
                None => match body.remove("error") {
                    Some(Value::String(message)) => {
                        Ok(WorkerReply::Section(SectionResult::error(section, message)))
                    }
                    _ => Err(OrchestratorError::worker_protocol(
                        address,
                        "generator returned no content",
                    )),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::types::{ExtractionTask, FeatureMap, SectionOutcome, SectionTask};
    use serde_json::json;

    fn section_task(section: Section) -> WorkerTask {
        WorkerTask::Section(SectionTask {
            section,
            brief: "Hoodie".into(),
            template_payload: "PHN2Zy8+".into(),
            features: FeatureMap::new(),
        })
    }

    fn extraction_task() -> WorkerTask {
        WorkerTask::Extraction(ExtractionTask {
            template_payload: "PHN2Zy8+".into(),
            brief: "Hoodie".into(),
        })
    }

    #[test]
    fn test_decode_features() {
        let reply = decode_reply("x", &extraction_task(), json!({"features": {"total": 3}})).unwrap();
        assert!(matches!(reply, WorkerReply::Extraction(ExtractionResult::Features(_))));

        let reply = decode_reply("x", &extraction_task(), json!({"error": "bad svg"})).unwrap();
        assert_eq!(
            reply,
            WorkerReply::Extraction(ExtractionResult::Error("bad svg".into()))
        );

        assert!(decode_reply("x", &extraction_task(), json!({"nothing": 1})).is_err());
    }

    #[test]
    fn test_decode_section_without_echo_uses_task_section() {
        let reply = decode_reply(
            "x",
            &section_task(Section::Materials),
            json!({"content": {"shell": "cotton fleece"}}),
        )
        .unwrap();
        match reply {
            WorkerReply::Section(result) => {
                assert_eq!(result.section, Section::Materials);
                assert!(matches!(result.outcome, SectionOutcome::Content(_)));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_decode_free_text_content() {
        let body = json!({"section": "design", "content": "```json\n{\"fit\": \"boxy\"}\n```"});
        let reply = decode_reply("x", &section_task(Section::Design), body).unwrap();
        let WorkerReply::Section(result) = reply else {
            panic!("expected section reply");
        };
        assert_eq!(
            result.outcome,
            SectionOutcome::Content(json!({"fit": "boxy"}).as_object().cloned().unwrap())
        );

        let garbage = json!({"content": "sorry, no JSON today"});
        let err = decode_reply("x", &section_task(Section::Design), garbage).unwrap_err();
        assert_eq!(err.category(), "worker_protocol");
    }

    #[test]
    fn test_decode_wrapped_envelope() {
        let body = json!({"type": "SectionResult", "data": {"section": "design", "content": {"a": 1}}});
        assert!(decode_reply("x", &section_task(Section::Design), body).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_unavailable() {
        let client = HttpWorkerClient::new(Duration::from_secs(2)).unwrap();
        let err = client
            .call("http://127.0.0.1:1/submit", extraction_task())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::WorkerUnavailable { .. }));
    }
}
