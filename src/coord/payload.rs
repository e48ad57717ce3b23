//! Template payload normalization
//!
//! A template may arrive as raw vector markup, as base64 text, or as a remote
//! reference. Every form is reduced to one canonical base64 encoding before a
//! worker sees it, and decoding is validated up front so a bad payload is a
//! rejected request rather than a worker failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::config::OrchestratorConfig;
use crate::core::errors::{OrchestratorError, Result};

/// Canonical, validated base64 encoding of a template's markup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplatePayload(String);

impl TemplatePayload {
    /// Encode raw markup into the canonical form
    pub fn from_markup(markup: &str) -> Self {
        Self(STANDARD.encode(markup.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Decode back to the markup text
    pub fn decode(&self) -> Result<String> {
        decode_text(&self.0)
    }
}

impl fmt::Display for TemplatePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an incoming payload was classified
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateSource {
    Markup,
    Encoded,
    Remote,
}

/// Fetches templates given by remote reference
#[async_trait]
pub trait TemplateFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Refuses every remote reference
pub struct NoRemoteTemplates;

#[async_trait]
impl TemplateFetcher for NoRemoteTemplates {
    async fn fetch(&self, url: &str) -> Result<String> {
        Err(OrchestratorError::invalid_field(
            format!("remote templates are disabled: {}", url),
            "templatePayload",
        ))
    }
}

/// Fetches templates over HTTP(S)
pub struct HttpTemplateFetcher {
    client: reqwest::Client,
}

impl HttpTemplateFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                OrchestratorError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TemplateFetcher for HttpTemplateFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!(url = %url, "Fetching remote template");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                OrchestratorError::invalid_field(
                    format!("Could not fetch template from {}: {}", url, e),
                    "templatePayload",
                )
            })?;
        response.text().await.map_err(|e| {
            OrchestratorError::invalid_field(
                format!("Could not read template from {}: {}", url, e),
                "templatePayload",
            )
        })
    }
}

/// The fetcher a configuration asks for
pub fn fetcher_for(config: &OrchestratorConfig) -> Result<Arc<dyn TemplateFetcher>> {
    if config.allow_remote_templates {
        Ok(Arc::new(HttpTemplateFetcher::new(config.call_timeout())?))
    } else {
        Ok(Arc::new(NoRemoteTemplates))
    }
}

fn looks_like_markup(trimmed: &str) -> bool {
    trimmed.starts_with("<svg") || trimmed.starts_with("<?xml")
}

fn looks_remote(trimmed: &str) -> bool {
    trimmed.starts_with("http://") || trimmed.starts_with("https://")
}

fn decode_text(encoded: &str) -> Result<String> {
    let bytes = STANDARD.decode(encoded).map_err(|e| {
        OrchestratorError::invalid_field(format!("payload is not valid base64: {}", e), "templatePayload")
    })?;
    String::from_utf8(bytes).map_err(|e| {
        OrchestratorError::invalid_field(
            format!("decoded payload is not UTF-8 text: {}", e),
            "templatePayload",
        )
    })
}

/// Classify a payload without fetching or decoding anything
pub fn classify(input: &str) -> TemplateSource {
    let trimmed = input.trim();
    if looks_like_markup(trimmed) {
        TemplateSource::Markup
    } else if looks_remote(trimmed) {
        TemplateSource::Remote
    } else {
        TemplateSource::Encoded
    }
}

/// Normalize markup or base64 text. Remote references are rejected here.
///
/// Markup is encoded exactly as given so the canonical form decodes back to
/// the caller's bytes. Base64 input is validated and returned with all
/// whitespace removed, which makes normalization idempotent.
pub fn normalize_inline(input: &str) -> Result<TemplatePayload> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::invalid_field(
            "template payload is empty",
            "templatePayload",
        ));
    }

    match classify(input) {
        TemplateSource::Markup => Ok(TemplatePayload::from_markup(input)),
        TemplateSource::Encoded => {
            // MIME-style line wrapping is not part of the encoding
            let compact: String = trimmed.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            decode_text(&compact)?;
            Ok(TemplatePayload(compact))
        }
        TemplateSource::Remote => Err(OrchestratorError::invalid_field(
            "remote template reference needs a fetcher",
            "templatePayload",
        )),
    }
}

/// Normalize any supported payload form, fetching remote references
pub async fn normalize(input: &str, fetcher: &dyn TemplateFetcher) -> Result<TemplatePayload> {
    let source = classify(input);
    if source != TemplateSource::Remote {
        return normalize_inline(input).map_err(|e| {
            warn!(source = ?source, error = %e, "Rejected template payload");
            e
        });
    }

    let url = input.trim();
    let markup = fetcher.fetch(url).await?;
    if !looks_like_markup(markup.trim()) {
        return Err(OrchestratorError::invalid_field(
            format!("content at {} is not vector markup", url),
            "templatePayload",
        ));
    }
    info!(url = %url, bytes = markup.len(), "Fetched remote template");
    Ok(TemplatePayload::from_markup(&markup))
}
