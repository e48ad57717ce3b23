//! SVG feature extraction worker
//!
//! Produces a structured summary of a garment template: element counts,
//! palette, canvas geometry, and a few silhouette and construction hints.

use std::collections::BTreeSet;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::coord::payload::normalize_inline;
use crate::coord::types::{ExtractionResult, FeatureMap, WorkerReply, WorkerTask};
use crate::worker::Worker;

const MAX_COLORS: usize = 10;

lazy_static! {
    static ref ELEMENT: Regex =
        Regex::new(r"<(?:svg:)?(path|rect|circle|ellipse|polygon|line|g|text)\b").unwrap();
    static ref ROOT: Regex = Regex::new(r"<(?:svg:)?svg\b[^>]*>").unwrap();
    static ref WIDTH: Regex = Regex::new(r#"\swidth\s*=\s*["']([^"']*)["']"#).unwrap();
    static ref HEIGHT: Regex = Regex::new(r#"\sheight\s*=\s*["']([^"']*)["']"#).unwrap();
    static ref VIEW_BOX: Regex = Regex::new(r#"\sviewBox\s*=\s*["']([^"']*)["']"#).unwrap();
    static ref FILL: Regex = Regex::new(r#"\sfill\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref STROKE: Regex = Regex::new(r#"\sstroke\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref NON_MARKUP: Regex = Regex::new(r"(?s)<!--.*?-->|<!\[CDATA\[.*?\]\]>").unwrap();
    static ref NUMERIC: Regex = Regex::new(r"[^\d.]").unwrap();
}

#[derive(Debug, Default, Clone, Copy)]
struct ElementCounts {
    paths: usize,
    rects: usize,
    circles: usize,
    ellipses: usize,
    polygons: usize,
    lines: usize,
    groups: usize,
    texts: usize,
}

impl ElementCounts {
    fn shapes(&self) -> usize {
        self.paths + self.rects + self.circles + self.ellipses + self.polygons + self.lines
    }
}

fn count_elements(svg: &str) -> ElementCounts {
    let mut counts = ElementCounts::default();
    for cap in ELEMENT.captures_iter(svg) {
        match &cap[1] {
            "path" => counts.paths += 1,
            "rect" => counts.rects += 1,
            "circle" => counts.circles += 1,
            "ellipse" => counts.ellipses += 1,
            "polygon" => counts.polygons += 1,
            "line" => counts.lines += 1,
            "g" => counts.groups += 1,
            "text" => counts.texts += 1,
            _ => {}
        }
    }
    counts
}

fn palette(re: &Regex, svg: &str) -> BTreeSet<String> {
    re.captures_iter(svg)
        .map(|cap| cap[1].trim().to_string())
        .filter(|c| c != "none" && c != "transparent" && !c.starts_with("url("))
        .collect()
}

fn attribute(re: &Regex, tag: &str) -> Option<String> {
    re.captures(tag).map(|cap| cap[1].to_string())
}

fn numeric(value: &str) -> Option<f64> {
    NUMERIC.replace_all(value, "").parse::<f64>().ok()
}

/// Width and height of the root element, falling back to `viewBox`
fn canvas(svg: &str) -> (Option<String>, Option<String>) {
    let Some(root) = ROOT.find(svg) else {
        return (None, None);
    };
    let tag = root.as_str();
    let mut width = attribute(&WIDTH, tag);
    let mut height = attribute(&HEIGHT, tag);
    if width.is_none() || height.is_none() {
        if let Some(view_box) = attribute(&VIEW_BOX, tag) {
            let parts: Vec<&str> = view_box.split_whitespace().collect();
            if parts.len() == 4 {
                width = width.or_else(|| Some(parts[2].to_string()));
                height = height.or_else(|| Some(parts[3].to_string()));
            }
        }
    }
    (width, height)
}

fn complexity(total: usize) -> &'static str {
    match total {
        t if t > 100 => "highly detailed",
        t if t > 50 => "moderately complex",
        t if t > 20 => "detailed",
        _ => "simple",
    }
}

fn detail_level(total: usize) -> &'static str {
    match total {
        t if t > 50 => "high",
        t if t > 20 => "medium",
        _ => "low",
    }
}

fn silhouette(aspect_ratio: Option<f64>) -> &'static str {
    match aspect_ratio {
        Some(r) if r > 2.0 => "full-length dress or gown",
        Some(r) if r > 1.5 => "dress or long top",
        Some(r) if r > 1.2 => "standard top or shirt",
        Some(r) if r > 0.8 => "boxy top or jacket",
        Some(_) => "wide garment or pants",
        None => "unknown",
    }
}

fn garment_features(svg: &str, counts: &ElementCounts) -> Vec<&'static str> {
    let lower = svg.to_lowercase();
    let mut found = Vec::new();
    if lower.contains("pocket") || counts.rects > 10 {
        found.push("pockets");
    }
    if counts.circles > 5 || lower.contains("button") {
        found.push("buttons or closures");
    }
    if counts.groups > 15 {
        found.push("complex construction details");
    }
    if counts.texts > 0 {
        found.push("text or branding elements");
    }
    if counts.lines > 20 {
        found.push("stitching or seam details");
    }
    found
}

/// Extract the feature map from decoded SVG markup
pub fn extract_features(svg: &str) -> Result<FeatureMap, String> {
    let markup = NON_MARKUP.replace_all(svg, "");
    let svg = markup.as_ref();
    if ROOT.find(svg).is_none() {
        return Err("no <svg> root element found".to_string());
    }

    let counts = count_elements(svg);
    let total = counts.shapes();
    let fills = palette(&FILL, svg);
    let strokes = palette(&STROKE, svg);
    let (width, height) = canvas(svg);

    let aspect_ratio = match (width.as_deref().and_then(numeric), height.as_deref().and_then(numeric)) {
        (Some(w), Some(h)) if w > 0.0 => Some((h / w * 100.0).round() / 100.0),
        _ => None,
    };

    let features = json!({
        "element_counts": {
            "paths": counts.paths,
            "rectangles": counts.rects,
            "circles": counts.circles,
            "ellipses": counts.ellipses,
            "polygons": counts.polygons,
            "lines": counts.lines,
            "groups": counts.groups,
            "texts": counts.texts,
            "total": total,
        },
        "colors": {
            "fills": fills.iter().take(MAX_COLORS).collect::<Vec<_>>(),
            "strokes": strokes.iter().take(MAX_COLORS).collect::<Vec<_>>(),
            "color_count": fills.len() + strokes.len(),
        },
        "canvas": {
            "width": width.unwrap_or_else(|| "unknown".to_string()),
            "height": height.unwrap_or_else(|| "unknown".to_string()),
            "aspect_ratio": aspect_ratio,
        },
        "complexity": complexity(total),
        "estimated_silhouette": silhouette(aspect_ratio),
        "detected_features": garment_features(svg, &counts),
        "detail_level": detail_level(total),
    });

    match features {
        Value::Object(map) => Ok(map),
        _ => Err("feature summary is not an object".to_string()),
    }
}

/// In-process extractor worker
#[derive(Debug, Default, Clone)]
pub struct SvgFeatureExtractor;

#[async_trait]
impl Worker for SvgFeatureExtractor {
    fn name(&self) -> &str {
        "svg-extractor"
    }

    async fn handle(&self, task: WorkerTask) -> anyhow::Result<WorkerReply> {
        let WorkerTask::Extraction(task) = task else {
            anyhow::bail!("svg extractor only accepts extraction tasks");
        };

        let result = match normalize_inline(&task.template_payload).and_then(|p| p.decode()) {
            Ok(svg) => match extract_features(&svg) {
                Ok(features) => {
                    info!(
                        total = features["element_counts"]["total"].as_u64().unwrap_or(0),
                        complexity = features["complexity"].as_str().unwrap_or("unknown"),
                        "SVG parsed"
                    );
                    ExtractionResult::Features(features)
                }
                Err(message) => ExtractionResult::Error(format!("Could not parse SVG: {}", message)),
            },
            Err(e) => ExtractionResult::Error(format!("Could not decode SVG: {}", e)),
        };
        if let ExtractionResult::Error(message) = &result {
            warn!(error = %message, "SVG parsing failed");
        }
        Ok(WorkerReply::Extraction(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::payload::TemplatePayload;
    use crate::coord::types::ExtractionTask;

    const HOODIE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="220">
  <g id="body">
    <path d="M10 10 L90 10" fill="#336699" stroke="#000000"/>
    <path d="M10 10 C20 40 80 40 90 10" fill="none"/>
    <rect x="20" y="100" width="20" height="15" fill="#336699"/>
    <circle cx="50" cy="60" r="2" fill="url(#grad)"/>
    <line x1="0" y1="0" x2="10" y2="10" stroke="#ffffff"/>
    <linearGradient id="grad"/>
    <text>LOGO</text>
  </g>
</svg>"##;

    #[test]
    fn test_counts_and_canvas() {
        let features = extract_features(HOODIE).unwrap();
        let counts = &features["element_counts"];
        assert_eq!(counts["paths"], 2);
        assert_eq!(counts["rectangles"], 1);
        assert_eq!(counts["circles"], 1);
        assert_eq!(counts["lines"], 1);
        assert_eq!(counts["groups"], 1);
        assert_eq!(counts["texts"], 1);
        assert_eq!(counts["total"], 5);

        assert_eq!(features["canvas"]["width"], "100");
        assert_eq!(features["canvas"]["aspect_ratio"], 2.2);
        assert_eq!(features["estimated_silhouette"], "full-length dress or gown");
        assert_eq!(features["complexity"], "simple");
    }

    #[test]
    fn test_palette_excludes_none_and_gradients() {
        let features = extract_features(HOODIE).unwrap();
        let fills = features["colors"]["fills"].as_array().unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0], "#336699");
        assert_eq!(features["colors"]["color_count"], 3);
    }

    #[test]
    fn test_view_box_fallback() {
        let svg = r#"<svg viewBox="0 0 200 180"><rect width="5" height="5"/></svg>"#;
        let features = extract_features(svg).unwrap();
        assert_eq!(features["canvas"]["height"], "180");
        assert_eq!(features["estimated_silhouette"], "boxy top or jacket");
    }

    #[test]
    fn test_single_quoted_attributes() {
        let svg = "<svg width='120' height='240'><rect fill='#aa0000' width='5' height='5'/></svg>";
        let features = extract_features(svg).unwrap();
        assert_eq!(features["canvas"]["width"], "120");
        assert_eq!(features["canvas"]["aspect_ratio"], 2.0);
        assert_eq!(features["colors"]["fills"][0], "#aa0000");
    }

    #[test]
    fn test_comments_and_cdata_not_counted() {
        let svg = r#"<svg width="100" height="100">
  <!-- <path d="M0 0"/> <circle r="1"/> -->
  <style><![CDATA[ <rect/> ]]></style>
  <path d="M0 0"/>
</svg>"#;
        let counts = &extract_features(svg).unwrap()["element_counts"];
        assert_eq!(counts["paths"], 1);
        assert_eq!(counts["circles"], 0);
        assert_eq!(counts["rectangles"], 0);
        assert_eq!(counts["total"], 1);
    }

    #[test]
    fn test_not_svg() {
        assert!(extract_features("<html></html>").is_err());
    }

    #[tokio::test]
    async fn test_worker_reports_decode_failure_as_error_reply() {
        let reply = SvgFeatureExtractor
            .handle(WorkerTask::Extraction(ExtractionTask {
                template_payload: "%%%".into(),
                brief: "Hoodie".into(),
            }))
            .await
            .unwrap();
        assert!(matches!(reply, WorkerReply::Extraction(ExtractionResult::Error(_))));
    }

    #[tokio::test]
    async fn test_worker_extracts_from_canonical_payload() {
        let payload = TemplatePayload::from_markup(HOODIE);
        let reply = SvgFeatureExtractor
            .handle(WorkerTask::Extraction(ExtractionTask {
                template_payload: payload.into_inner(),
                brief: "Hoodie".into(),
            }))
            .await
            .unwrap();
        match reply {
            WorkerReply::Extraction(ExtractionResult::Features(f)) => {
                assert_eq!(f["detected_features"][0], "text or branding elements")
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
