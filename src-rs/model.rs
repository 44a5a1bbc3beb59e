//! Analysis result shapes and the wire format returned by the model.
//!
//! The model answers with `{overallScore, summary, lesions: [...]}`. Lesions carry
//! no identifier, so one is assigned on receipt (`lesion-{index}-{millis}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed scale of the normalized `box_2d` coordinates.
pub const NORMALIZED_SCALE: f64 = 1000.0;

/// `[ymin, xmin, ymax, xmax]` on the 0..=1000 scale. Values are kept exactly as
/// received; they may be inverted or out of range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "[f64; 4]")]
pub struct BoundingBox {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

impl BoundingBox {
    pub fn new(top: f64, left: f64, bottom: f64, right: f64) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }

    /// Partial boxes are never built: anything but four numbers yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        if items.len() != 4 {
            return None;
        }
        let mut coords = [0.0f64; 4];
        for (slot, item) in coords.iter_mut().zip(items) {
            *slot = item.as_f64()?;
        }
        Some(Self::new(coords[0], coords[1], coords[2], coords[3]))
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.top, b.left, b.bottom, b.right]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub id: String,
    pub location: String,
    #[serde(rename = "type")]
    pub category: String,
    #[serde(rename = "severity")]
    pub severity_score: f64,
    pub suggestion: String,
    #[serde(rename = "box_2d", skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub overall_score: f64,
    pub summary: String,
    #[serde(rename = "lesions")]
    pub findings: Vec<Finding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    overall_score: f64,
    summary: String,
    #[serde(default)]
    lesions: Vec<WireLesion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireLesion {
    id: Option<String>,
    location: String,
    #[serde(rename = "type")]
    category: String,
    severity: f64,
    suggestion: String,
    box_2d: Option<Value>,
}

impl WireLesion {
    fn into_finding(self, id: String) -> Finding {
        let bounding_box = self.box_2d.as_ref().and_then(BoundingBox::from_value);
        Finding {
            id,
            location: self.location,
            category: self.category,
            severity_score: self.severity,
            suggestion: self.suggestion,
            bounding_box,
        }
    }
}

pub fn finding_id(index: usize, received_at_millis: i64) -> String {
    format!("lesion-{index}-{received_at_millis}")
}

impl AnalysisResult {
    /// Parses model output and assigns a fresh id to every lesion. Any id the
    /// model may have produced is ignored.
    pub fn from_response_text(text: &str, received_at_millis: i64) -> serde_json::Result<Self> {
        let wire: WireResult = serde_json::from_str(text)?;
        let findings = wire
            .lesions
            .into_iter()
            .enumerate()
            .map(|(idx, lesion)| lesion.into_finding(finding_id(idx, received_at_millis)))
            .collect();
        Ok(Self {
            overall_score: wire.overall_score,
            summary: wire.summary,
            findings,
        })
    }

    /// Loads a result written earlier (e.g. a sidecar). Existing ids are kept,
    /// blank or duplicated ones are replaced.
    pub fn from_saved_text(text: &str, received_at_millis: i64) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        // Sidecars nest the result under "result".
        let body = if value.get("result").is_some_and(Value::is_object) {
            value["result"].clone()
        } else {
            value
        };
        let wire: WireResult = serde_json::from_value(body)?;

        let mut seen = std::collections::HashSet::new();
        let findings = wire
            .lesions
            .into_iter()
            .enumerate()
            .map(|(idx, mut lesion)| {
                let id = match lesion.id.take() {
                    Some(id) if !id.trim().is_empty() && !seen.contains(&id) => id,
                    _ => {
                        let base = finding_id(idx, received_at_millis);
                        let mut candidate = base.clone();
                        let mut suffix = 1;
                        while seen.contains(&candidate) {
                            candidate = format!("{base}-{suffix}");
                            suffix += 1;
                        }
                        candidate
                    }
                };
                seen.insert(id.clone());
                lesion.into_finding(id)
            })
            .collect();
        Ok(Self {
            overall_score: wire.overall_score,
            summary: wire.summary,
            findings,
        })
    }

    pub fn finding(&self, id: &str) -> Option<&Finding> {
        self.findings.iter().find(|f| f.id == id)
    }

    /// Resolves a CLI reference: an exact id, or a 1-based list position.
    pub fn resolve_reference(&self, reference: &str) -> Option<&Finding> {
        let trimmed = reference.trim();
        if let Some(found) = self.finding(trimmed) {
            return Some(found);
        }
        let position = trimmed.parse::<usize>().ok()?;
        position.checked_sub(1).and_then(|idx| self.findings.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
        "overallScore": 65,
        "summary": "Moderate inflammatory acne on the lower face.",
        "lesions": [
            {"location": "chin", "type": "Pustule", "severity": 80, "suggestion": "Benzoyl peroxide spot treatment", "box_2d": [100, 200, 300, 400]},
            {"location": "forehead", "type": "Blackhead", "severity": 30, "suggestion": "Salicylic acid cleanser"}
        ]
    }"#;

    #[test]
    fn assigns_ids_in_received_order() {
        let result = AnalysisResult::from_response_text(SAMPLE, 1_700_000_000_000).unwrap();
        assert_eq!(result.overall_score, 65.0);
        assert_eq!(result.findings.len(), 2);
        assert_eq!(result.findings[0].id, "lesion-0-1700000000000");
        assert_eq!(result.findings[1].id, "lesion-1-1700000000000");
        assert_eq!(result.findings[0].category, "Pustule");
        assert_eq!(
            result.findings[0].bounding_box,
            Some(BoundingBox::new(100.0, 200.0, 300.0, 400.0))
        );
        assert!(result.findings[1].bounding_box.is_none());
    }

    #[test]
    fn partial_boxes_are_treated_as_absent() {
        let text = json!({
            "overallScore": 10,
            "summary": "",
            "lesions": [
                {"location": "cheek", "type": "Papule", "severity": 20, "suggestion": "", "box_2d": [1, 2, 3]},
                {"location": "cheek", "type": "Papule", "severity": 20, "suggestion": "", "box_2d": [1, "x", 3, 4]},
                {"location": "cheek", "type": "Papule", "severity": 20, "suggestion": "", "box_2d": null}
            ]
        })
        .to_string();
        let result = AnalysisResult::from_response_text(&text, 0).unwrap();
        assert_eq!(result.findings.len(), 3);
        assert!(result.findings.iter().all(|f| f.bounding_box.is_none()));
    }

    #[test]
    fn inverted_boxes_are_kept_verbatim() {
        let value = json!([900, 800, 100, 50]);
        let bbox = BoundingBox::from_value(&value).unwrap();
        assert_eq!(bbox, BoundingBox::new(900.0, 800.0, 100.0, 50.0));
    }

    #[test]
    fn missing_lesion_fields_default() {
        let text = r#"{"overallScore": 5, "summary": "clear", "lesions": [{"type": "Whitehead"}]}"#;
        let result = AnalysisResult::from_response_text(text, 7).unwrap();
        let finding = &result.findings[0];
        assert_eq!(finding.category, "Whitehead");
        assert_eq!(finding.location, "");
        assert_eq!(finding.severity_score, 0.0);
    }

    #[test]
    fn missing_lesion_list_is_empty() {
        let text = r#"{"overallScore": 0, "summary": "No acne"}"#;
        let result = AnalysisResult::from_response_text(text, 7).unwrap();
        assert!(result.findings.is_empty());
    }

    #[test]
    fn missing_required_fields_fail_to_parse() {
        assert!(AnalysisResult::from_response_text(r#"{"summary": "x"}"#, 0).is_err());
        assert!(AnalysisResult::from_response_text("not json", 0).is_err());
        assert!(AnalysisResult::from_response_text("", 0).is_err());
    }

    #[test]
    fn saved_results_keep_ids_and_unwrap_sidecars() {
        let result = AnalysisResult::from_response_text(SAMPLE, 42).unwrap();
        let sidecar = json!({"report_meta_version": 1, "result": result}).to_string();
        let reloaded = AnalysisResult::from_saved_text(&sidecar, 99).unwrap();
        assert_eq!(reloaded, result);
    }

    #[test]
    fn saved_results_replace_duplicate_ids() {
        let text = json!({
            "overallScore": 40,
            "summary": "",
            "lesions": [
                {"id": "a", "type": "Papule"},
                {"id": "a", "type": "Papule"},
                {"type": "Papule"}
            ]
        })
        .to_string();
        let result = AnalysisResult::from_saved_text(&text, 5).unwrap();
        let ids: Vec<&str> = result.findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "lesion-1-5", "lesion-2-5"]);
    }

    #[test]
    fn generated_ids_never_collide_with_kept_ones() {
        let text = json!({
            "overallScore": 40,
            "summary": "",
            "lesions": [
                {"id": "lesion-1-5", "type": "A"},
                {"type": "B"},
                {"id": "lesion-1-5-1", "type": "C"}
            ]
        })
        .to_string();
        let result = AnalysisResult::from_saved_text(&text, 5).unwrap();
        let ids: Vec<&str> = result.findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["lesion-1-5", "lesion-1-5-1", "lesion-2-5"]);
    }

    #[test]
    fn resolves_references_by_id_or_position() {
        let result = AnalysisResult::from_response_text(SAMPLE, 1).unwrap();
        assert_eq!(result.resolve_reference("lesion-1-1").unwrap().category, "Blackhead");
        assert_eq!(result.resolve_reference("1").unwrap().category, "Pustule");
        assert!(result.resolve_reference("0").is_none());
        assert!(result.resolve_reference("3").is_none());
    }
}
