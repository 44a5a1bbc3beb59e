//! Severity banding and the text rendering of a result.
//!
//! Overall scores and per-finding severities use different thresholds on
//! purpose; do not merge them.

use serde::Serialize;

use crate::geometry::map_box;
use crate::model::{AnalysisResult, Finding};
use crate::selection::Selection;
use crate::session::Phase;

pub const DISCLAIMER: &str = "Disclaimer: This tool uses Artificial Intelligence for analysis and is not a substitute for professional medical advice. Always consult a certified dermatologist for diagnosis and treatment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeverityBand {
    Clear,
    Mild,
    Moderate,
    Severe,
}

impl SeverityBand {
    pub fn from_score(score: f64) -> Self {
        let mut band = SeverityBand::Clear;
        if score > 20.0 {
            band = SeverityBand::Mild;
        }
        if score > 50.0 {
            band = SeverityBand::Moderate;
        }
        if score > 75.0 {
            band = SeverityBand::Severe;
        }
        band
    }

    pub fn label(self) -> &'static str {
        match self {
            SeverityBand::Clear => "Clear",
            SeverityBand::Mild => "Mild",
            SeverityBand::Moderate => "Moderate",
            SeverityBand::Severe => "Severe",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            SeverityBand::Clear => "#22c55e",
            SeverityBand::Mild => "#eab308",
            SeverityBand::Moderate => "#f97316",
            SeverityBand::Severe => "#ef4444",
        }
    }
}

/// Banding of the per-finding severity bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingLevel {
    Low,
    Medium,
    High,
}

impl FindingLevel {
    pub fn from_severity(severity: f64) -> Self {
        if severity > 70.0 {
            FindingLevel::High
        } else if severity > 40.0 {
            FindingLevel::Medium
        } else {
            FindingLevel::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FindingLevel::Low => "low",
            FindingLevel::Medium => "medium",
            FindingLevel::High => "high",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            FindingLevel::Low => "#22c55e",
            FindingLevel::Medium => "#fb923c",
            FindingLevel::High => "#ef4444",
        }
    }
}

/// One row of the findings list.
#[derive(Debug, Clone, Serialize)]
pub struct FindingRow<'a> {
    pub position: usize,
    pub id: &'a str,
    pub category: &'a str,
    pub location: &'a str,
    pub severity: f64,
    pub level: FindingLevel,
    pub suggestion: &'a str,
    pub active: bool,
    pub in_overlay: bool,
}

pub fn finding_rows<'a>(findings: &'a [Finding], selection: &Selection) -> Vec<FindingRow<'a>> {
    findings
        .iter()
        .enumerate()
        .map(|(idx, f)| FindingRow {
            position: idx + 1,
            id: &f.id,
            category: &f.category,
            location: &f.location,
            severity: f.severity_score,
            level: FindingLevel::from_severity(f.severity_score),
            suggestion: &f.suggestion,
            active: selection.is_active(&f.id),
            in_overlay: f.bounding_box.is_some(),
        })
        .collect()
}

pub fn lesion_count_label(count: usize) -> String {
    format!("{count} Lesions Detected")
}

/// Ten-cell bar for a 0..=100 severity. Out-of-range values saturate.
pub fn severity_bar(severity: f64) -> String {
    let filled = (severity / 10.0).round().clamp(0.0, 10.0) as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(10 - filled))
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

/// Plain-text report: status, banded score, summary, and the findings list.
pub fn render_text_report(
    phase: Phase,
    result: Option<&AnalysisResult>,
    error: Option<&str>,
    selection: &Selection,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("Status: {}", phase.status_label()));
    if let Some(error) = error {
        lines.push(format!("Error: {error}"));
    }

    let Some(result) = result else {
        lines.push(String::new());
        lines.push("No Analysis Yet".to_string());
        lines.push(String::new());
        lines.push(DISCLAIMER.to_string());
        return lines.join("\n") + "\n";
    };

    let band = SeverityBand::from_score(result.overall_score);
    lines.push(String::new());
    lines.push(format!(
        "Skin Condition: {} / 100 ({})    {}",
        format_number(result.overall_score),
        band.label(),
        lesion_count_label(result.findings.len())
    ));
    if !result.summary.trim().is_empty() {
        lines.push(format!("  {}", result.summary.trim()));
    }

    lines.push(String::new());
    lines.push("Detailed Findings".to_string());
    for row in finding_rows(&result.findings, selection) {
        let marker = if row.active { '>' } else { ' ' };
        lines.push(format!(
            "{marker}{:>3}. {:<16} {} {:>3} {}",
            row.position,
            row.category,
            severity_bar(row.severity),
            format_number(row.severity),
            row.level.label()
        ));
        if !row.location.is_empty() {
            lines.push(format!("      Location: {}", row.location));
        }
        if !row.suggestion.is_empty() {
            lines.push(format!("      Treatment: {}", row.suggestion));
        }
        if row.active {
            let finding = &result.findings[row.position - 1];
            if let Some(bbox) = finding.bounding_box.as_ref() {
                let rect = map_box(bbox);
                lines.push(format!(
                    "      Overlay: top {:.1}% left {:.1}% height {:.1}% width {:.1}%",
                    rect.top_pct, rect.left_pct, rect.height_pct, rect.width_pct
                ));
            }
        }
    }

    lines.push(String::new());
    lines.push(DISCLAIMER.to_string());
    lines.join("\n") + "\n"
}
