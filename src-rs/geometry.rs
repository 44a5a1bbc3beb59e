//! Normalized box to overlay rectangle mapping.

use serde::Serialize;

use crate::model::{BoundingBox, Finding, NORMALIZED_SCALE};

/// Rectangle expressed as percentages of the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayRect {
    pub top_pct: f64,
    pub left_pct: f64,
    pub height_pct: f64,
    pub width_pct: f64,
}

/// Rectangle in surface pixels. Width/height may be zero or negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

fn to_pct(value: f64) -> f64 {
    value / NORMALIZED_SCALE * 100.0
}

/// No clamping or reordering: inverted boxes give negative sizes.
pub fn map_box(bbox: &BoundingBox) -> OverlayRect {
    OverlayRect {
        top_pct: to_pct(bbox.top),
        left_pct: to_pct(bbox.left),
        height_pct: to_pct(bbox.bottom - bbox.top),
        width_pct: to_pct(bbox.right - bbox.left),
    }
}

impl OverlayRect {
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let w = f64::from(width);
        let h = f64::from(height);
        PixelRect {
            x: self.left_pct / 100.0 * w,
            y: self.top_pct / 100.0 * h,
            w: self.width_pct / 100.0 * w,
            h: self.height_pct / 100.0 * h,
        }
    }

    pub fn is_drawable(&self) -> bool {
        self.width_pct > 0.0 && self.height_pct > 0.0
    }
}

/// Findings with a box, paired with their overlay rectangle, in list order.
pub fn overlay_rects(findings: &[Finding]) -> Vec<(&Finding, OverlayRect)> {
    findings
        .iter()
        .filter_map(|finding| finding.bounding_box.as_ref().map(|b| (finding, map_box(b))))
        .collect()
}
