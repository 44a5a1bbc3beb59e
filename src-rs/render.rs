//! Draws the lesion overlay onto an RGBA image.
//!
//! Rectangles come from the same percentage mapping the list view reports,
//! projected onto the image size. Boxes with no positive area are skipped.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};
use serde::Serialize;

use crate::geometry::{overlay_rects, OverlayRect, PixelRect};
use crate::model::Finding;
use crate::presentation::FindingLevel;
use crate::selection::Selection;

const INACTIVE_STROKE: [u8; 4] = [239, 68, 68, 153];
const ACTIVE_STROKE: [u8; 4] = [96, 165, 250, 255];
const ACTIVE_FILL: [u8; 4] = [96, 165, 250, 51];
const LABEL_BG: [u8; 4] = [15, 23, 42, 230];
const LABEL_FG: [u8; 4] = [255, 255, 255, 255];

/// Metadata for one box as drawn.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedBox {
    pub id: String,
    pub position: usize,
    pub category: String,
    pub level: FindingLevel,
    pub active: bool,
    pub drawn: bool,
    pub rect: OverlayRect,
    pub pixels: PixelRect,
}

/// Parses `#rrggbb` / `#rrggbbaa`.
pub fn parse_hex_color(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.trim().strip_prefix('#')?;
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

fn resolve_scale(img_w: u32, img_h: u32) -> f64 {
    let max_dim = f64::from(img_w.max(img_h).max(1));
    (max_dim / 800.0).clamp(1.0, 3.0)
}

fn scale_default(value: f64, scale: f64, min_value: u32) -> u32 {
    ((value * scale).round() as i64).max(i64::from(min_value)) as u32
}

fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    let out_a = (f64::from(dst[3]) + f64::from(src[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

/// Inclusive corners, clipped to the image.
fn fill_rect_alpha(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    let max_w = img.width() as i32 - 1;
    let max_h = img.height() as i32 - 1;
    if x0.max(x1) < 0 || y0.max(y1) < 0 || x0.min(x1) > max_w || y0.min(y1) > max_h {
        return;
    }
    let min_x = clamp_i32(x0.min(x1), 0, max_w);
    let max_x = clamp_i32(x0.max(x1), 0, max_w);
    let min_y = clamp_i32(y0.min(y1), 0, max_h);
    let max_y = clamp_i32(y0.max(y1), 0, max_h);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dst = *img.get_pixel(x as u32, y as u32);
            img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
        }
    }
}

/// Stroke drawn inward from the rectangle edge, `thickness` pixels wide.
fn draw_rect_outline(
    img: &mut RgbaImage,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
    color: Rgba<u8>,
    thickness: u32,
) {
    let t = thickness.max(1) as i32;
    let inner_top = (y0 + t - 1).min(y1);
    let inner_bottom = (y1 - t + 1).max(y0);
    fill_rect_alpha(img, x0, y0, x1, inner_top, color);
    fill_rect_alpha(img, x0, inner_bottom, x1, y1, color);
    // Side strips skip the rows already covered so translucent strokes blend once.
    if inner_top + 1 < inner_bottom {
        fill_rect_alpha(img, x0, inner_top + 1, (x0 + t - 1).min(x1), inner_bottom - 1, color);
        fill_rect_alpha(img, (x1 - t + 1).max(x0), inner_top + 1, x1, inner_bottom - 1, color);
    }
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale_i;
                let py = y + row_idx as i32 * scale_i;
                fill_rect_alpha(img, px, py, px + scale_i - 1, py + scale_i - 1, color);
            }
        }
        cursor_x += 8 * scale_i;
    }
}

fn text_width(text: &str, scale: u32) -> i32 {
    text.chars().count() as i32 * 8 * scale.max(1) as i32
}

/// Text on a dark plate, horizontally centred on `center_x`, bottom edge at
/// `bottom_y`. The plate's underline carries the finding's severity color.
fn draw_label(
    img: &mut RgbaImage,
    center_x: i32,
    bottom_y: i32,
    text: &str,
    accent: Rgba<u8>,
    scale: f64,
) {
    if text.is_empty() {
        return;
    }
    let glyph_scale = scale_default(1.0, scale, 1);
    let padding = scale_default(4.0, scale, 2) as i32;
    let width = text_width(text, glyph_scale);
    let height = 8 * glyph_scale as i32;

    let max_x = (img.width() as i32 - width - padding).max(padding);
    let x = clamp_i32(center_x - width / 2, padding, max_x);
    let y = (bottom_y - height - padding).max(padding);

    fill_rect_alpha(
        img,
        x - padding,
        y - padding,
        x + width + padding - 1,
        y + height + padding - 1,
        Rgba(LABEL_BG),
    );
    let accent_h = scale_default(2.0, scale, 1) as i32;
    fill_rect_alpha(
        img,
        x - padding,
        y + height + padding - accent_h,
        x + width + padding - 1,
        y + height + padding - 1,
        accent,
    );
    draw_bitmap_text(img, x, y, text, Rgba(LABEL_FG), glyph_scale);
}

/// Rounds an edge to a pixel, limited to one surface span beyond either side
/// so the corner arithmetic stays within `i32`.
fn pixel_edge(value: f64, span: u32) -> i32 {
    let span = f64::from(span.max(1));
    let bounded = if value.is_nan() { 0.0 } else { value.clamp(-span, 2.0 * span) };
    bounded.round() as i32
}

/// Draws every boxed finding; the active one last so it sits on top.
pub fn render_overlay(
    img: &mut RgbaImage,
    findings: &[Finding],
    selection: &Selection,
) -> Vec<RenderedBox> {
    let (img_w, img_h) = img.dimensions();
    let scale = resolve_scale(img_w, img_h);
    let stroke_width = scale_default(2.0, scale, 2);

    let positions: std::collections::HashMap<&str, usize> = findings
        .iter()
        .enumerate()
        .map(|(idx, f)| (f.id.as_str(), idx + 1))
        .collect();

    let mut boxes: Vec<RenderedBox> = overlay_rects(findings)
        .into_iter()
        .map(|(finding, rect)| RenderedBox {
            id: finding.id.clone(),
            position: positions.get(finding.id.as_str()).copied().unwrap_or(0),
            category: finding.category.clone(),
            level: FindingLevel::from_severity(finding.severity_score),
            active: selection.is_active(&finding.id),
            drawn: rect.is_drawable(),
            rect,
            pixels: rect.to_pixels(img_w, img_h),
        })
        .collect();

    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by_key(|&i| boxes[i].active);

    for i in order {
        let item = &mut boxes[i];
        if !item.drawn {
            continue;
        }
        let px = item.pixels;
        let x0 = pixel_edge(px.x, img_w);
        let y0 = pixel_edge(px.y, img_h);
        let x1 = pixel_edge(px.x + px.w, img_w) - 1;
        let y1 = pixel_edge(px.y + px.h, img_h) - 1;
        if x1 < x0 || y1 < y0 {
            item.drawn = false;
            continue;
        }

        if item.active {
            fill_rect_alpha(img, x0, y0, x1, y1, Rgba(ACTIVE_FILL));
            draw_rect_outline(img, x0, y0, x1, y1, Rgba(ACTIVE_STROKE), stroke_width);
            let accent = parse_hex_color(item.level.color()).unwrap_or(Rgba(LABEL_FG));
            draw_label(
                img,
                x0 + (x1 - x0) / 2,
                y0 - stroke_width as i32,
                &item.category,
                accent,
                scale,
            );
        } else {
            draw_rect_outline(img, x0, y0, x1, y1, Rgba(INACTIVE_STROKE), stroke_width);
        }
    }

    boxes
}
