//! Acne analysis front end.
//!
//! A photo goes to a multimodal model; the findings come back as an overall
//! score, per-lesion boxes on a 0-1000 grid and treatment suggestions. This
//! crate owns everything around that call: the session state machine, the
//! box-to-overlay mapping, the shared selection, severity banding and the
//! rendered overlay.

pub mod error;
pub mod geometry;
pub mod inference;
pub mod input;
pub mod model;
pub mod presentation;
pub mod render;
pub mod selection;
pub mod session;

pub use error::{InferenceError, InputError, GENERIC_ANALYSIS_ERROR};
pub use geometry::{map_box, overlay_rects, OverlayRect, PixelRect};
pub use inference::{
    analyze_image, run_session_analysis, CommandClient, GeminiClient, InferenceClient,
    ReplayClient,
};
pub use input::SelectedImage;
pub use model::{AnalysisResult, BoundingBox, Finding, NORMALIZED_SCALE};
pub use presentation::{FindingLevel, SeverityBand};
pub use render::{render_overlay, RenderedBox};
pub use selection::Selection;
pub use session::{AnalysisTicket, Phase, Session};
