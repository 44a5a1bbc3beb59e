//! One image-analysis attempt: Idle -> Analyzing -> Success | Error.
//!
//! Every `start` is tagged with the session generation. Selecting a new image
//! bumps the generation, so a response for an older request is dropped instead
//! of overwriting the newer selection.

use log::{debug, warn};
use serde::Serialize;

use crate::model::AnalysisResult;
use crate::selection::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Analyzing,
    Success,
    Error,
}

impl Phase {
    pub fn status_label(self) -> &'static str {
        match self {
            Phase::Idle => "Ready for analysis",
            Phase::Analyzing => "Scanning facial features...",
            Phase::Success => "Analysis complete",
            Phase::Error => "Analysis failed",
        }
    }
}

/// Proof that a request was started for a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTicket {
    generation: u64,
}

impl AnalysisTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Session state. `I` is the caller's image handle; the session only stores it.
#[derive(Debug)]
pub struct Session<I> {
    phase: Phase,
    image: Option<I>,
    result: Option<AnalysisResult>,
    error: Option<String>,
    selection: Selection,
    generation: u64,
}

impl<I> Default for Session<I> {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            image: None,
            result: None,
            error: None,
            selection: Selection::default(),
            generation: 0,
        }
    }
}

impl<I> Session<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn image(&self) -> Option<&I> {
        self.image.as_ref()
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut Selection {
        &mut self.selection
    }

    pub fn active_finding(&self) -> Option<&str> {
        self.selection.active()
    }

    /// Swaps the image and returns to Idle from any phase.
    pub fn select_image(&mut self, image: I) {
        if self.phase == Phase::Analyzing {
            debug!(
                "image replaced while generation {} was in flight",
                self.generation
            );
        }
        self.image = Some(image);
        self.phase = Phase::Idle;
        self.result = None;
        self.error = None;
        self.selection.clear();
        self.generation += 1;
    }

    /// Whether the Analyze action is offered at all (hidden while analyzing or
    /// after success).
    pub fn can_analyze(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Error)
    }

    /// Offered and usable: an image is present.
    pub fn analyze_enabled(&self) -> bool {
        self.can_analyze() && self.image.is_some()
    }

    /// Moves to Analyzing. Returns `None` (and changes nothing) when there is no
    /// image or the action is not offered in the current phase.
    pub fn start(&mut self) -> Option<AnalysisTicket> {
        if !self.analyze_enabled() {
            return None;
        }
        self.generation += 1;
        self.phase = Phase::Analyzing;
        self.error = None;
        self.selection.clear();
        debug!("analysis started, generation {}", self.generation);
        Some(AnalysisTicket {
            generation: self.generation,
        })
    }

    /// Applies a collaborator outcome. Returns `false` when the ticket is stale
    /// or no analysis is in flight; the session is then left untouched.
    pub fn complete(
        &mut self,
        ticket: AnalysisTicket,
        outcome: Result<AnalysisResult, String>,
    ) -> bool {
        if ticket.generation != self.generation || self.phase != Phase::Analyzing {
            warn!(
                "discarding stale analysis response (ticket {}, current {})",
                ticket.generation, self.generation
            );
            return false;
        }
        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.error = None;
                self.phase = Phase::Success;
            }
            Err(message) => {
                self.result = None;
                self.error = Some(message);
                self.phase = Phase::Error;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnalysisResult;

    fn sample_result() -> AnalysisResult {
        AnalysisResult::from_response_text(
            r#"{"overallScore": 30, "summary": "mild", "lesions": [{"type": "Papule", "box_2d": [1, 2, 3, 4]}]}"#,
            1,
        )
        .unwrap()
    }

    #[test]
    fn start_without_image_is_a_no_op() {
        let mut session: Session<&str> = Session::new();
        assert!(session.start().is_none());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!session.analyze_enabled());
        assert!(session.can_analyze());
    }

    #[test]
    fn success_path_stores_result() {
        let mut session = Session::new();
        session.select_image("face.jpg");
        let ticket = session.start().unwrap();
        assert_eq!(session.phase(), Phase::Analyzing);
        assert!(!session.can_analyze());

        assert!(session.complete(ticket, Ok(sample_result())));
        assert_eq!(session.phase(), Phase::Success);
        assert_eq!(session.result().unwrap().overall_score, 30.0);
        assert!(session.error().is_none());
        assert!(session.start().is_none());
    }

    #[test]
    fn failure_path_stores_message_and_allows_retry() {
        let mut session = Session::new();
        session.select_image("face.jpg");
        let ticket = session.start().unwrap();
        assert!(session.complete(ticket, Err("boom".to_string())));
        assert_eq!(session.phase(), Phase::Error);
        assert_eq!(session.error(), Some("boom"));

        let retry = session.start().unwrap();
        assert_eq!(session.phase(), Phase::Analyzing);
        assert!(session.error().is_none());
        assert!(session.complete(retry, Ok(sample_result())));
        assert_eq!(session.phase(), Phase::Success);
    }

    #[test]
    fn new_image_resets_success_and_error() {
        let mut session = Session::new();
        session.select_image("a.jpg");
        let ticket = session.start().unwrap();
        session.complete(ticket, Ok(sample_result()));
        session.selection_mut().click("lesion-0-1");
        assert_eq!(session.active_finding(), Some("lesion-0-1"));

        session.select_image("b.jpg");
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.result().is_none());
        assert!(session.error().is_none());
        assert!(session.active_finding().is_none());
        assert_eq!(session.image(), Some(&"b.jpg"));

        let ticket = session.start().unwrap();
        session.complete(ticket, Err("nope".to_string()));
        session.selection_mut().hover_enter("x");
        session.select_image("c.jpg");
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.error().is_none());
        assert!(session.active_finding().is_none());
    }

    #[test]
    fn stale_response_is_discarded() {
        let mut session = Session::new();
        session.select_image("a.jpg");
        let old = session.start().unwrap();

        session.select_image("b.jpg");
        let current = session.start().unwrap();
        assert_ne!(old.generation(), current.generation());

        assert!(!session.complete(old, Ok(sample_result())));
        assert_eq!(session.phase(), Phase::Analyzing);
        assert!(session.result().is_none());

        assert!(session.complete(current, Err("late failure".to_string())));
        assert_eq!(session.phase(), Phase::Error);
    }

    #[test]
    fn response_after_image_swap_leaves_idle() {
        let mut session = Session::new();
        session.select_image("a.jpg");
        let ticket = session.start().unwrap();
        session.select_image("b.jpg");
        assert!(!session.complete(ticket, Ok(sample_result())));
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.result().is_none());
    }

    #[test]
    fn duplicate_completion_is_ignored() {
        let mut session = Session::new();
        session.select_image("a.jpg");
        let ticket = session.start().unwrap();
        assert!(session.complete(ticket, Ok(sample_result())));
        assert!(!session.complete(ticket, Err("again".to_string())));
        assert_eq!(session.phase(), Phase::Success);
    }

    #[test]
    fn status_labels_follow_phase() {
        assert_eq!(Phase::Idle.status_label(), "Ready for analysis");
        assert_eq!(Phase::Analyzing.status_label(), "Scanning facial features...");
        assert_eq!(Phase::Success.status_label(), "Analysis complete");
        assert_eq!(Phase::Error.status_label(), "Analysis failed");
    }
}
