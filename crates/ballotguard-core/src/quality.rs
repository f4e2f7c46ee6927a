//! Per-frame face quality assessment.
//!
//! This is a UI-feedback function, not a hard gate: it runs every polling
//! tick, never panics, never returns an error. Every failure mode degrades
//! to a low-quality assessment with one explanatory issue string.

use crate::engine::{EngineError, FaceEngine};
use serde::{Deserialize, Serialize};

pub const ISSUE_MODELS_LOADING: &str = "face models are still loading";
pub const ISSUE_VIDEO_LOADING: &str = "waiting for the video feed";
pub const ISSUE_TOO_DARK: &str = "frame is too dark, improve the lighting";
pub const ISSUE_NO_FACE: &str = "no face detected";
pub const ISSUE_LOW_CONFIDENCE: &str = "low face detection confidence";
pub const ISSUE_FACE_TOO_SMALL: &str = "face too small in frame, move closer";
pub const ISSUE_FACE_TOO_LARGE: &str = "face too large in frame, move back";
pub const ISSUE_ANALYSIS_FAILED: &str = "face analysis failed";

/// Quality gate thresholds. Deployment-tunable; defaults are the values the
/// voting portal ships with.
#[derive(Debug, Clone, Copy)]
pub struct QualityThresholds {
    /// Detection confidence must be strictly greater than this to pass.
    pub good_confidence: f32,
    /// Below this confidence the frame is always bad, whatever the area says.
    pub min_confidence: f32,
    /// Face-to-frame area ratio must be strictly greater than this.
    pub min_area_ratio: f32,
    /// Face-to-frame area ratio must be strictly less than this.
    pub max_area_ratio: f32,
    /// Fraction of near-black pixels above which a frame counts as dark.
    pub dark_fraction: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            good_confidence: 0.70,
            min_confidence: 0.50,
            min_area_ratio: 0.05,
            max_area_ratio: 0.80,
            dark_fraction: 0.95,
        }
    }
}

/// Verdict on one frame: is the detected face suitable for capture?
///
/// Superseded by the next polling tick; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub face_detected: bool,
    pub confidence: f32,
    pub is_good_quality: bool,
    pub issues: Vec<String>,
}

impl QualityAssessment {
    /// A no-face assessment carrying a single explanatory issue.
    pub fn unavailable(issue: impl Into<String>) -> Self {
        Self {
            face_detected: false,
            confidence: 0.0,
            is_good_quality: false,
            issues: vec![issue.into()],
        }
    }
}

/// True when the frame is essentially black: more than `threshold_pct` of
/// pixels fall below brightness 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

/// Apply the gate thresholds to one detection. Pure, so the boundary
/// behavior is testable without a loaded model.
pub fn evaluate_detection(
    confidence: f32,
    face_area: f32,
    frame_area: f32,
    t: &QualityThresholds,
) -> QualityAssessment {
    let mut issues = Vec::new();
    let mut good = confidence > t.good_confidence;

    if confidence < t.min_confidence {
        issues.push(ISSUE_LOW_CONFIDENCE.to_string());
        good = false;
    }

    if frame_area > 0.0 {
        let ratio = face_area / frame_area;
        if ratio <= t.min_area_ratio {
            issues.push(ISSUE_FACE_TOO_SMALL.to_string());
            good = false;
        } else if ratio >= t.max_area_ratio {
            issues.push(ISSUE_FACE_TOO_LARGE.to_string());
            good = false;
        }
    }

    QualityAssessment {
        face_detected: true,
        confidence,
        is_good_quality: good,
        issues,
    }
}

impl FaceEngine {
    /// Assess one frame for capture suitability.
    ///
    /// Side-effect-free with respect to session state and safe to call every
    /// tick. "Models loading" and "video feed negotiating" are legitimate
    /// transient states, not errors.
    pub fn assess(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        thresholds: &QualityThresholds,
    ) -> QualityAssessment {
        if !self.is_ready() {
            return QualityAssessment::unavailable(ISSUE_MODELS_LOADING);
        }
        if width == 0 || height == 0 || frame.len() < (width * height) as usize {
            return QualityAssessment::unavailable(ISSUE_VIDEO_LOADING);
        }
        if is_dark_frame(frame, thresholds.dark_fraction) {
            return QualityAssessment::unavailable(ISSUE_TOO_DARK);
        }

        match self.detect_best_face(frame, width, height) {
            Ok(Some(face)) => evaluate_detection(
                face.confidence,
                face.area(),
                (width * height) as f32,
                thresholds,
            ),
            Ok(None) => QualityAssessment::unavailable(ISSUE_NO_FACE),
            Err(EngineError::NotReady) => QualityAssessment::unavailable(ISSUE_MODELS_LOADING),
            Err(e) => {
                tracing::warn!(error = %e, "quality assessment inference failed");
                QualityAssessment::unavailable(ISSUE_ANALYSIS_FAILED)
            }
        }
    }
}
