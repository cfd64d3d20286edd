//! Confidence gate - decides whether a match is executed, suggested, or rejected
//!
//! Below the low-confidence floor a transcript is treated as unintelligible and
//! rejected outright. Above it, a match executes only when the recognizer's
//! confidence reaches the active threshold (the stricter trainer threshold in
//! trainer mode); otherwise it is surfaced as a suggestion.

use crate::config::RecognitionConfig;
use crate::matcher::MatchCandidate;
use serde::Serialize;
use std::fmt;
use tracing::warn;

pub const MIN_CONFIDENCE_THRESHOLD: f32 = 0.50;
pub const MAX_CONFIDENCE_THRESHOLD: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectReason {
    /// Confidence below the low-confidence floor
    Unintelligible,
    /// Nothing in the registry qualified
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Execute,
    Suggest,
    Reject(RejectReason),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Execute => write!(f, "execute"),
            Outcome::Suggest => write!(f, "suggest"),
            Outcome::Reject(RejectReason::Unintelligible) => write!(f, "reject (unintelligible)"),
            Outcome::Reject(RejectReason::NoMatch) => write!(f, "reject (no match)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision<'a> {
    pub outcome: Outcome,
    /// Kept for suggestions and executions; None when rejected
    pub candidate: Option<MatchCandidate<'a>>,
    pub confidence: f32,
}

/// Thresholds read by the gate on every decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    confidence: f32,
    trainer_mode: bool,
    trainer_mode_threshold: f32,
    low_confidence: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&RecognitionConfig::default())
    }
}

/// Clamp an execute threshold into its allowed range
pub fn clamp_confidence_threshold(value: f32) -> f32 {
    if value.is_nan() {
        return MIN_CONFIDENCE_THRESHOLD;
    }
    let clamped = value.clamp(MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD);
    if clamped != value {
        warn!(requested = value, applied = clamped, "confidence threshold clamped");
    }
    clamped
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

impl Thresholds {
    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self {
            confidence: clamp_confidence_threshold(config.confidence_threshold),
            trainer_mode: config.trainer_mode,
            trainer_mode_threshold: clamp_unit(config.trainer_mode_threshold),
            low_confidence: clamp_unit(config.low_confidence_threshold),
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn trainer_mode(&self) -> bool {
        self.trainer_mode
    }

    pub fn trainer_mode_threshold(&self) -> f32 {
        self.trainer_mode_threshold
    }

    pub fn low_confidence(&self) -> f32 {
        self.low_confidence
    }

    /// Threshold that gates execution right now
    pub fn effective(&self) -> f32 {
        if self.trainer_mode {
            self.trainer_mode_threshold
        } else {
            self.confidence
        }
    }

    /// Set the execute threshold; returns the clamped value actually applied
    pub fn set_confidence(&mut self, value: f32) -> f32 {
        self.confidence = clamp_confidence_threshold(value);
        self.confidence
    }

    pub fn set_trainer_mode(&mut self, enabled: bool) {
        self.trainer_mode = enabled;
    }

    /// Classify a match and its raw confidence
    pub fn decide<'a>(
        &self,
        candidate: Option<MatchCandidate<'a>>,
        confidence: f32,
    ) -> GateDecision<'a> {
        // NaN compares false both ways, so test finiteness before the floor
        let (outcome, candidate) = if !confidence.is_finite() || confidence < self.low_confidence {
            (Outcome::Reject(RejectReason::Unintelligible), None)
        } else {
            match candidate {
                None => (Outcome::Reject(RejectReason::NoMatch), None),
                Some(c) if confidence >= self.effective() => (Outcome::Execute, Some(c)),
                Some(c) => (Outcome::Suggest, Some(c)),
            }
        };

        GateDecision {
            outcome,
            candidate,
            confidence,
        }
    }
}
