//! Speech engine boundary
//!
//! An engine pushes [`SpeechEvent`]s into a flume channel owned by the session.
//! The session only calls [`SpeechEngine::start`] and [`SpeechEngine::stop`];
//! everything else flows through events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Recognition not supported or not permitted on this system
    #[error("{0}")]
    Unavailable(String),
    #[error("failed to start: {0}")]
    StartFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub transcript: String,
    pub confidence: f32,
}

impl Alternative {
    pub fn new(transcript: impl Into<String>, confidence: f32) -> Self {
        Self {
            transcript: transcript.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Start,
    Interim { transcript: String },
    Final { alternatives: Vec<Alternative> },
    Error { message: String },
    End,
}

impl SpeechEvent {
    /// Final event carrying a single transcript
    pub fn final_text(transcript: impl Into<String>, confidence: f32) -> Self {
        SpeechEvent::Final {
            alternatives: vec![Alternative::new(transcript, confidence)],
        }
    }
}

/// Highest-confidence alternative; the first one wins a tie.
/// Alternatives with a NaN confidence are skipped.
pub fn best_alternative(alternatives: &[Alternative]) -> Option<&Alternative> {
    alternatives
        .iter()
        .filter(|alt| !alt.confidence.is_nan())
        .fold(None, |best: Option<&Alternative>, alt| match best {
            Some(b) if b.confidence >= alt.confidence => Some(b),
            _ => Some(alt),
        })
}

pub trait SpeechEngine {
    fn start(&mut self) -> Result<(), EngineError>;
    fn stop(&mut self);
}

/// Engine fed by typed lines instead of a microphone
///
/// Line format:
/// - `turn left` - final transcript, confidence 1.0
/// - `turn left @0.72` - final transcript with confidence
/// - `turn lift @0.6 | turn left @0.9` - several alternatives
/// - `~turn le` - interim transcript
pub struct ConsoleEngine {
    tx: flume::Sender<SpeechEvent>,
    running: Arc<AtomicBool>,
}

/// Cloneable handle used by the input thread to feed lines
#[derive(Clone)]
pub struct ConsoleFeed {
    tx: flume::Sender<SpeechEvent>,
    running: Arc<AtomicBool>,
}

impl ConsoleEngine {
    pub fn new(tx: flume::Sender<SpeechEvent>) -> Self {
        Self {
            tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn feed(&self) -> ConsoleFeed {
        ConsoleFeed {
            tx: self.tx.clone(),
            running: Arc::clone(&self.running),
        }
    }
}

impl SpeechEngine for ConsoleEngine {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.tx.is_disconnected() {
            return Err(EngineError::Unavailable("event channel closed".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        let _ = self.tx.send(SpeechEvent::Start);
        Ok(())
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(SpeechEvent::End);
        }
    }
}

impl ConsoleFeed {
    /// Parse and forward a line. Returns false when the engine is not running
    /// or the line holds no transcript.
    pub fn push_line(&self, line: &str) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            debug!("engine stopped, ignoring input");
            return false;
        }
        match parse_line(line) {
            Some(event) => self.tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Parse one console line into a speech event
pub fn parse_line(line: &str) -> Option<SpeechEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(partial) = line.strip_prefix('~') {
        let transcript = partial.trim();
        if transcript.is_empty() {
            return None;
        }
        return Some(SpeechEvent::Interim {
            transcript: transcript.to_string(),
        });
    }

    let alternatives: Vec<Alternative> = line
        .split('|')
        .filter_map(parse_alternative)
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    Some(SpeechEvent::Final { alternatives })
}

fn parse_alternative(part: &str) -> Option<Alternative> {
    let part = part.trim();
    let (text, confidence) = match part.rsplit_once('@') {
        Some((text, conf)) => match conf.trim().parse::<f32>() {
            Ok(c) if c.is_finite() => (text.trim(), c.clamp(0.0, 1.0)),
            // "nan" and "inf" parse as f32 but carry no confidence
            Ok(_) => (text.trim(), 0.0),
            // Not a confidence suffix, keep the whole text
            Err(_) => (part, 1.0),
        },
        None => (part, 1.0),
    };
    if text.is_empty() {
        return None;
    }
    Some(Alternative::new(text, confidence))
}
