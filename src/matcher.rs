//! Phrase matcher
//!
//! Scans commands in priority order looking for the phrase closest to a
//! normalized transcript:
//!
//! 1. An exact phrase match returns immediately with score 0.
//! 2. A substring match in either direction scores the length difference.
//! 3. A fuzzy match scores the edit distance, within `fuzzy::max_edits`.
//!
//! Only a strictly lower score replaces the current best, so a higher-priority
//! command keeps a tie against anything scanned after it. Note that substring
//! scores (length difference) and fuzzy scores (edit distance) are compared
//! directly even though they measure different things.

use crate::fuzzy::bounded_distance;
use crate::registry::{Command, CommandRegistry};
use serde::Serialize;
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Exact,
    Substring,
    Fuzzy,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::Exact => write!(f, "exact"),
            MatchMethod::Substring => write!(f, "substring"),
            MatchMethod::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// Best phrase found for one transcript
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate<'a> {
    pub command: &'a Command,
    pub matched_phrase: &'a str,
    /// 0 for exact; lower is better
    pub score: usize,
    pub method: MatchMethod,
}

pub struct Matcher<'a> {
    registry: &'a CommandRegistry,
}

impl<'a> Matcher<'a> {
    pub fn new(registry: &'a CommandRegistry) -> Self {
        Self { registry }
    }

    /// Find the best candidate for an already-normalized transcript
    #[hotpath::measure]
    pub fn find(&self, transcript: &str) -> Option<MatchCandidate<'a>> {
        if transcript.is_empty() {
            return None;
        }

        let transcript_len = transcript.chars().count();
        let mut best: Option<MatchCandidate<'a>> = None;

        for command in self.registry.by_priority() {
            for phrase in command.phrases() {
                if phrase == transcript {
                    return Some(MatchCandidate {
                        command,
                        matched_phrase: phrase,
                        score: 0,
                        method: MatchMethod::Exact,
                    });
                }

                if transcript.contains(phrase.as_str()) || phrase.contains(transcript) {
                    let score = transcript_len.abs_diff(phrase.chars().count());
                    offer(&mut best, command, phrase, score, MatchMethod::Substring);
                }

                if let Some(distance) = bounded_distance(phrase, transcript) {
                    offer(&mut best, command, phrase, distance, MatchMethod::Fuzzy);
                }
            }
        }

        if let Some(candidate) = &best {
            trace!(
                transcript,
                phrase = candidate.matched_phrase,
                score = candidate.score,
                method = %candidate.method,
                "best candidate"
            );
        }
        best
    }
}

fn offer<'a>(
    best: &mut Option<MatchCandidate<'a>>,
    command: &'a Command,
    phrase: &'a str,
    score: usize,
    method: MatchMethod,
) {
    if best.as_ref().is_none_or(|b| score < b.score) {
        *best = Some(MatchCandidate {
            command,
            matched_phrase: phrase,
            score,
            method,
        });
    }
}
