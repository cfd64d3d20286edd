//! Bounded execution history

use crate::action::Action;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// How an action reached (or failed to reach) the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMethod {
    /// Executed on submit
    Direct,
    /// Executed later by the queue drain
    Queued,
    /// Recorded only, executor bypassed
    TestMode,
    /// Refused because the queue was full
    Dropped,
}

impl fmt::Display for DispatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMethod::Direct => write!(f, "direct"),
            DispatchMethod::Queued => write!(f, "queued"),
            DispatchMethod::TestMode => write!(f, "test-mode"),
            DispatchMethod::Dropped => write!(f, "dropped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub action: Action,
    pub description: String,
    pub timestamp: DateTime<Local>,
    pub success: bool,
    pub method: DispatchMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn new(
        action: Action,
        description: impl Into<String>,
        method: DispatchMethod,
        error: Option<String>,
    ) -> Self {
        Self {
            action,
            description: description.into(),
            timestamp: Local::now(),
            success: error.is_none(),
            method,
            error,
        }
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<9} {:<10} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.method.to_string(),
            self.action.to_string(),
            self.description
        )?;
        if let Some(err) = &self.error {
            write!(f, " [failed: {}]", err)?;
        }
        Ok(())
    }
}

/// Ring buffer of the most recent entries; the oldest is evicted when full
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Key;

    fn entry(description: &str) -> HistoryEntry {
        HistoryEntry::new(
            Action::key(Key::Left),
            description,
            DispatchMethod::Direct,
            None,
        )
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = History::new(2);
        history.push(entry("a"));
        history.push(entry("b"));
        history.push(entry("c"));

        let descriptions: Vec<&str> = history.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(descriptions, vec!["b", "c"]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut history = History::new(0);
        history.push(entry("a"));
        history.push(entry("b"));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.last().unwrap().description, "b");
    }

    #[test]
    fn test_error_marks_failure() {
        let failed = HistoryEntry::new(
            Action::key(Key::Left),
            "x",
            DispatchMethod::Dropped,
            Some("queue full".to_string()),
        );
        assert!(!failed.success);
        assert!(failed.to_string().contains("[failed: queue full]"));
        assert!(entry("ok").success);
    }
}
