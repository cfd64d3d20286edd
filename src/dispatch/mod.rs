//! Rate-limited action dispatch
//!
//! Every action passes through one shared rate window:
//!
//! - **Immediate**: the window since the last execution has elapsed and nothing
//!   is waiting, so the action runs now
//! - **Queued**: the window is still active (or others are waiting) and the
//!   queue has room; the action runs later in FIFO order
//! - **Dropped**: the queue is full; the caller gets [`DispatchError::QueueFull`]
//!
//! The dispatcher never sleeps. [`Dispatcher::next_due`] tells the owner when the
//! head of the queue becomes runnable and [`Dispatcher::drain_due`] runs it, so
//! the owning event loop schedules a single wake-up instead of blocking.

mod executor;
mod history;

pub use executor::{ActionExecutor, ExecutorError, LogExecutor};
#[cfg(feature = "keys")]
pub use executor::KeyboardExecutor;
pub use history::{DispatchMethod, History, HistoryEntry};

use crate::action::Action;
use crate::config::DispatchConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const MIN_RATE_LIMIT: Duration = Duration::from_millis(100);
pub const MAX_RATE_LIMIT: Duration = Duration::from_millis(2000);
pub const MAX_QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Rate window active and the queue already holds `capacity` actions
    #[error("rate limited: queue full ({capacity} pending)")]
    QueueFull { capacity: usize },
    #[error("executor failed: {0}")]
    Executor(#[from] ExecutorError),
}

/// How a submitted action was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Immediate,
    /// Waiting; `position` is 1 for the head of the queue
    Queued { position: usize },
    TestMode,
}

/// Result of running the queue head
#[derive(Debug, Clone)]
pub struct Drained {
    pub entry: HistoryEntry,
    pub result: Result<(), DispatchError>,
}

/// An action waiting for the rate window
#[derive(Debug, Clone)]
pub struct QueuedAction {
    pub action: Action,
    pub description: String,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub capacity: usize,
    /// A drain is scheduled
    pub processing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due_in_ms: Option<u64>,
    pub rate_limit_ms: u64,
    pub test_mode: bool,
}

/// Clamp a rate window into 100-2000ms
pub fn clamp_rate_limit(window: Duration) -> Duration {
    let clamped = window.clamp(MIN_RATE_LIMIT, MAX_RATE_LIMIT);
    if clamped != window {
        warn!(
            requested_ms = window.as_millis() as u64,
            applied_ms = clamped.as_millis() as u64,
            "rate limit clamped"
        );
    }
    clamped
}

/// Clamp a queue capacity into 1-16
pub fn clamp_queue_size(size: usize) -> usize {
    let clamped = size.clamp(1, MAX_QUEUE_SIZE);
    if clamped != size {
        warn!(requested = size, applied = clamped, "queue size clamped");
    }
    clamped
}

pub struct Dispatcher {
    executor: Box<dyn ActionExecutor>,
    rate_limit: Duration,
    max_queue_size: usize,
    test_mode: bool,
    last_executed_at: Option<Instant>,
    queue: VecDeque<QueuedAction>,
    /// Guards against more than one drain being scheduled
    processing: bool,
    history: History,
}

impl Dispatcher {
    pub fn new(executor: Box<dyn ActionExecutor>, config: &DispatchConfig) -> Self {
        Self {
            executor,
            rate_limit: clamp_rate_limit(Duration::from_millis(config.rate_limit_ms)),
            max_queue_size: clamp_queue_size(config.max_queue_size),
            test_mode: config.test_mode,
            last_executed_at: None,
            queue: VecDeque::new(),
            processing: false,
            history: History::new(config.history_size),
        }
    }

    /// Submit an action at time `now`
    pub fn submit(
        &mut self,
        action: Action,
        description: &str,
        now: Instant,
    ) -> Result<Dispatched, DispatchError> {
        if self.test_mode {
            info!(action = %action, "test mode: recorded without executing");
            self.history.push(HistoryEntry::new(
                action,
                description,
                DispatchMethod::TestMode,
                None,
            ));
            return Ok(Dispatched::TestMode);
        }

        if self.queue.is_empty() && self.window_elapsed(now) {
            self.run(action, description, DispatchMethod::Direct, now)?;
            return Ok(Dispatched::Immediate);
        }

        if self.queue.len() >= self.max_queue_size {
            let err = DispatchError::QueueFull {
                capacity: self.max_queue_size,
            };
            warn!(action = %action, "dropping action: {}", err);
            self.history.push(HistoryEntry::new(
                action,
                description,
                DispatchMethod::Dropped,
                Some(err.to_string()),
            ));
            return Err(err);
        }

        self.queue.push_back(QueuedAction {
            action,
            description: description.to_string(),
            enqueued_at: now,
        });
        self.processing = true;
        let position = self.queue.len();
        debug!(position, "action queued");
        Ok(Dispatched::Queued { position })
    }

    /// When the queue head becomes runnable, if a drain is pending
    pub fn next_due(&self) -> Option<Instant> {
        if !self.processing {
            return None;
        }
        let head = self.queue.front()?;
        Some(match self.last_executed_at {
            Some(last) => last + self.rate_limit,
            None => head.enqueued_at,
        })
    }

    /// Run the queue head if its time has come. Returns the history entry it
    /// produced and the executor outcome.
    pub fn drain_due(&mut self, now: Instant) -> Option<Drained> {
        if self.queue.is_empty() {
            self.processing = false;
            return None;
        }
        if !self.window_elapsed(now) {
            return None;
        }

        let queued = self.queue.pop_front()?;
        let waited = now.duration_since(queued.enqueued_at);
        debug!(
            action = %queued.action,
            waited_ms = waited.as_millis() as u64,
            remaining = self.queue.len(),
            "draining queued action"
        );
        let method = if self.test_mode {
            DispatchMethod::TestMode
        } else {
            DispatchMethod::Queued
        };
        let result = self.run(queued.action, &queued.description, method, now);
        if self.queue.is_empty() {
            self.processing = false;
        }
        let entry = self.history.last().cloned()?;
        Some(Drained { entry, result })
    }

    /// Discard everything still waiting; each discarded action is recorded as failed
    pub fn cancel_pending(&mut self) -> usize {
        let cancelled = self.queue.len();
        for queued in self.queue.drain(..) {
            self.history.push(HistoryEntry::new(
                queued.action,
                queued.description,
                DispatchMethod::Queued,
                Some("cancelled".to_string()),
            ));
        }
        self.processing = false;
        if cancelled > 0 {
            info!(cancelled, "pending actions cancelled");
        }
        cancelled
    }

    fn window_elapsed(&self, now: Instant) -> bool {
        self.last_executed_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.rate_limit)
    }

    fn run(
        &mut self,
        action: Action,
        description: &str,
        method: DispatchMethod,
        now: Instant,
    ) -> Result<(), DispatchError> {
        if method == DispatchMethod::TestMode {
            self.history
                .push(HistoryEntry::new(action, description, method, None));
            return Ok(());
        }

        // An attempt consumes the window whether or not it succeeds
        self.last_executed_at = Some(now);
        match self.executor.execute(&action) {
            Ok(()) => {
                info!(action = %action, %method, "executed");
                self.history
                    .push(HistoryEntry::new(action, description, method, None));
                Ok(())
            }
            Err(e) => {
                warn!(action = %action, %method, "executor failed: {}", e);
                self.history.push(HistoryEntry::new(
                    action,
                    description,
                    method,
                    Some(e.to_string()),
                ));
                Err(DispatchError::Executor(e))
            }
        }
    }

    pub fn set_rate_limit(&mut self, window: Duration) -> Duration {
        self.rate_limit = clamp_rate_limit(window);
        self.rate_limit
    }

    pub fn set_max_queue_size(&mut self, size: usize) -> usize {
        self.max_queue_size = clamp_queue_size(size);
        self.max_queue_size
    }

    pub fn set_test_mode(&mut self, enabled: bool) {
        self.test_mode = enabled;
    }

    pub fn rate_limit(&self) -> Duration {
        self.rate_limit
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn pending(&self) -> impl Iterator<Item = &QueuedAction> {
        self.queue.iter()
    }

    pub fn queue_status(&self, now: Instant) -> QueueStatus {
        QueueStatus {
            pending: self.queue.len(),
            capacity: self.max_queue_size,
            processing: self.processing,
            next_due_in_ms: self
                .next_due()
                .map(|due| due.saturating_duration_since(now).as_millis() as u64),
            rate_limit_ms: self.rate_limit.as_millis() as u64,
            test_mode: self.test_mode,
        }
    }
}
