//! Session controller - runs speech events through normalize, match, gate and dispatch
//!
//! The controller owns every piece of mutable state (registry, thresholds,
//! dispatcher, engine) and is driven by a single task: control commands and
//! speech events arrive on channels, and one timer covers both the dispatcher's
//! queue drain and engine restarts.

use crate::action::Action;
use crate::config::{Config, EngineConfig};
use crate::dispatch::{
    ActionExecutor, DispatchError, Dispatched, Dispatcher, HistoryEntry, QueueStatus,
};
use crate::engine::{EngineError, SpeechEngine, SpeechEvent, best_alternative};
use crate::gate::{Outcome, Thresholds};
use crate::matcher::{MatchMethod, Matcher};
use crate::normalize::normalize;
use crate::registry::{CommandRegistry, DEFAULT_CUSTOM_PRIORITY, RegistryError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenState {
    Idle,
    Listening,
}

impl fmt::Display for ListenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenState::Idle => write!(f, "idle"),
            ListenState::Listening => write!(f, "listening"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("speech engine unavailable: {0}")]
    EngineUnavailable(#[from] EngineError),
    #[error("speech engine disconnected, gave up after {attempts} restart attempts")]
    EngineDisconnected { attempts: u32 },
    #[error("speech engine error: {0}")]
    Engine(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The command a transcript resolved to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedCommand {
    pub phrase: String,
    pub action: Action,
    pub description: String,
    pub method: MatchMethod,
    pub score: usize,
}

/// Outcome of running one transcript through normalize, match and gate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// Normalized transcript
    pub transcript: String,
    pub confidence: f32,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<ResolvedCommand>,
}

/// Resolve a raw transcript against the registry
pub fn resolve(
    registry: &CommandRegistry,
    thresholds: &Thresholds,
    transcript: &str,
    confidence: f32,
) -> Resolution {
    let normalized = normalize(transcript);
    let candidate = Matcher::new(registry).find(&normalized);
    let decision = thresholds.decide(candidate, confidence);

    Resolution {
        transcript: normalized,
        confidence,
        outcome: decision.outcome,
        command: decision.candidate.map(|c| ResolvedCommand {
            phrase: c.matched_phrase.to_string(),
            action: c.command.action().clone(),
            description: c.command.description().to_string(),
            method: c.method,
            score: c.score,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub state: ListenState,
    /// Execute threshold as configured
    pub confidence_threshold: f32,
    /// Threshold applied to the next transcript; differs while trainer mode is on
    pub effective_threshold: f32,
    pub trainer_mode: bool,
    pub history: Vec<HistoryEntry>,
    pub queue: QueueStatus,
}

#[derive(Clone, Debug)]
pub enum SessionEvent {
    StateChanged(ListenState),
    Interim(String),
    /// Execute decision, handed to the dispatcher
    Command(Resolution),
    /// Match found but confidence below the execute threshold
    LowConfidence(Resolution),
    /// Rejected: unintelligible or nothing matched
    NoMatch(Resolution),
    /// The dispatcher ran (or recorded, in test mode) an action
    Executed(HistoryEntry),
    Error(SessionError),
}

#[derive(Debug)]
pub enum SessionCommand {
    Start,
    Stop,
    SetThreshold(f32),
    SetTrainerMode(bool),
    SetRateLimit(Duration),
    SetMaxQueueSize(usize),
    SetTestMode(bool),
    AddCommand {
        phrase: String,
        action: Action,
        description: Option<String>,
        priority: Option<u8>,
    },
    RemoveCommand(String),
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

/// Bounded exponential backoff for engine restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            base_delay: Duration::from_millis(config.restart_base_delay_ms),
            max_delay: Duration::from_millis(config.restart_max_delay_ms),
        }
    }

    /// Delay before restart attempt `attempt` (1-based): base doubled each time, capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

pub struct SessionController {
    registry: CommandRegistry,
    thresholds: Thresholds,
    dispatcher: Dispatcher,
    engine: Box<dyn SpeechEngine>,
    restart: RestartPolicy,
    restart_attempts: u32,
    restart_at: Option<Instant>,
    state: ListenState,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        registry: CommandRegistry,
        config: &Config,
        executor: Box<dyn ActionExecutor>,
        engine: Box<dyn SpeechEngine>,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            registry,
            thresholds: Thresholds::from_config(&config.recognition),
            dispatcher: Dispatcher::new(executor, &config.dispatch),
            engine,
            restart: RestartPolicy::from_config(&config.engine),
            restart_attempts: 0,
            restart_at: None,
            state: ListenState::Idle,
            event_tx,
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&mut self, state: ListenState) {
        if self.state != state {
            info!(%state, "session state changed");
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    /// Start listening. An engine that cannot start is a fatal error.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state == ListenState::Listening {
            return Ok(());
        }
        self.engine.start()?;
        self.restart_attempts = 0;
        self.restart_at = None;
        self.set_state(ListenState::Listening);
        Ok(())
    }

    /// Stop listening. Actions already queued keep draining.
    pub fn stop(&mut self) {
        self.restart_at = None;
        self.restart_attempts = 0;
        if self.state == ListenState::Listening {
            // Idle first so the engine's End is not taken as a disconnect
            self.set_state(ListenState::Idle);
            self.engine.stop();
        }
    }

    /// Stop listening and discard queued actions
    pub fn shutdown(&mut self) {
        self.stop();
        let cancelled = self.dispatcher.cancel_pending();
        info!(cancelled, "session shut down");
    }

    pub fn handle_speech(&mut self, event: SpeechEvent, now: Instant) {
        match event {
            SpeechEvent::Start => debug!("engine started"),
            SpeechEvent::Interim { transcript } => {
                if self.state == ListenState::Listening {
                    self.restart_attempts = 0;
                    self.emit(SessionEvent::Interim(transcript));
                }
            }
            SpeechEvent::Final { alternatives } => {
                if self.state != ListenState::Listening {
                    debug!("final transcript while idle, ignored");
                    return;
                }
                self.restart_attempts = 0;
                let Some(best) = best_alternative(&alternatives) else {
                    return;
                };
                let (transcript, confidence) = (best.transcript.clone(), best.confidence);
                self.process_transcript(&transcript, confidence, now);
            }
            SpeechEvent::Error { message } => {
                warn!("speech engine error: {}", message);
                self.emit(SessionEvent::Error(SessionError::Engine(message)));
            }
            SpeechEvent::End => {
                if self.state == ListenState::Listening {
                    self.on_disconnect(now);
                }
            }
        }
    }

    #[hotpath::measure]
    fn process_transcript(&mut self, transcript: &str, confidence: f32, now: Instant) {
        let resolution = resolve(&self.registry, &self.thresholds, transcript, confidence);
        debug!(
            transcript = %resolution.transcript,
            confidence,
            outcome = %resolution.outcome,
            "resolved"
        );

        match resolution.outcome {
            Outcome::Execute => {
                let Some(command) = resolution.command.clone() else {
                    return;
                };
                self.emit(SessionEvent::Command(resolution));
                self.submit(command.action, &command.description, now);
            }
            Outcome::Suggest => self.emit(SessionEvent::LowConfidence(resolution)),
            Outcome::Reject(_) => self.emit(SessionEvent::NoMatch(resolution)),
        }
    }

    fn submit(&mut self, action: Action, description: &str, now: Instant) {
        match self.dispatcher.submit(action, description, now) {
            Ok(Dispatched::Queued { position }) => debug!(position, "waiting for rate window"),
            Ok(Dispatched::Immediate | Dispatched::TestMode) => {
                if let Some(entry) = self.dispatcher.history().last() {
                    self.emit(SessionEvent::Executed(entry.clone()));
                }
            }
            Err(e @ DispatchError::Executor(_)) => {
                if let Some(entry) = self.dispatcher.history().last() {
                    self.emit(SessionEvent::Executed(entry.clone()));
                }
                self.emit(SessionEvent::Error(e.into()));
            }
            Err(e) => self.emit(SessionEvent::Error(e.into())),
        }
    }

    fn on_disconnect(&mut self, now: Instant) {
        self.restart_attempts += 1;
        if self.restart_attempts > self.restart.max_restarts {
            let attempts = self.restart_attempts - 1;
            warn!(attempts, "speech engine restart limit reached");
            self.restart_at = None;
            self.restart_attempts = 0;
            self.engine.stop();
            self.set_state(ListenState::Idle);
            self.emit(SessionEvent::Error(SessionError::EngineDisconnected {
                attempts,
            }));
            return;
        }
        let delay = self.restart.delay(self.restart_attempts);
        warn!(
            attempt = self.restart_attempts,
            delay_ms = delay.as_millis() as u64,
            "speech engine ended unexpectedly, restarting"
        );
        self.restart_at = Some(now + delay);
    }

    /// Earliest time `on_timer` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.dispatcher.next_due(), self.restart_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn on_timer(&mut self, now: Instant) {
        if self.restart_at.is_some_and(|at| at <= now) {
            self.restart_at = None;
            if self.state == ListenState::Listening {
                if let Err(e) = self.engine.start() {
                    warn!("engine restart failed: {}", e);
                    self.on_disconnect(now);
                }
            }
        }

        if let Some(drained) = self.dispatcher.drain_due(now) {
            self.emit(SessionEvent::Executed(drained.entry));
            if let Err(e) = drained.result {
                self.emit(SessionEvent::Error(e.into()));
            }
        }
    }

    pub fn set_threshold(&mut self, value: f32) -> f32 {
        let applied = self.thresholds.set_confidence(value);
        info!(threshold = applied, "confidence threshold set");
        applied
    }

    pub fn set_trainer_mode(&mut self, enabled: bool) {
        info!(enabled, "trainer mode");
        self.thresholds.set_trainer_mode(enabled);
    }

    pub fn set_rate_limit(&mut self, window: Duration) -> Duration {
        let applied = self.dispatcher.set_rate_limit(window);
        info!(rate_limit_ms = applied.as_millis() as u64, "rate limit set");
        applied
    }

    pub fn set_max_queue_size(&mut self, size: usize) -> usize {
        let applied = self.dispatcher.set_max_queue_size(size);
        info!(max_queue_size = applied, "queue size set");
        applied
    }

    pub fn set_test_mode(&mut self, enabled: bool) {
        info!(enabled, "test mode");
        self.dispatcher.set_test_mode(enabled);
    }

    pub fn add_command(
        &mut self,
        phrase: &str,
        action: Action,
        description: Option<String>,
        priority: Option<u8>,
    ) -> Result<(), SessionError> {
        let description = description.unwrap_or_else(|| phrase.to_string());
        self.registry.add(
            phrase,
            action,
            &description,
            priority.unwrap_or(DEFAULT_CUSTOM_PRIORITY),
        )?;
        info!(phrase, "command added");
        Ok(())
    }

    pub fn remove_command(&mut self, phrase: &str) -> bool {
        let removed = self.registry.remove(phrase);
        if removed {
            info!(phrase, "command removed");
        }
        removed
    }

    pub fn state(&self) -> ListenState {
        self.state
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            state: self.state,
            confidence_threshold: self.thresholds.confidence(),
            effective_threshold: self.thresholds.effective(),
            trainer_mode: self.thresholds.trainer_mode(),
            history: self.dispatcher.history().snapshot(),
            queue: self.dispatcher.queue_status(now),
        }
    }

    /// Returns false when the loop should exit
    fn handle_command(&mut self, command: SessionCommand, now: Instant) -> bool {
        match command {
            SessionCommand::Start => {
                if let Err(e) = self.start() {
                    warn!("failed to start listening: {}", e);
                    self.emit(SessionEvent::Error(e));
                }
            }
            SessionCommand::Stop => self.stop(),
            SessionCommand::SetThreshold(value) => {
                self.set_threshold(value);
            }
            SessionCommand::SetTrainerMode(enabled) => self.set_trainer_mode(enabled),
            SessionCommand::SetRateLimit(window) => {
                self.set_rate_limit(window);
            }
            SessionCommand::SetMaxQueueSize(size) => {
                self.set_max_queue_size(size);
            }
            SessionCommand::SetTestMode(enabled) => self.set_test_mode(enabled),
            SessionCommand::AddCommand {
                phrase,
                action,
                description,
                priority,
            } => {
                if let Err(e) = self.add_command(&phrase, action, description, priority) {
                    self.emit(SessionEvent::Error(e));
                }
            }
            SessionCommand::RemoveCommand(phrase) => {
                if !self.remove_command(&phrase) {
                    debug!(phrase = %phrase, "no such command");
                }
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot(now));
            }
            SessionCommand::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    /// Drive the session until `Shutdown` or until the command channel closes
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        speech: flume::Receiver<SpeechEvent>,
    ) {
        let mut speech_open = true;

        loop {
            let deadline = self.next_deadline();
            let timeout_fut = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd, Instant::now()) {
                                break;
                            }
                        }
                        None => {
                            self.shutdown();
                            break;
                        }
                    }
                }

                event = speech.recv_async(), if speech_open => {
                    match event {
                        Ok(event) => self.handle_speech(event, Instant::now()),
                        Err(_) => {
                            debug!("speech channel closed");
                            speech_open = false;
                        }
                    }
                }

                _ = timeout_fut, if deadline.is_some() => {
                    self.on_timer(Instant::now());
                }
            }
        }
    }
}
