/// Integration tests for the session event loop
///
/// The loop runs on a paused tokio clock, so rate-limit spacing and restart
/// backoff are checked against virtual time.
use pedalvox::config::Config;
use pedalvox::dispatch::{ActionExecutor, DispatchMethod, ExecutorError};
use pedalvox::engine::{ConsoleEngine, EngineError, SpeechEngine, SpeechEvent};
use pedalvox::gate::{Outcome, RejectReason};
use pedalvox::session::{
    ListenState, SessionCommand, SessionController, SessionError, SessionEvent,
};
use pedalvox::{Action, CommandRegistry, Key};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};

#[derive(Clone, Default)]
struct RecordingExecutor {
    log: Arc<Mutex<Vec<(Action, Instant)>>>,
}

impl RecordingExecutor {
    fn actions(&self) -> Vec<Action> {
        self.log.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }

    fn times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

impl ActionExecutor for RecordingExecutor {
    fn execute(&mut self, action: &Action) -> Result<(), ExecutorError> {
        self.log
            .lock()
            .unwrap()
            .push((action.clone(), Instant::now()));
        Ok(())
    }
}

/// Engine whose lifecycle is driven by the test
#[derive(Clone, Default)]
struct ScriptedEngine {
    starts: Arc<AtomicU32>,
}

impl SpeechEngine for ScriptedEngine {
    fn start(&mut self) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {}
}

struct Rig {
    controller: SessionController,
    executor: RecordingExecutor,
    engine: ScriptedEngine,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    speech_tx: flume::Sender<SpeechEvent>,
    speech_rx: flume::Receiver<SpeechEvent>,
}

fn rig(config: Config) -> Rig {
    let executor = RecordingExecutor::default();
    let engine = ScriptedEngine::default();
    let (event_tx, events) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (speech_tx, speech_rx) = flume::unbounded();
    let mut controller = SessionController::new(
        CommandRegistry::with_builtins(),
        &config,
        Box::new(executor.clone()),
        Box::new(engine.clone()),
        event_tx,
    );
    controller.start().unwrap();
    Rig {
        controller,
        executor,
        engine,
        events,
        cmd_tx,
        cmd_rx,
        speech_tx,
        speech_rx,
    }
}

fn collect(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn burst_is_executed_in_order_spaced_by_rate_window() {
    let Rig {
        controller,
        executor,
        cmd_tx,
        cmd_rx,
        speech_tx,
        speech_rx,
        ..
    } = rig(Config::default());

    let driver = async move {
        for phrase in ["turn left", "turn right", "u turn"] {
            speech_tx
                .send(SpeechEvent::final_text(phrase, 0.9))
                .unwrap();
        }
        sleep(Duration::from_secs(2)).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx.send(SessionCommand::Snapshot(reply_tx)).unwrap();
        let snapshot = reply_rx.await.unwrap();
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
        snapshot
    };

    let ((), snapshot) = tokio::join!(controller.run(cmd_rx, speech_rx), driver);

    assert_eq!(
        executor.actions(),
        vec![
            Action::key(Key::Left),
            Action::key(Key::Right),
            Action::key(Key::Down)
        ]
    );
    let times = executor.times();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(300));
    }

    let methods: Vec<DispatchMethod> = snapshot.history.iter().map(|e| e.method).collect();
    assert_eq!(
        methods,
        vec![
            DispatchMethod::Direct,
            DispatchMethod::Queued,
            DispatchMethod::Queued
        ]
    );
    assert_eq!(snapshot.queue.pending, 0);
    assert!(!snapshot.queue.processing);
}

#[tokio::test(start_paused = true)]
async fn overflow_is_reported_as_rate_limit_error() {
    let mut config = Config::default();
    config.dispatch.max_queue_size = 1;
    let Rig {
        controller,
        executor,
        mut events,
        cmd_tx,
        cmd_rx,
        speech_tx,
        speech_rx,
        ..
    } = rig(config);

    let driver = async move {
        for phrase in ["turn left", "turn right", "u turn"] {
            speech_tx
                .send(SpeechEvent::final_text(phrase, 0.9))
                .unwrap();
        }
        sleep(Duration::from_secs(1)).await;
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
    };
    tokio::join!(controller.run(cmd_rx, speech_rx), driver);

    assert_eq!(
        executor.actions(),
        vec![Action::key(Key::Left), Action::key(Key::Right)]
    );
    let events = collect(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Error(SessionError::Dispatch(
            pedalvox::dispatch::DispatchError::QueueFull { capacity: 1 }
        ))
    )));
}

#[tokio::test(start_paused = true)]
async fn stop_lets_queue_drain() {
    let Rig {
        controller,
        executor,
        mut events,
        cmd_tx,
        cmd_rx,
        speech_tx,
        speech_rx,
        ..
    } = rig(Config::default());

    let driver = async move {
        for phrase in ["turn left", "turn right", "u turn"] {
            speech_tx
                .send(SpeechEvent::final_text(phrase, 0.9))
                .unwrap();
        }
        sleep(Duration::from_millis(1)).await;
        cmd_tx.send(SessionCommand::Stop).unwrap();

        // Ignored while idle
        sleep(Duration::from_millis(1)).await;
        speech_tx
            .send(SpeechEvent::final_text("wave", 0.9))
            .unwrap();

        sleep(Duration::from_secs(1)).await;
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
    };
    tokio::join!(controller.run(cmd_rx, speech_rx), driver);

    assert_eq!(executor.actions().len(), 3);
    let events = collect(&mut events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SessionEvent::StateChanged(ListenState::Idle)))
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_pending_actions() {
    let Rig {
        controller,
        executor,
        cmd_tx,
        cmd_rx,
        speech_tx,
        speech_rx,
        ..
    } = rig(Config::default());

    let driver = async move {
        for phrase in ["turn left", "turn right", "u turn"] {
            speech_tx
                .send(SpeechEvent::final_text(phrase, 0.9))
                .unwrap();
        }
        sleep(Duration::from_millis(1)).await;
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
    };
    tokio::join!(controller.run(cmd_rx, speech_rx), driver);

    assert_eq!(executor.actions(), vec![Action::key(Key::Left)]);
}

#[tokio::test(start_paused = true)]
async fn engine_disconnect_restarts_then_gives_up() {
    let mut config = Config::default();
    config.engine.max_restarts = 2;
    let Rig {
        controller,
        engine,
        mut events,
        cmd_tx,
        cmd_rx,
        speech_tx,
        speech_rx,
        ..
    } = rig(config);
    let starts = Arc::clone(&engine.starts);

    let driver = async move {
        speech_tx.send(SpeechEvent::End).unwrap();
        sleep(Duration::from_millis(600)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 2);

        speech_tx.send(SpeechEvent::End).unwrap();
        sleep(Duration::from_millis(600)).await;
        // second backoff is 1000ms
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        sleep(Duration::from_millis(500)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 3);

        speech_tx.send(SpeechEvent::End).unwrap();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 3);
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
    };
    tokio::join!(controller.run(cmd_rx, speech_rx), driver);

    let events = collect(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Error(SessionError::EngineDisconnected { attempts: 2 })
    )));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::StateChanged(ListenState::Idle))
            | Some(SessionEvent::Error(SessionError::EngineDisconnected { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn console_lines_produce_observer_events() {
    let executor = RecordingExecutor::default();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (speech_tx, speech_rx) = flume::unbounded();
    let engine = ConsoleEngine::new(speech_tx);
    let feed = engine.feed();

    let mut controller = SessionController::new(
        CommandRegistry::with_builtins(),
        &Config::default(),
        Box::new(executor.clone()),
        Box::new(engine),
        event_tx,
    );
    controller.start().unwrap();

    let driver = async move {
        for line in [
            "~turn le",
            "turn left @0.90",
            "ride on @0.68",
            "banana @0.95",
            "elbow flick @0.5",
        ] {
            assert!(feed.push_line(line));
        }
        sleep(Duration::from_millis(1)).await;
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
    };
    tokio::join!(controller.run(cmd_rx, speech_rx), driver);

    assert_eq!(executor.actions(), vec![Action::key(Key::Left)]);

    let events: Vec<SessionEvent> = collect(&mut events)
        .into_iter()
        .filter(|e| !matches!(e, SessionEvent::StateChanged(_)))
        .collect();
    assert!(matches!(&events[0], SessionEvent::Interim(t) if t == "turn le"));
    assert!(matches!(&events[1], SessionEvent::Command(r) if r.outcome == Outcome::Execute));
    assert!(matches!(&events[2], SessionEvent::Executed(e) if e.success));
    assert!(matches!(
        &events[3],
        SessionEvent::LowConfidence(r) if r.command.as_ref().is_some_and(|c| c.phrase == "ride on")
    ));
    assert!(matches!(
        &events[4],
        SessionEvent::NoMatch(r) if r.outcome == Outcome::Reject(RejectReason::NoMatch)
    ));
    assert!(matches!(
        &events[5],
        SessionEvent::NoMatch(r) if r.outcome == Outcome::Reject(RejectReason::Unintelligible)
    ));
}

#[tokio::test(start_paused = true)]
async fn runtime_commands_change_behaviour() {
    let Rig {
        controller,
        executor,
        cmd_tx,
        cmd_rx,
        speech_tx,
        speech_rx,
        ..
    } = rig(Config::default());

    let driver = async move {
        cmd_tx.send(SessionCommand::SetTestMode(true)).unwrap();
        cmd_tx
            .send(SessionCommand::AddCommand {
                phrase: "drink".to_string(),
                action: Action::key(Key::Char('d')),
                description: Some("Take a drink".to_string()),
                priority: None,
            })
            .unwrap();
        sleep(Duration::from_millis(1)).await;
        speech_tx
            .send(SpeechEvent::final_text("drink", 0.9))
            .unwrap();
        sleep(Duration::from_millis(1)).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx.send(SessionCommand::Snapshot(reply_tx)).unwrap();
        let snapshot = reply_rx.await.unwrap();
        cmd_tx.send(SessionCommand::Shutdown).unwrap();
        snapshot
    };
    let ((), snapshot) = tokio::join!(controller.run(cmd_rx, speech_rx), driver);

    assert!(executor.actions().is_empty());
    assert_eq!(snapshot.history.len(), 1);
    let entry = &snapshot.history[0];
    assert_eq!(entry.method, DispatchMethod::TestMode);
    assert_eq!(entry.description, "Take a drink");
    assert_eq!(entry.action, Action::key(Key::Char('d')));
}
