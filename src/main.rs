use anyhow::Context;
use clap::{Parser, Subcommand};
use pedalvox::config::Config;
use pedalvox::console::{self, SlashCommand};
use pedalvox::dispatch::{ActionExecutor, LogExecutor};
use pedalvox::engine::{ConsoleEngine, ConsoleFeed};
use pedalvox::gate::Thresholds;
use pedalvox::session::{
    Resolution, SessionCommand, SessionController, SessionEvent, Snapshot,
};
use pedalvox::{build_registry, resolve};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pedalvox", about = "Voice commands for indoor cycling")]
struct Cli {
    /// Config file (default: ./pedalvox.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Read transcripts from stdin and press keys (default)
    Listen {
        /// Record actions without pressing keys
        #[arg(long)]
        test_mode: bool,
        /// Use the stricter trainer-mode threshold
        #[arg(long)]
        trainer: bool,
    },
    /// Resolve one transcript and print the decision as JSON
    Resolve {
        text: String,
        #[arg(long, default_value_t = 1.0)]
        confidence: f32,
        #[arg(long)]
        trainer: bool,
    },
    /// List registered commands
    Commands,
}

#[hotpath::main]
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Listen {
        test_mode: false,
        trainer: false,
    }) {
        Command::Resolve {
            text,
            confidence,
            trainer,
        } => {
            config.recognition.trainer_mode |= trainer;
            run_resolve(&config, &text, confidence)
        }
        Command::Commands => {
            print_commands(&config);
            Ok(())
        }
        Command::Listen { test_mode, trainer } => {
            config.dispatch.test_mode |= test_mode;
            config.recognition.trainer_mode |= trainer;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(run_listen(config))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "pedalvox=debug"
    } else {
        "pedalvox=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path).context("loading config"),
        None => Ok(Config::load()),
    }
}

fn run_resolve(config: &Config, text: &str, confidence: f32) -> anyhow::Result<()> {
    let registry = build_registry(&config.commands);
    let thresholds = Thresholds::from_config(&config.recognition);
    let resolution = resolve(&registry, &thresholds, text, confidence);
    println!("{}", serde_json::to_string_pretty(&resolution)?);
    Ok(())
}

fn print_commands(config: &Config) {
    let registry = build_registry(&config.commands);
    println!("{:<4} {:<14} {:<28} PHRASES", "PRI", "KEY", "DESCRIPTION");
    for command in registry.by_priority() {
        println!(
            "{:<4} {:<14} {:<28} {}",
            command.priority(),
            command.action().to_string(),
            command.description(),
            command.phrases().join(", ")
        );
    }
}

fn make_executor() -> Box<dyn ActionExecutor> {
    #[cfg(feature = "keys")]
    {
        match pedalvox::dispatch::KeyboardExecutor::new() {
            Ok(keyboard) => return Box::new(keyboard),
            Err(e) => tracing::warn!("keyboard unavailable ({}), logging actions instead", e),
        }
    }
    Box::new(LogExecutor::new())
}

async fn run_listen(config: Config) -> anyhow::Result<()> {
    let registry = build_registry(&config.commands);

    // Channel: console engine -> session
    let (speech_tx, speech_rx) = flume::unbounded();
    let engine = ConsoleEngine::new(speech_tx);
    let feed = engine.feed();

    // Channel: session -> printer
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();

    // Channel: console -> session control
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();

    let mut controller = SessionController::new(
        registry,
        &config,
        make_executor(),
        Box::new(engine),
        event_tx,
    );
    controller.start().context("starting speech engine")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    // Input thread: blocking stdin reads
    thread::spawn(move || read_input(feed, cmd_tx));

    info!("listening; type /help for commands");
    controller.run(cmd_rx, speech_rx).await;
    let _ = printer.await;
    Ok(())
}

fn read_input(feed: ConsoleFeed, cmd_tx: mpsc::UnboundedSender<SessionCommand>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };

        match console::parse_slash(&line) {
            Some(Ok(command)) => {
                if !handle_slash(command, &cmd_tx) {
                    return;
                }
            }
            Some(Err(e)) => eprintln!("{}", e),
            None => {
                if !line.trim().is_empty() && !feed.push_line(&line) && !feed.is_running() {
                    eprintln!("not listening (use /start)");
                }
            }
        }
    }
    // EOF
    let _ = cmd_tx.send(SessionCommand::Shutdown);
}

/// Returns false once the session has been asked to quit
fn handle_slash(command: SlashCommand, cmd_tx: &mpsc::UnboundedSender<SessionCommand>) -> bool {
    match command {
        SlashCommand::Help => {
            println!("{}", console::HELP);
            true
        }
        SlashCommand::History => {
            if let Some(snapshot) = request_snapshot(cmd_tx) {
                if snapshot.history.is_empty() {
                    println!("(no actions yet)");
                }
                for entry in &snapshot.history {
                    println!("{}", entry);
                }
            }
            true
        }
        SlashCommand::Queue => {
            if let Some(snapshot) = request_snapshot(cmd_tx) {
                print_status(&snapshot);
            }
            true
        }
        other => {
            let quit = other == SlashCommand::Quit;
            if let Some(command) = other.into_session_command() {
                if cmd_tx.send(command).is_err() {
                    return false;
                }
            }
            !quit
        }
    }
}

fn request_snapshot(cmd_tx: &mpsc::UnboundedSender<SessionCommand>) -> Option<Snapshot> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx.send(SessionCommand::Snapshot(reply_tx)).ok()?;
    reply_rx.blocking_recv().ok()
}

fn print_status(snapshot: &Snapshot) {
    let queue = &snapshot.queue;
    println!(
        "state: {}  threshold: {:.2}{}  rate: {}ms  queue: {}/{}{}",
        snapshot.state,
        snapshot.effective_threshold,
        if snapshot.trainer_mode {
            format!(" (trainer, base {:.2})", snapshot.confidence_threshold)
        } else {
            String::new()
        },
        queue.rate_limit_ms,
        queue.pending,
        queue.capacity,
        if queue.test_mode { "  [test mode]" } else { "" },
    );
    if let Some(ms) = queue.next_due_in_ms {
        println!("next action in {}ms", ms);
    }
}

fn describe(resolution: &Resolution) -> String {
    match &resolution.command {
        Some(command) => format!(
            "\"{}\" -> {} ({}, {:.2})",
            command.phrase, command.action, command.method, resolution.confidence
        ),
        None => format!("\"{}\" ({:.2})", resolution.transcript, resolution.confidence),
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => println!("[{}]", state),
        SessionEvent::Interim(text) => println!("  ~ {}", text),
        SessionEvent::Command(resolution) => println!("> {}", describe(resolution)),
        SessionEvent::LowConfidence(resolution) => {
            println!("? did you mean {}", describe(resolution))
        }
        SessionEvent::NoMatch(resolution) => {
            println!("x {}: {}", resolution.outcome, describe(resolution))
        }
        SessionEvent::Executed(entry) => println!("  {}", entry),
        SessionEvent::Error(e) => eprintln!("error: {}", e),
    }
    let _ = io::stdout().flush();
}
