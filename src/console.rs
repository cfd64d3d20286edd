//! Slash commands typed at the console while listening
//!
//! Lines starting with `/` control the session; everything else is fed to the
//! console speech engine as a transcript.

use crate::action::{Action, ActionParseError};
use crate::session::SessionCommand;
use std::time::Duration;
use thiserror::Error;

pub const HELP: &str = "\
/start                 start listening
/stop                  stop listening (queued actions still run)
/threshold <0.5-0.95>  confidence needed to execute
/trainer on|off        use the trainer-mode threshold
/rate <ms>             minimum spacing between key presses (100-2000)
/queue-size <n>        pending actions kept while rate limited (1-16)
/test on|off           record actions without pressing keys
/add <phrase> = <key>  map a phrase to a key, e.g. /add drink = d
/remove <phrase>       forget a phrase
/history               recent actions
/queue                 queue status
/help                  this list
/quit                  exit

Anything else is a transcript: `turn left`, `ride on @0.7`,
`turn lift @0.6 | turn left @0.9`, or `~turn le` for an interim result.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlashError {
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),
    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("invalid argument for /{command}: {value}")]
    InvalidArgument {
        command: &'static str,
        value: String,
    },
    #[error(transparent)]
    Action(#[from] ActionParseError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlashCommand {
    Start,
    Stop,
    Threshold(f32),
    Trainer(bool),
    Rate(u64),
    QueueSize(usize),
    Test(bool),
    Add { phrase: String, action: Action },
    Remove(String),
    History,
    Queue,
    Help,
    Quit,
}

impl SlashCommand {
    /// The session command this maps to; console-only commands return None
    pub fn into_session_command(self) -> Option<SessionCommand> {
        let command = match self {
            SlashCommand::Start => SessionCommand::Start,
            SlashCommand::Stop => SessionCommand::Stop,
            SlashCommand::Threshold(value) => SessionCommand::SetThreshold(value),
            SlashCommand::Trainer(enabled) => SessionCommand::SetTrainerMode(enabled),
            SlashCommand::Rate(ms) => SessionCommand::SetRateLimit(Duration::from_millis(ms)),
            SlashCommand::QueueSize(size) => SessionCommand::SetMaxQueueSize(size),
            SlashCommand::Test(enabled) => SessionCommand::SetTestMode(enabled),
            SlashCommand::Add { phrase, action } => SessionCommand::AddCommand {
                phrase,
                action,
                description: None,
                priority: None,
            },
            SlashCommand::Remove(phrase) => SessionCommand::RemoveCommand(phrase),
            SlashCommand::Quit => SessionCommand::Shutdown,
            SlashCommand::History | SlashCommand::Queue | SlashCommand::Help => return None,
        };
        Some(command)
    }
}

fn parse_switch(command: &'static str, arg: &str) -> Result<bool, SlashError> {
    match arg {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        "" => Err(SlashError::MissingArgument(command)),
        other => Err(SlashError::InvalidArgument {
            command,
            value: other.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(command: &'static str, arg: &str) -> Result<T, SlashError> {
    if arg.is_empty() {
        return Err(SlashError::MissingArgument(command));
    }
    arg.parse().map_err(|_| SlashError::InvalidArgument {
        command,
        value: arg.to_string(),
    })
}

/// Parse a console line. Returns None when the line is not a slash command.
pub fn parse_slash(line: &str) -> Option<Result<SlashCommand, SlashError>> {
    let rest = line.trim().strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let parsed = match name.to_lowercase().as_str() {
        "start" => Ok(SlashCommand::Start),
        "stop" => Ok(SlashCommand::Stop),
        "threshold" => parse_number("threshold", arg).map(SlashCommand::Threshold),
        "trainer" => parse_switch("trainer", arg).map(SlashCommand::Trainer),
        "rate" => parse_number("rate", arg).map(SlashCommand::Rate),
        "queue-size" => parse_number("queue-size", arg).map(SlashCommand::QueueSize),
        "test" => parse_switch("test", arg).map(SlashCommand::Test),
        "add" => parse_add(arg),
        "remove" if arg.is_empty() => Err(SlashError::MissingArgument("remove")),
        "remove" => Ok(SlashCommand::Remove(arg.to_string())),
        "history" => Ok(SlashCommand::History),
        "queue" => Ok(SlashCommand::Queue),
        "help" | "?" => Ok(SlashCommand::Help),
        "quit" | "exit" | "q" => Ok(SlashCommand::Quit),
        _ => Err(SlashError::Unknown(name.to_string())),
    };
    Some(parsed)
}

fn parse_add(arg: &str) -> Result<SlashCommand, SlashError> {
    let Some((phrase, action)) = arg.split_once('=') else {
        return Err(SlashError::MissingArgument("add"));
    };
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return Err(SlashError::MissingArgument("add"));
    }
    Ok(SlashCommand::Add {
        phrase: phrase.to_string(),
        action: action.parse()?,
    })
}
