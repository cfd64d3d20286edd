//! Voice commands for indoor cycling
//!
//! Spoken transcripts are normalized, matched against a phrase registry, gated
//! on recognizer confidence and dispatched as rate-limited key presses.

pub mod action;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod engine;
pub mod fuzzy;
pub mod gate;
pub mod matcher;
pub mod normalize;
pub mod registry;
pub mod session;

pub use action::{Action, Key, Modifier};
pub use config::Config;
pub use dispatch::{ActionExecutor, Dispatcher, LogExecutor};
pub use engine::{ConsoleEngine, SpeechEngine, SpeechEvent};
pub use gate::{Outcome, Thresholds};
pub use registry::{Command, CommandRegistry};
pub use session::{SessionCommand, SessionController, SessionEvent, resolve};

use config::CommandsConfig;
use registry::DEFAULT_CUSTOM_PRIORITY;
use tracing::{info, warn};

/// Build the registry from config: built-ins (unless disabled) plus custom commands.
/// Custom entries with an invalid action or empty phrase are skipped with a warning.
pub fn build_registry(config: &CommandsConfig) -> CommandRegistry {
    let mut registry = if config.enable_builtin {
        CommandRegistry::with_builtins()
    } else {
        CommandRegistry::new()
    };

    for custom in &config.custom {
        let action = match custom.action.parse::<Action>() {
            Ok(action) => action,
            Err(e) => {
                warn!(phrase = %custom.phrase, "skipping custom command: {}", e);
                continue;
            }
        };
        let description = custom
            .description
            .clone()
            .unwrap_or_else(|| custom.phrase.clone());
        let priority = custom.priority.unwrap_or(DEFAULT_CUSTOM_PRIORITY);
        if let Err(e) = registry.add(&custom.phrase, action, description, priority) {
            warn!(phrase = %custom.phrase, "skipping custom command: {}", e);
        }
    }

    info!(commands = registry.len(), "command registry ready");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::CustomCommand;

    fn custom(phrase: &str, action: &str) -> CustomCommand {
        CustomCommand {
            phrase: phrase.to_string(),
            action: action.to_string(),
            description: None,
            priority: None,
        }
    }

    #[test]
    fn test_build_registry_with_custom() {
        let config = CommandsConfig {
            enable_builtin: true,
            custom: vec![
                custom("drink", "d"),
                custom("sprint", "shift+up"),
                custom("broken", "hyper+q"),
                custom("   ", "left"),
            ],
        };
        let registry = build_registry(&config);
        let builtins = CommandRegistry::with_builtins().len();
        assert_eq!(registry.len(), builtins + 2);

        let sprint = registry
            .lookup()
            .iter()
            .find(|c| c.phrase() == "sprint")
            .unwrap();
        assert_eq!(sprint.action().to_string(), "shift+up");
        assert_eq!(sprint.priority(), DEFAULT_CUSTOM_PRIORITY);
        assert_eq!(sprint.description(), "sprint");
    }

    #[test]
    fn test_build_registry_without_builtins() {
        let config = CommandsConfig {
            enable_builtin: false,
            custom: vec![custom("drink", "d")],
        };
        let registry = build_registry(&config);
        assert_eq!(registry.len(), 1);
    }
}
