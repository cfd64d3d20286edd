//! Command registry - the catalog of spoken phrases and the actions they trigger
//!
//! Commands carry a priority tier (1 = most important). The same phrase may
//! appear in several commands; the matcher settles ambiguity by priority and
//! score, so registration does not reject duplicates. `add` logs a warning
//! when an earlier tier already claims the phrase.

use crate::action::{Action, Key};
use crate::normalize::normalize;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command phrase is empty")]
    EmptyPhrase,
}

/// Default tier for commands added at runtime or from config
pub const DEFAULT_CUSTOM_PRIORITY: u8 = 2;

/// A registered voice command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// Trigger phrases in normalized form; the first is the display phrase
    phrases: Vec<String>,
    action: Action,
    description: String,
    priority: u8,
}

impl Command {
    /// Build a command, normalizing its phrases. Empty and repeated phrases are dropped.
    pub fn new<I, S>(
        phrases: I,
        action: Action,
        description: impl Into<String>,
        priority: u8,
    ) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for phrase in phrases {
            let phrase = normalize(phrase.as_ref());
            if !phrase.is_empty() && !normalized.contains(&phrase) {
                normalized.push(phrase);
            }
        }
        if normalized.is_empty() {
            return Err(RegistryError::EmptyPhrase);
        }

        Ok(Self {
            phrases: normalized,
            action,
            description: description.into(),
            priority,
        })
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Primary display phrase
    pub fn phrase(&self) -> &str {
        &self.phrases[0]
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }
}

/// Catalog of commands, in registration order
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: Vec<Command>,
}

impl CommandRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with the built-in cycling commands
    pub fn with_builtins() -> Self {
        Self {
            commands: builtin_commands(),
        }
    }

    /// All commands, in registration order
    pub fn lookup(&self) -> &[Command] {
        &self.commands
    }

    /// Commands ordered by ascending priority number; ties keep registration order
    pub fn by_priority(&self) -> Vec<&Command> {
        let mut sorted: Vec<&Command> = self.commands.iter().collect();
        sorted.sort_by_key(|c| c.priority);
        sorted
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Insert a single-phrase command, replacing any command whose primary phrase is `phrase`
    pub fn add(
        &mut self,
        phrase: &str,
        action: Action,
        description: impl Into<String>,
        priority: u8,
    ) -> Result<(), RegistryError> {
        let command = Command::new([phrase], action, description, priority)?;
        if let Some(other) = self.shadowing(command.phrase(), priority) {
            warn!(
                phrase = command.phrase(),
                shadowed_by = other.phrase(),
                priority = other.priority(),
                "phrase already belongs to a command that is matched first"
            );
        }
        match self
            .commands
            .iter_mut()
            .find(|c| c.phrase() == command.phrase())
        {
            Some(existing) => *existing = command,
            None => self.commands.push(command),
        }
        Ok(())
    }

    /// A command matched before one registered at `priority` that already lists `phrase`.
    /// Commands whose primary phrase is `phrase` are skipped, `add` replaces those.
    pub fn shadowing(&self, phrase: &str, priority: u8) -> Option<&Command> {
        let phrase = normalize(phrase);
        self.by_priority().into_iter().find(|c| {
            c.priority <= priority && c.phrase() != phrase && c.phrases.iter().any(|p| *p == phrase)
        })
    }

    /// Remove `phrase` from every command that lists it; commands left without phrases go away.
    /// Returns true if anything was removed.
    pub fn remove(&mut self, phrase: &str) -> bool {
        let phrase = normalize(phrase);
        let mut removed = false;
        for command in &mut self.commands {
            let before = command.phrases.len();
            command.phrases.retain(|p| *p != phrase);
            removed |= command.phrases.len() != before;
        }
        self.commands.retain(|c| !c.phrases.is_empty());
        removed
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn cmd(phrases: &[&str], key: Key, description: &str, priority: u8) -> Command {
    Command {
        phrases: phrases.iter().map(|p| normalize(p)).collect(),
        action: Action::key(key),
        description: description.to_string(),
        priority,
    }
}

fn builtin_commands() -> Vec<Command> {
    let mut commands = vec![
        // Steering and power-ups
        cmd(&["turn left", "go left", "left"], Key::Left, "Take the left turn", 1),
        cmd(&["turn right", "go right", "right"], Key::Right, "Take the right turn", 1),
        cmd(&["go straight", "straight on", "straight"], Key::Up, "Go straight through", 1),
        cmd(&["u turn", "turn around", "flip"], Key::Down, "U-turn", 1),
        cmd(&["power up", "use power up", "activate power up"], Key::Space, "Use power-up", 1),
        // Social
        cmd(&["elbow flick", "flick"], Key::Char('1'), "Elbow flick", 2),
        cmd(&["wave", "say hi"], Key::Char('2'), "Wave", 2),
        cmd(&["ride on", "give ride on"], Key::Char('3'), "Give a Ride On", 2),
        cmd(&["hammer time"], Key::Char('4'), "Hammer time", 2),
        cmd(&["nice"], Key::Char('5'), "Nice!", 2),
        cmd(&["bring it", "bring it on"], Key::Char('6'), "Bring it!", 2),
        cmd(&["i'm toast", "toast"], Key::Char('7'), "I'm toast", 2),
        cmd(&["ring bell", "bell"], Key::Char('8'), "Ring the bell", 2),
    ];

    // Camera views: "camera three" / "view 3" both normalize to digit form
    for n in 1..=9u8 {
        commands.push(Command {
            phrases: vec![format!("camera {}", n), format!("view {}", n)],
            action: Action::key(Key::F(n)),
            description: format!("Camera view {}", n),
            priority: 3,
        });
    }

    commands.extend([
        cmd(&["take photo", "take a picture", "screenshot"], Key::F(10), "Take a photo", 3),
        cmd(&["skip block", "skip interval"], Key::Tab, "Skip workout block", 3),
        cmd(&["toggle hud", "hide hud", "show hud"], Key::Char('h'), "Toggle the HUD", 3),
        cmd(&["pause ride", "open menu", "menu"], Key::Escape, "Open the menu", 3),
    ]);

    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left() -> Action {
        Action::key(Key::Left)
    }

    #[test]
    fn test_command_normalizes_phrases() {
        let command = Command::new(["  Camera Two ", "camera 2", ""], left(), "x", 1).unwrap();
        assert_eq!(command.phrases(), &["camera 2".to_string()]);
        assert_eq!(command.phrase(), "camera 2");
    }

    #[test]
    fn test_command_requires_a_phrase() {
        assert_eq!(
            Command::new(["   "], left(), "x", 1),
            Err(RegistryError::EmptyPhrase)
        );
        assert_eq!(
            Command::new(Vec::<&str>::new(), left(), "x", 1),
            Err(RegistryError::EmptyPhrase)
        );
    }

    #[test]
    fn test_builtin_phrases_are_normalized() {
        let registry = CommandRegistry::with_builtins();
        assert!(!registry.is_empty());
        for command in registry.lookup() {
            for phrase in command.phrases() {
                assert_eq!(&normalize(phrase), phrase);
            }
        }
    }

    #[test]
    fn test_by_priority_is_stable() {
        let mut registry = CommandRegistry::new();
        registry.add("gamma", left(), "", 3).unwrap();
        registry.add("alpha", left(), "", 1).unwrap();
        registry.add("delta", left(), "", 3).unwrap();
        registry.add("beta", left(), "", 1).unwrap();
        let order: Vec<&str> = registry.by_priority().iter().map(|c| c.phrase()).collect();
        assert_eq!(order, vec!["alpha", "beta", "gamma", "delta"]);
    }

    #[test]
    fn test_add_overwrites_same_phrase() {
        let mut registry = CommandRegistry::new();
        registry.add("sprint", left(), "old", 2).unwrap();
        registry
            .add("Sprint", Action::key(Key::Space), "new", 1)
            .unwrap();
        assert_eq!(registry.len(), 1);
        let command = &registry.lookup()[0];
        assert_eq!(command.description(), "new");
        assert_eq!(command.action(), &Action::key(Key::Space));
        assert_eq!(command.priority(), 1);
    }

    #[test]
    fn test_add_allows_duplicate_phrase_in_other_commands() {
        let mut registry = CommandRegistry::with_builtins();
        let before = registry.len();
        // "left" is a secondary phrase of the built-in turn command
        registry.add("left", Action::key(Key::Char('a')), "", 3).unwrap();
        assert_eq!(registry.len(), before + 1);
    }

    #[test]
    fn test_shadowing_finds_earlier_command() {
        let registry = CommandRegistry::with_builtins();
        let turn = registry.shadowing("Left", DEFAULT_CUSTOM_PRIORITY).unwrap();
        assert_eq!(turn.phrase(), "turn left");
        assert_eq!(turn.priority(), 1);

        // Not listed anywhere
        assert!(registry.shadowing("sprint", DEFAULT_CUSTOM_PRIORITY).is_none());

        let mut registry = CommandRegistry::new();
        registry.add("go", left(), "", 1).unwrap();
        // Same primary phrase is replaced rather than shadowed
        assert!(registry.shadowing("go", 1).is_none());
        registry.push(Command::new(["dash", "sprint"], left(), "", 3).unwrap());
        // A lower-priority command does not shadow
        assert!(registry.shadowing("sprint", 2).is_none());
        assert!(registry.shadowing("sprint", 3).is_some());
    }

    #[test]
    fn test_remove_phrase() {
        let mut registry = CommandRegistry::with_builtins();
        assert!(registry.remove("Go Left"));
        let turn = &registry.lookup()[0];
        assert_eq!(turn.phrases(), &["turn left".to_string(), "left".to_string()]);
        assert!(!registry.remove("go left"));
    }

    #[test]
    fn test_remove_last_phrase_drops_command() {
        let mut registry = CommandRegistry::new();
        registry.add("sprint", left(), "", 2).unwrap();
        assert!(registry.remove("sprint"));
        assert!(registry.is_empty());
    }
}
