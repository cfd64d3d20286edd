//! Action executors
//!
//! The dispatcher hands each primitive action to an [`ActionExecutor`]:
//! - **KeyboardExecutor** (feature `keys`): sends the key press with enigo
//! - **LogExecutor**: logs the action and reports success; used when no
//!   keyboard backend is compiled in

use crate::action::Action;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The OS refused synthetic input (e.g. accessibility permission missing)
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("keyboard error: {0}")]
    Keyboard(String),
}

/// Performs the platform effect of an action
pub trait ActionExecutor {
    fn execute(&mut self, action: &Action) -> Result<(), ExecutorError>;
}

/// Logs actions instead of sending them
#[derive(Debug, Default)]
pub struct LogExecutor {
    sent: usize,
}

impl LogExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl ActionExecutor for LogExecutor {
    fn execute(&mut self, action: &Action) -> Result<(), ExecutorError> {
        self.sent += 1;
        info!(action = %action, "key press (no keyboard backend)");
        Ok(())
    }
}

#[cfg(feature = "keys")]
pub use keyboard::KeyboardExecutor;

#[cfg(feature = "keys")]
mod keyboard {
    use super::{ActionExecutor, ExecutorError};
    use crate::action::{Action, Key, Modifier};
    use enigo::{Direction, Enigo, Keyboard, Settings};
    use std::thread;
    use std::time::Duration;

    /// Sends actions as real key presses using enigo
    pub struct KeyboardExecutor {
        enigo: Enigo,
    }

    impl KeyboardExecutor {
        pub fn new() -> Result<Self, ExecutorError> {
            let enigo = Enigo::new(&Settings::default()).map_err(|e| {
                ExecutorError::PermissionDenied(format!("failed to initialize enigo: {}", e))
            })?;
            Ok(Self { enigo })
        }

        fn key_for(key: Key) -> enigo::Key {
            match key {
                Key::Left => enigo::Key::LeftArrow,
                Key::Right => enigo::Key::RightArrow,
                Key::Up => enigo::Key::UpArrow,
                Key::Down => enigo::Key::DownArrow,
                Key::Space => enigo::Key::Space,
                Key::Enter => enigo::Key::Return,
                Key::Escape => enigo::Key::Escape,
                Key::Tab => enigo::Key::Tab,
                Key::Backspace => enigo::Key::Backspace,
                Key::PageUp => enigo::Key::PageUp,
                Key::PageDown => enigo::Key::PageDown,
                Key::Home => enigo::Key::Home,
                Key::End => enigo::Key::End,
                Key::F(n) => match n {
                    1 => enigo::Key::F1,
                    2 => enigo::Key::F2,
                    3 => enigo::Key::F3,
                    4 => enigo::Key::F4,
                    5 => enigo::Key::F5,
                    6 => enigo::Key::F6,
                    7 => enigo::Key::F7,
                    8 => enigo::Key::F8,
                    9 => enigo::Key::F9,
                    10 => enigo::Key::F10,
                    11 => enigo::Key::F11,
                    _ => enigo::Key::F12,
                },
                Key::Char(c) => enigo::Key::Unicode(c),
            }
        }

        fn modifier_for(modifier: Modifier) -> enigo::Key {
            match modifier {
                Modifier::Shift => enigo::Key::Shift,
                Modifier::Control => enigo::Key::Control,
                Modifier::Alt => enigo::Key::Alt,
                Modifier::Meta => enigo::Key::Meta,
            }
        }

        fn press(&mut self, key: enigo::Key, direction: Direction) -> Result<(), ExecutorError> {
            self.enigo
                .key(key, direction)
                .map_err(|e| ExecutorError::Keyboard(format!("failed to send key: {}", e)))
        }
    }

    impl ActionExecutor for KeyboardExecutor {
        fn execute(&mut self, action: &Action) -> Result<(), ExecutorError> {
            let main = Self::key_for(action.main_key());
            if action.modifiers().is_empty() {
                return self.press(main, Direction::Click);
            }

            for m in action.modifiers() {
                self.press(Self::modifier_for(*m), Direction::Press)?;
            }
            // Small delay for modifiers to register
            thread::sleep(Duration::from_millis(10));
            let result = self.press(main, Direction::Click);
            thread::sleep(Duration::from_millis(30));

            // Release in reverse order even if the click failed
            for m in action.modifiers().iter().rev() {
                self.press(Self::modifier_for(*m), Direction::Release)?;
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Key;

    #[test]
    fn test_log_executor_counts() {
        let mut executor = LogExecutor::new();
        executor.execute(&Action::key(Key::Left)).unwrap();
        executor.execute(&Action::key(Key::Space)).unwrap();
        assert_eq!(executor.sent(), 2);
    }
}
