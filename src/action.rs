//! Primitive actions: a logical key plus optional modifiers
//!
//! Actions are written as lowercase strings such as `left`, `space`, `f10`
//! or `ctrl+s`. Parsing validates the name once, so everything downstream of
//! the registry works with a closed set of keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionParseError {
    #[error("empty action")]
    Empty,
    #[error("unknown key '{0}'")]
    UnknownKey(String),
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
}

/// Logical key names understood by the action executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    Space,
    Enter,
    Escape,
    Tab,
    Backspace,
    PageUp,
    PageDown,
    Home,
    End,
    /// Function key F1-F12
    F(u8),
    /// A single printable character (letters are stored lowercase)
    Char(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Shift,
    Control,
    Alt,
    Meta,
}

impl Modifier {
    fn name(self) -> &'static str {
        match self {
            Modifier::Shift => "shift",
            Modifier::Control => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Meta => "cmd",
        }
    }
}

impl FromStr for Modifier {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shift" => Ok(Modifier::Shift),
            "ctrl" | "control" => Ok(Modifier::Control),
            "alt" | "option" => Ok(Modifier::Alt),
            "cmd" | "meta" | "super" => Ok(Modifier::Meta),
            _ => Err(ActionParseError::UnknownModifier(s.to_string())),
        }
    }
}

impl FromStr for Key {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s {
            "left" => Key::Left,
            "right" => Key::Right,
            "up" => Key::Up,
            "down" => Key::Down,
            "space" => Key::Space,
            "enter" | "return" => Key::Enter,
            "escape" | "esc" => Key::Escape,
            "tab" => Key::Tab,
            "backspace" => Key::Backspace,
            "pageup" => Key::PageUp,
            "pagedown" => Key::PageDown,
            "home" => Key::Home,
            "end" => Key::End,
            _ => {
                if let Some(n) = s.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    if (1..=12).contains(&n) {
                        return Ok(Key::F(n));
                    }
                }
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_graphic() => Key::Char(c.to_ascii_lowercase()),
                    _ => return Err(ActionParseError::UnknownKey(s.to_string())),
                }
            }
        };
        Ok(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Left => write!(f, "left"),
            Key::Right => write!(f, "right"),
            Key::Up => write!(f, "up"),
            Key::Down => write!(f, "down"),
            Key::Space => write!(f, "space"),
            Key::Enter => write!(f, "enter"),
            Key::Escape => write!(f, "escape"),
            Key::Tab => write!(f, "tab"),
            Key::Backspace => write!(f, "backspace"),
            Key::PageUp => write!(f, "pageup"),
            Key::PageDown => write!(f, "pagedown"),
            Key::Home => write!(f, "home"),
            Key::End => write!(f, "end"),
            Key::F(n) => write!(f, "f{}", n),
            Key::Char(c) => write!(f, "{}", c),
        }
    }
}

/// A primitive action handed to the executor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action {
    modifiers: Vec<Modifier>,
    key: Key,
}

impl Action {
    pub fn key(key: Key) -> Self {
        Self {
            modifiers: Vec::new(),
            key,
        }
    }

    pub fn with_modifiers(mut modifiers: Vec<Modifier>, key: Key) -> Self {
        modifiers.sort();
        modifiers.dedup();
        Self { modifiers, key }
    }

    pub fn main_key(&self) -> Key {
        self.key
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }
}

impl FromStr for Action {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s.is_empty() {
            return Err(ActionParseError::Empty);
        }
        // "ctrl++" would be ambiguous, so a lone "+" is only accepted on its own
        if s == "+" {
            return Ok(Action::key(Key::Char('+')));
        }

        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let key_part = parts.pop().unwrap_or_default();
        let key = key_part.parse::<Key>()?;
        let modifiers = parts
            .into_iter()
            .map(str::parse::<Modifier>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Action::with_modifiers(modifiers, key))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modifiers {
            write!(f, "{}+", m.name())?;
        }
        write!(f, "{}", self.key)
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
