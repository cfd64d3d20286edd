use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Config file read when no `--config` path is given
pub const DEFAULT_CONFIG_PATH: &str = "pedalvox.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

// ============================================================================
// Recognition Config
// ============================================================================

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RecognitionConfig {
    /// Confidence needed to execute a match (clamped to 0.50-0.95)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Use the stricter trainer threshold (noisy rooms: fans, trainer hum)
    #[serde(default)]
    pub trainer_mode: bool,

    /// Confidence needed to execute while trainer mode is on
    #[serde(default = "default_trainer_mode_threshold")]
    pub trainer_mode_threshold: f32,

    /// Below this, transcripts are rejected as unintelligible
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            trainer_mode: false,
            trainer_mode_threshold: default_trainer_mode_threshold(),
            low_confidence_threshold: default_low_confidence_threshold(),
        }
    }
}

fn default_confidence_threshold() -> f32 {
    0.75
}

fn default_trainer_mode_threshold() -> f32 {
    0.80
}

fn default_low_confidence_threshold() -> f32 {
    0.65
}

// ============================================================================
// Dispatch Config
// ============================================================================

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Minimum spacing between two executed actions (clamped to 100-2000ms)
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Pending actions held while the rate window is active
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Execution history entries kept
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Record actions without sending them
    #[serde(default)]
    pub test_mode: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: default_rate_limit_ms(),
            max_queue_size: default_max_queue_size(),
            history_size: default_history_size(),
            test_mode: false,
        }
    }
}

fn default_rate_limit_ms() -> u64 {
    300
}

fn default_max_queue_size() -> usize {
    3
}

fn default_history_size() -> usize {
    50
}

// ============================================================================
// Engine Config
// ============================================================================

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Automatic restarts attempted after the engine drops out
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before the first restart; doubles on each further attempt
    #[serde(default = "default_restart_base_delay_ms")]
    pub restart_base_delay_ms: u64,

    #[serde(default = "default_restart_max_delay_ms")]
    pub restart_max_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_base_delay_ms: default_restart_base_delay_ms(),
            restart_max_delay_ms: default_restart_max_delay_ms(),
        }
    }
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_base_delay_ms() -> u64 {
    500
}

fn default_restart_max_delay_ms() -> u64 {
    8000
}

// ============================================================================
// Commands Config
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    /// Register the built-in cycling commands
    #[serde(default = "default_enable_builtin")]
    pub enable_builtin: bool,

    /// Custom phrase mappings
    #[serde(default)]
    pub custom: Vec<CustomCommand>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            enable_builtin: default_enable_builtin(),
            custom: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CustomCommand {
    pub phrase: String,
    /// Key name such as "left", "space", "ctrl+s"
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
}

fn default_enable_builtin() -> bool {
    true
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load from an explicit path; read and parse errors are returned
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Load `pedalvox.toml` from the working directory, falling back to defaults
    pub fn load() -> Self {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if !path.exists() {
            debug!("no {} found, using defaults", DEFAULT_CONFIG_PATH);
            return Config::default();
        }
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; using defaults", e);
                Config::default()
            }
        }
    }
}
