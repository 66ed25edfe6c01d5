// src/config/mod.rs - Runtime configuration with file + environment layering

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::types::normalize_id;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Spam heuristic thresholds; defaults are the tuned values the bot ships with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationThresholds {
    /// Trailing window kept per user
    pub window_seconds: i64,
    /// Messages inside `flood_span_seconds` that count as a flood
    pub flood_message_count: usize,
    pub flood_span_seconds: i64,
    /// Identical messages in the window that count as repetition
    pub repeat_count: usize,
    pub caps_min_length: usize,
    pub caps_ratio: f64,
    pub symbol_min_length: usize,
    pub symbol_ratio: f64,
}

impl Default for ModerationThresholds {
    fn default() -> Self {
        Self {
            window_seconds: 15,
            flood_message_count: 6,
            flood_span_seconds: 10,
            repeat_count: 3,
            caps_min_length: 15,
            caps_ratio: 0.7,
            symbol_min_length: 10,
            symbol_ratio: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub channels: Vec<String>,
    pub command_prefix: String,
    /// Minimum gap between two sends in one channel (platform limit ~20 msgs / 30s)
    pub message_delay_ms: u64,
    pub timer_poll_interval_secs: u64,
    /// Length of the timeout issued on a moderation hit
    pub timeout_seconds: u64,
    /// How long a `!permit` stays valid
    pub permit_seconds: i64,
    pub moderation: ModerationThresholds,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            command_prefix: "!".to_string(),
            message_delay_ms: 1600,
            timer_poll_interval_secs: 10,
            timeout_seconds: 15,
            permit_seconds: 60,
            moderation: ModerationThresholds::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load `.env`, then the config file if it exists, then environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            warn!("Config file not found, using defaults: {}", path.display());
            Self::default()
        };

        config.apply_env_overrides()?;
        config.normalize();
        config.validate()?;

        info!(
            "Loaded runtime config: {} channels, {}ms send delay, {}s timer poll",
            config.channels.len(),
            config.message_delay_ms,
            config.timer_poll_interval_secs
        );
        Ok(config)
    }

    /// Parse a YAML or TOML file, picked by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        debug!("Parsed config file {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = env::var("BOT_CHANNELS") {
            self.channels = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(delay) = parse_env::<u64>("BOT_MESSAGE_DELAY_MS")? {
            self.message_delay_ms = delay;
        }
        if let Some(poll) = parse_env::<u64>("BOT_TIMER_POLL_SECS")? {
            self.timer_poll_interval_secs = poll;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        let mut channels: Vec<String> = Vec::with_capacity(self.channels.len());
        for channel in self.channels.iter().map(|c| normalize_id(c)) {
            if !channel.is_empty() && !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        self.channels = channels;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_prefix.is_empty() {
            return Err(ConfigError::Invalid("command_prefix must not be empty".to_string()));
        }
        if self.timer_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("timer_poll_interval_secs must be > 0".to_string()));
        }

        let m = &self.moderation;
        for (name, seconds) in [
            ("permit_seconds", self.permit_seconds),
            ("moderation.window_seconds", m.window_seconds),
            ("moderation.flood_span_seconds", m.flood_span_seconds),
        ] {
            if seconds < 0 || chrono::Duration::try_seconds(seconds).is_none() {
                return Err(ConfigError::Invalid(format!("{} out of range: {}", name, seconds)));
            }
        }
        if m.flood_message_count == 0 || m.repeat_count == 0 {
            return Err(ConfigError::Invalid("moderation counts must be > 0".to_string()));
        }
        if m.flood_span_seconds > m.window_seconds {
            return Err(ConfigError::Invalid(format!(
                "flood span {}s exceeds window {}s",
                m.flood_span_seconds, m.window_seconds
            )));
        }
        for (name, ratio) in [("caps_ratio", m.caps_ratio), ("symbol_ratio", m.symbol_ratio)] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                let message = format!("{} must be in (0, 1], got {}", name, ratio);
                return Err(ConfigError::Invalid(message));
            }
        }
        Ok(())
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }

    pub fn timer_poll_interval(&self) -> Duration {
        Duration::from_secs(self.timer_poll_interval_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value }),
        Err(_) => Ok(None),
    }
}
