// src/types/mod.rs - Plain data flowing between the runtime and its collaborators

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowercase, trimmed identifier used for every channel/user/command map key
pub fn normalize_id(raw: &str) -> String {
    raw.trim().trim_start_matches('#').trim_start_matches('@').to_lowercase()
}

/// Inbound chat event as delivered by the platform transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel: String,
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub is_mod: bool,
    pub is_subscriber: bool,
    pub is_broadcaster: bool,
    /// Set by the transport for messages the bot itself sent
    #[serde(default)]
    pub echo: bool,
}

impl ChatMessage {
    /// Build a plain viewer message, mostly useful for tests and demos
    pub fn new(channel: &str, username: &str, content: &str) -> Self {
        Self {
            channel: normalize_id(channel),
            user_id: normalize_id(username),
            username: username.to_string(),
            display_name: None,
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
            is_mod: false,
            is_subscriber: false,
            is_broadcaster: false,
            echo: false,
        }
    }

    pub fn as_user(&self, is_regular: bool) -> ChatUser {
        ChatUser {
            is_broadcaster: self.is_broadcaster,
            is_mod: self.is_mod,
            is_subscriber: self.is_subscriber,
            is_regular,
        }
    }
}

/// Capability flags of the author of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatUser {
    pub is_broadcaster: bool,
    pub is_mod: bool,
    pub is_subscriber: bool,
    pub is_regular: bool,
}

/// Ordered permission ladder: everyone < regular < subscriber < moderator < broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    #[default]
    Everyone,
    Regular,
    Subscriber,
    Moderator,
    Broadcaster,
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "everyone" => Ok(PermissionLevel::Everyone),
            "regular" => Ok(PermissionLevel::Regular),
            "subscriber" => Ok(PermissionLevel::Subscriber),
            "moderator" => Ok(PermissionLevel::Moderator),
            "broadcaster" => Ok(PermissionLevel::Broadcaster),
            other => Err(format!("Unknown permission level: {}", other)),
        }
    }
}

/// Stored custom command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub response: String,
    #[serde(default)]
    pub permission: PermissionLevel,
    #[serde(default)]
    pub global_cooldown_seconds: u64,
    #[serde(default)]
    pub user_cooldown_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Command {
    pub fn new(name: &str, response: &str) -> Self {
        Self {
            name: normalize_id(name),
            response: response.to_string(),
            permission: PermissionLevel::Everyone,
            global_cooldown_seconds: 0,
            user_cooldown_seconds: 0,
            enabled: true,
        }
    }
}

/// Stored periodic message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub name: String,
    pub messages: Vec<String>,
    pub interval_minutes: u64,
    #[serde(default)]
    pub require_chat_activity: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Timer {
    /// `None` when `interval_minutes` does not fit a `chrono::Duration`
    pub fn interval(&self) -> Option<chrono::Duration> {
        i64::try_from(self.interval_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Regex,
    Word,
    Phrase,
}

/// Stored blacklist entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub kind: FilterKind,
    pub pattern: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Filter {
    pub fn new(kind: FilterKind, pattern: &str) -> Self {
        Self {
            kind,
            pattern: pattern.to_string(),
            enabled: true,
        }
    }
}

/// Per-channel URL rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkPolicy {
    pub enabled: bool,
    pub allow_mod: bool,
    pub allow_sub: bool,
    pub allow_regular: bool,
    pub allowed_domains: Vec<String>,
}

impl Default for LinkPolicy {
    /// Used whenever a channel has no stored policy
    fn default() -> Self {
        Self {
            enabled: true,
            allow_mod: true,
            allow_sub: true,
            allow_regular: true,
            allowed_domains: Vec::new(),
        }
    }
}

/// Outcome of a moderation evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationReason {
    MessageFlood,
    RepeatedMessage,
    CapsSpam,
    SymbolSpam,
    FilteredRegex,
    FilteredWord,
    FilteredPhrase,
    LinkProtection,
}

impl ViolationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationReason::MessageFlood => "message flood",
            ViolationReason::RepeatedMessage => "repeated message",
            ViolationReason::CapsSpam => "caps spam",
            ViolationReason::SymbolSpam => "symbol spam",
            ViolationReason::FilteredRegex => "filtered regex",
            ViolationReason::FilteredWord => "filtered word",
            ViolationReason::FilteredPhrase => "filtered phrase",
            ViolationReason::LinkProtection => "link protection",
        }
    }
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit row appended for every violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infraction {
    pub channel: String,
    pub user_id: String,
    pub username: String,
    pub kind: String,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
