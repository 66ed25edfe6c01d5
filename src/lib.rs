//! # chanbot
//!
//! Multi-channel chat bot runtime: per-channel moderation, cooldown-gated
//! commands, periodic timers and a rate-limited outbound queue per channel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chanbot::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RuntimeConfig::load("config/bot.yaml")?;
//!     let store = MemoryStore::new();
//!     store.upsert_command("mychannel", Command::new("hello", "Hello ${user}!")).await?;
//!
//!     let bot = ChatBot::new(
//!         config,
//!         Arc::new(LoggingPlatform),
//!         Arc::new(store),
//!         Arc::new(SystemClock),
//!         Arc::new(ThreadRngPicker),
//!     );
//!     bot.join_channel("mychannel").await;
//!     bot.handle_message(&ChatMessage::new("mychannel", "viewer", "!hello")).await;
//!
//!     bot.stop_all().await;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod clock;
pub mod config;
pub mod platforms;
pub mod store;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::ChatBot;
    pub use crate::clock::{Clock, ManualClock, Picker, SeededPicker, SystemClock, ThreadRngPicker};
    pub use crate::config::{ConfigError, ModerationThresholds, RuntimeConfig};
    pub use crate::platforms::{ChatPlatform, LoggingPlatform};
    pub use crate::store::{ChannelStore, MemoryStore};
    pub use crate::types::{
        ChatMessage, ChatUser, Command, Filter, FilterKind, LinkPolicy, PermissionLevel, Timer,
        ViolationReason,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
