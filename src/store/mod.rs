// src/store/mod.rs - Storage collaborator for channel configuration and audit rows

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{normalize_id, Command, Filter, Infraction, LinkPolicy, Timer};

/// A counter update that would leave the `i64` range; the stored value is untouched
#[derive(Debug, Error)]
#[error("counter '{key}' would overflow")]
pub struct CounterOverflow {
    pub key: String,
}

/// Everything the runtime reads from (and the built-in commands write to) persistent storage.
///
/// Channel and user identifiers are already normalised by the caller.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Enabled command by name
    async fn lookup_command(&self, channel: &str, name: &str) -> Result<Option<Command>>;
    /// Enabled commands of the channel ordered by name
    async fn list_commands(&self, channel: &str) -> Result<Vec<Command>>;
    async fn upsert_command(&self, channel: &str, command: Command) -> Result<()>;
    async fn delete_command(&self, channel: &str, name: &str) -> Result<bool>;

    /// Enabled timers in stored order
    async fn list_enabled_timers(&self, channel: &str) -> Result<Vec<Timer>>;
    async fn upsert_timer(&self, channel: &str, timer: Timer) -> Result<()>;
    async fn delete_timer(&self, channel: &str, name: &str) -> Result<bool>;

    /// Enabled filters in stored order
    async fn list_enabled_filters(&self, channel: &str) -> Result<Vec<Filter>>;
    /// `None` when nothing is stored; callers fall back to `LinkPolicy::default()`
    async fn get_link_policy(&self, channel: &str) -> Result<Option<LinkPolicy>>;

    async fn record_infraction(&self, infraction: Infraction) -> Result<()>;

    async fn is_regular(&self, channel: &str, user_id: &str) -> Result<bool>;
    async fn add_regular(&self, channel: &str, user_id: &str, username: &str) -> Result<()>;
    async fn remove_regular(&self, channel: &str, user_id: &str) -> Result<bool>;
    async fn list_regulars(&self, channel: &str) -> Result<Vec<String>>;

    async fn get_counter(&self, channel: &str, key: &str) -> Result<i64>;
    async fn set_counter(&self, channel: &str, key: &str, value: i64) -> Result<i64>;
    /// Fails with [`CounterOverflow`] when the sum leaves the `i64` range
    async fn increment_counter(&self, channel: &str, key: &str, delta: i64) -> Result<i64>;
}

#[derive(Debug, Default)]
struct ChannelRecords {
    commands: BTreeMap<String, Command>,
    timers: Vec<Timer>,
    filters: Vec<Filter>,
    link_policy: Option<LinkPolicy>,
    /// user_id -> display name
    regulars: BTreeMap<String, String>,
    counters: HashMap<String, i64>,
}

/// In-process store; backs the binary's dry-run mode and the test-suite
#[derive(Default, Clone)]
pub struct MemoryStore {
    channels: Arc<RwLock<HashMap<String, ChannelRecords>>>,
    infractions: Arc<RwLock<Vec<Infraction>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_filter(&self, channel: &str, filter: Filter) {
        let mut channels = self.channels.write().await;
        channels.entry(normalize_id(channel)).or_default().filters.push(filter);
    }

    pub async fn set_link_policy(&self, channel: &str, policy: LinkPolicy) {
        let mut channels = self.channels.write().await;
        channels.entry(normalize_id(channel)).or_default().link_policy = Some(policy);
    }

    pub async fn infractions(&self) -> Vec<Infraction> {
        self.infractions.read().await.clone()
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn lookup_command(&self, channel: &str, name: &str) -> Result<Option<Command>> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel)
            .and_then(|c| c.commands.get(name))
            .filter(|command| command.enabled)
            .cloned())
    }

    async fn list_commands(&self, channel: &str) -> Result<Vec<Command>> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel)
            .map(|c| c.commands.values().filter(|command| command.enabled).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_command(&self, channel: &str, command: Command) -> Result<()> {
        let mut channels = self.channels.write().await;
        debug!("Storing command !{} for #{}", command.name, channel);
        channels
            .entry(channel.to_string())
            .or_default()
            .commands
            .insert(command.name.clone(), command);
        Ok(())
    }

    async fn delete_command(&self, channel: &str, name: &str) -> Result<bool> {
        let mut channels = self.channels.write().await;
        Ok(channels
            .get_mut(channel)
            .map(|c| c.commands.remove(name).is_some())
            .unwrap_or(false))
    }

    async fn list_enabled_timers(&self, channel: &str) -> Result<Vec<Timer>> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel)
            .map(|c| c.timers.iter().filter(|t| t.enabled).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_timer(&self, channel: &str, timer: Timer) -> Result<()> {
        let mut channels = self.channels.write().await;
        let records = channels.entry(channel.to_string()).or_default();
        match records.timers.iter_mut().find(|t| t.name == timer.name) {
            Some(existing) => {
                existing.messages = timer.messages;
                existing.interval_minutes = timer.interval_minutes;
            }
            None => records.timers.push(timer),
        }
        Ok(())
    }

    async fn delete_timer(&self, channel: &str, name: &str) -> Result<bool> {
        let mut channels = self.channels.write().await;
        Ok(channels
            .get_mut(channel)
            .map(|c| {
                let before = c.timers.len();
                c.timers.retain(|t| t.name != name);
                c.timers.len() != before
            })
            .unwrap_or(false))
    }

    async fn list_enabled_filters(&self, channel: &str) -> Result<Vec<Filter>> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel)
            .map(|c| c.filters.iter().filter(|f| f.enabled).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_link_policy(&self, channel: &str) -> Result<Option<LinkPolicy>> {
        let channels = self.channels.read().await;
        Ok(channels.get(channel).and_then(|c| c.link_policy.clone()))
    }

    async fn record_infraction(&self, infraction: Infraction) -> Result<()> {
        self.infractions.write().await.push(infraction);
        Ok(())
    }

    async fn is_regular(&self, channel: &str, user_id: &str) -> Result<bool> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel)
            .map(|c| c.regulars.contains_key(user_id))
            .unwrap_or(false))
    }

    async fn add_regular(&self, channel: &str, user_id: &str, username: &str) -> Result<()> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_default()
            .regulars
            .insert(user_id.to_string(), username.to_string());
        Ok(())
    }

    async fn remove_regular(&self, channel: &str, user_id: &str) -> Result<bool> {
        let mut channels = self.channels.write().await;
        Ok(channels
            .get_mut(channel)
            .map(|c| c.regulars.remove(user_id).is_some())
            .unwrap_or(false))
    }

    async fn list_regulars(&self, channel: &str) -> Result<Vec<String>> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel)
            .map(|c| c.regulars.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_counter(&self, channel: &str, key: &str) -> Result<i64> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel)
            .and_then(|c| c.counters.get(key).copied())
            .unwrap_or(0))
    }

    async fn set_counter(&self, channel: &str, key: &str, value: i64) -> Result<i64> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_default()
            .counters
            .insert(key.to_string(), value);
        Ok(value)
    }

    async fn increment_counter(&self, channel: &str, key: &str, delta: i64) -> Result<i64> {
        let mut channels = self.channels.write().await;
        let counter = channels
            .entry(channel.to_string())
            .or_default()
            .counters
            .entry(key.to_string())
            .or_insert(0);
        *counter = counter
            .checked_add(delta)
            .ok_or_else(|| CounterOverflow { key: key.to_string() })?;
        Ok(*counter)
    }
}
