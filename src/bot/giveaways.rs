use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::Arc;

use crate::bot::registry::ChannelRuntimeRegistry;
use crate::clock::{choose, Picker};
use crate::types::{normalize_id, ChatMessage};

#[derive(Debug, Clone, PartialEq)]
pub struct GiveawayEntry {
    pub user_id: String,
    pub username: String,
}

/// Keyword giveaway running in one channel
#[derive(Debug, Clone)]
pub struct Giveaway {
    pub keyword: String,
    pub entries: Vec<GiveawayEntry>,
    pub started_at: DateTime<Utc>,
}

pub struct GiveawaySystem {
    registry: Arc<ChannelRuntimeRegistry>,
    picker: Arc<dyn Picker>,
}

impl GiveawaySystem {
    pub fn new(registry: Arc<ChannelRuntimeRegistry>, picker: Arc<dyn Picker>) -> Self {
        Self { registry, picker }
    }

    /// Start (or restart) the channel's giveaway with an empty entry list
    pub async fn start(&self, channel: &str, keyword: &str) {
        let runtime = self.registry.get_or_create(channel).await;
        let now = self.registry.clock().now();
        runtime.lock().await.giveaway = Some(Giveaway {
            keyword: keyword.to_lowercase(),
            entries: Vec::new(),
            started_at: now,
        });
        info!("Giveaway started in #{} with keyword '{}'", runtime.channel_id(), keyword);
    }

    pub async fn end(&self, channel: &str) -> bool {
        let runtime = self.registry.get_or_create(channel).await;
        let ended = runtime.lock().await.giveaway.take().is_some();
        if ended {
            info!("Giveaway ended in #{}", runtime.channel_id());
        }
        ended
    }

    /// Enter the author when the message carries the keyword as a word; true if newly entered
    pub async fn handle_message(&self, message: &ChatMessage) -> bool {
        let runtime = self.registry.get_or_create(&message.channel).await;
        let mut state = runtime.lock().await;
        let giveaway = match state.giveaway.as_mut() {
            Some(giveaway) => giveaway,
            None => return false,
        };

        let has_keyword = message
            .content
            .split_whitespace()
            .any(|word| word.to_lowercase() == giveaway.keyword);
        if !has_keyword {
            return false;
        }

        let user_id = normalize_id(&message.user_id);
        if giveaway.entries.iter().any(|e| e.user_id == user_id) {
            return false;
        }

        giveaway.entries.push(GiveawayEntry {
            user_id,
            username: message.username.clone(),
        });
        debug!("{} entered the giveaway in #{}", message.username, runtime.channel_id());
        true
    }

    pub async fn pick_winner(&self, channel: &str) -> Option<GiveawayEntry> {
        let runtime = self.registry.get_or_create(channel).await;
        let state = runtime.lock().await;
        let giveaway = state.giveaway.as_ref()?;
        choose(self.picker.as_ref(), &giveaway.entries).cloned()
    }

    pub async fn entries(&self, channel: &str) -> Vec<GiveawayEntry> {
        let runtime = self.registry.get_or_create(channel).await;
        let state = runtime.lock().await;
        state.giveaway.as_ref().map(|g| g.entries.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SeededPicker, SystemClock};

    fn system() -> GiveawaySystem {
        let registry = Arc::new(ChannelRuntimeRegistry::new(Arc::new(SystemClock)));
        GiveawaySystem::new(registry, Arc::new(SeededPicker::new(42)))
    }

    #[tokio::test]
    async fn test_entries_need_keyword_and_are_unique() {
        let giveaways = system();
        assert!(!giveaways.handle_message(&ChatMessage::new("chan", "alice", "!join")).await);

        giveaways.start("chan", "!Join").await;
        let entry = ChatMessage::new("chan", "alice", "let me in !join");
        assert!(giveaways.handle_message(&entry).await);
        assert!(!giveaways.handle_message(&ChatMessage::new("chan", "alice", "!JOIN")).await);
        assert!(!giveaways.handle_message(&ChatMessage::new("chan", "bob", "!joined")).await);
        assert!(giveaways.handle_message(&ChatMessage::new("chan", "bob", "!join")).await);

        let names: Vec<String> =
            giveaways.entries("chan").await.into_iter().map(|e| e.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_pick_and_end() {
        let giveaways = system();
        giveaways.start("chan", "win").await;
        assert!(giveaways.pick_winner("chan").await.is_none());

        giveaways.handle_message(&ChatMessage::new("chan", "alice", "win")).await;
        giveaways.handle_message(&ChatMessage::new("chan", "bob", "win")).await;
        let winner = giveaways.pick_winner("chan").await.unwrap();
        assert!(winner.username == "alice" || winner.username == "bob");

        assert!(giveaways.end("chan").await);
        assert!(!giveaways.end("chan").await);
        assert!(giveaways.pick_winner("chan").await.is_none());
    }
}
