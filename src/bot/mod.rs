use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{Clock, Picker};
use crate::config::RuntimeConfig;
use crate::platforms::ChatPlatform;
use crate::store::ChannelStore;
use crate::types::{normalize_id, ChatMessage, ViolationReason};

pub mod activity;
pub mod commands;
pub mod cooldowns;
pub mod dispatcher;
pub mod giveaways;
pub mod moderation;
pub mod permissions;
pub mod registry;
pub mod timers;

use activity::ActivityTracker;
use commands::CommandSystem;
use cooldowns::CooldownTracker;
use dispatcher::OutboundDispatcher;
use giveaways::GiveawaySystem;
use moderation::ModerationEngine;
use registry::ChannelRuntimeRegistry;
use timers::TimerScheduler;

/// Multi-channel bot runtime: inbound pipeline, moderation, commands, timers and the outbound lanes
pub struct ChatBot {
    config: RuntimeConfig,
    platform: Arc<dyn ChatPlatform>,
    store: Arc<dyn ChannelStore>,
    registry: Arc<ChannelRuntimeRegistry>,
    dispatcher: Arc<OutboundDispatcher>,
    activity: ActivityTracker,
    cooldowns: Arc<CooldownTracker>,
    moderation: Arc<ModerationEngine>,
    giveaways: Arc<GiveawaySystem>,
    timers: Arc<TimerScheduler>,
    commands: CommandSystem,
}

impl ChatBot {
    pub fn new(
        config: RuntimeConfig,
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn ChannelStore>,
        clock: Arc<dyn Clock>,
        picker: Arc<dyn Picker>,
    ) -> Self {
        let registry = Arc::new(ChannelRuntimeRegistry::new(clock));
        let dispatcher = Arc::new(OutboundDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&platform),
            config.message_delay(),
        ));
        let cooldowns = Arc::new(CooldownTracker::new(Arc::clone(&registry)));
        let moderation = Arc::new(ModerationEngine::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.moderation.clone(),
            config.permit_seconds,
        ));
        let giveaways = Arc::new(GiveawaySystem::new(Arc::clone(&registry), Arc::clone(&picker)));
        let timers = Arc::new(TimerScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&picker),
            config.timer_poll_interval(),
        ));
        let commands = CommandSystem::new(
            Arc::clone(&store),
            Arc::clone(&cooldowns),
            Arc::clone(&moderation),
            Arc::clone(&giveaways),
            picker,
            config.command_prefix.clone(),
        );

        Self {
            activity: ActivityTracker::new(Arc::clone(&registry)),
            config,
            platform,
            store,
            registry,
            dispatcher,
            cooldowns,
            moderation,
            giveaways,
            timers,
            commands,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChannelRuntimeRegistry> {
        &self.registry
    }

    /// Create the channel's runtime and start its timers
    pub async fn join_channel(&self, channel: &str) -> bool {
        self.registry.get_or_create(channel).await;
        let started = self.start_timers(channel).await;
        info!("Joined #{} on {}", normalize_id(channel), self.platform.platform_name());
        started
    }

    /// Stop the channel's loops and forget its runtime state
    pub async fn part_channel(&self, channel: &str) -> bool {
        let removed = self.registry.remove(channel).await;
        if removed {
            info!("Parted #{}", normalize_id(channel));
        }
        removed
    }

    /// Run one inbound chat message through the pipeline.
    ///
    /// Returns the violation when the message was moderated; commands are skipped in that case.
    pub async fn handle_message(&self, message: &ChatMessage) -> Option<ViolationReason> {
        if message.echo {
            debug!("Ignoring echo in #{}", message.channel);
            return None;
        }
        if self.registry.is_stopped() {
            return None;
        }

        let channel = normalize_id(&message.channel);
        self.note_activity(&channel).await;
        self.giveaways.handle_message(message).await;

        let user_id = normalize_id(&message.user_id);
        let is_regular = match self.store.is_regular(&channel, &user_id).await {
            Ok(is_regular) => is_regular,
            Err(e) => {
                warn!("Regular lookup failed in #{}: {}", channel, e);
                false
            }
        };

        if let Some(reason) = self.evaluate_message(message, is_regular).await {
            info!("Moderating {} in #{}: {}", message.username, channel, reason);
            let seconds = self.config.timeout_seconds;
            if let Err(e) = self
                .platform
                .timeout_user(&channel, &message.username, seconds, reason.as_str())
                .await
            {
                error!("Failed to time out {} in #{}: {}", message.username, channel, e);
            }
            return Some(reason);
        }

        let user = message.as_user(is_regular);
        if let Some(reply) = self.commands.process_message(message, &user).await {
            self.enqueue_outbound(&channel, reply).await;
        }
        None
    }

    pub async fn enqueue_outbound(&self, channel: &str, text: impl Into<String>) -> bool {
        self.dispatcher.enqueue(channel, text).await
    }

    pub async fn evaluate_message(
        &self,
        message: &ChatMessage,
        is_regular: bool,
    ) -> Option<ViolationReason> {
        self.moderation.evaluate(message, is_regular).await
    }

    pub async fn check_and_consume_cooldown(
        &self,
        channel: &str,
        command: &str,
        user_id: &str,
        global_cooldown_seconds: u64,
        user_cooldown_seconds: u64,
    ) -> bool {
        self.cooldowns
            .check_and_consume(
                channel,
                command,
                user_id,
                global_cooldown_seconds,
                user_cooldown_seconds,
            )
            .await
    }

    pub async fn note_activity(&self, channel: &str) {
        self.activity.note_activity(channel).await;
    }

    pub async fn start_timers(&self, channel: &str) -> bool {
        self.timers.start(channel).await
    }

    pub async fn stop_all(&self) {
        info!("Stopping chat bot...");
        self.registry.stop_all().await;
    }

    /// Per-channel loop and state counts for dashboards
    pub async fn runtime_stats(&self) -> HashMap<String, serde_json::Value> {
        let mut stats = HashMap::new();
        let mut channels = serde_json::Map::new();

        for runtime in self.registry.runtimes().await {
            let sender_active = runtime.is_sender_active().await;
            let timers_scheduled = runtime.is_timer_scheduled().await;
            let state = runtime.lock().await;
            channels.insert(
                runtime.channel_id().to_string(),
                serde_json::json!({
                    "sender_active": sender_active,
                    "timers_scheduled": timers_scheduled,
                    "last_activity_at": state.last_activity_at.to_rfc3339(),
                    "tracked_users": state.recent_messages.len(),
                    "timers_fired": state.timer_last_fire.len(),
                    "giveaway_entries": state.giveaway.as_ref().map(|g| g.entries.len()),
                }),
            );
        }

        stats.insert("platform".to_string(), serde_json::json!(self.platform.platform_name()));
        stats.insert("stopped".to_string(), serde_json::json!(self.registry.is_stopped()));
        stats.insert("channel_count".to_string(), serde_json::json!(channels.len()));
        stats.insert("channels".to_string(), serde_json::Value::Object(channels));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SeededPicker};
    use crate::platforms::testing::RecordingPlatform;
    use crate::store::MemoryStore;
    use crate::types::{Command, LinkPolicy};
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: MemoryStore,
        platform: Arc<RecordingPlatform>,
        bot: ChatBot,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryStore::new();
        let platform = Arc::new(RecordingPlatform::new());
        let bot = ChatBot::new(
            RuntimeConfig::default(),
            platform.clone(),
            Arc::new(store.clone()),
            clock.clone(),
            Arc::new(SeededPicker::new(7)),
        );
        Fixture { clock, store, platform, bot }
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_reply_goes_through_dispatcher() {
        let f = fixture();
        f.store.upsert_command("chan", Command::new("hello", "Hi ${user}!")).await.unwrap();

        assert_eq!(f.bot.handle_message(&ChatMessage::new("#Chan", "Alice", "!hello")).await, None);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.platform.sent_to("chan"), vec!["Hi Alice!"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_violation_times_out_and_skips_commands() {
        let f = fixture();
        f.store.upsert_command("chan", Command::new("hello", "hi")).await.unwrap();

        let shout = ChatMessage::new("chan", "loud", "!hello THIS IS VERY LOUD TEXT");
        assert_eq!(f.bot.handle_message(&shout).await, Some(ViolationReason::CapsSpam));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.platform.sent_to("chan").is_empty());
        assert_eq!(
            f.platform.timeouts(),
            vec![("chan".to_string(), "loud".to_string(), 15, "caps spam".to_string())]
        );
        assert_eq!(f.store.infractions().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regulars_bypass_link_protection() {
        let f = fixture();
        let link = ChatMessage::new("chan", "pal", "see https://example.com/x");
        assert_eq!(f.bot.handle_message(&link).await, Some(ViolationReason::LinkProtection));

        f.store.add_regular("chan", "pal", "Pal").await.unwrap();
        f.clock.advance_secs(30);
        let other = ChatMessage::new("chan", "pal", "and https://example.org/y");
        assert_eq!(f.bot.handle_message(&other).await, None);

        f.store
            .set_link_policy("chan", LinkPolicy { allow_regular: false, ..LinkPolicy::default() })
            .await;
        f.clock.advance_secs(30);
        let third = ChatMessage::new("chan", "pal", "last one https://example.net/z");
        assert_eq!(f.bot.handle_message(&third).await, Some(ViolationReason::LinkProtection));
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_is_ignored() {
        let f = fixture();
        let start = f.bot.registry().clock().now();
        f.clock.advance_secs(60);

        let mut echo = ChatMessage::new("chan", "bot", "!commands");
        echo.echo = true;
        assert_eq!(f.bot.handle_message(&echo).await, None);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.platform.sent_to("chan").is_empty());

        f.bot.note_activity("chan").await;
        let runtime = f.bot.registry().get_or_create("chan").await;
        assert!(runtime.lock().await.last_activity_at > start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_part_and_stop() {
        let f = fixture();
        assert!(f.bot.join_channel("#One").await);
        assert!(f.bot.join_channel("two").await);
        assert!(!f.bot.start_timers("one").await);

        let stats = f.bot.runtime_stats().await;
        assert_eq!(stats["channel_count"], serde_json::json!(2));
        assert_eq!(stats["channels"]["one"]["timers_scheduled"], serde_json::json!(true));

        assert!(f.bot.part_channel("one").await);
        assert!(!f.bot.part_channel("one").await);
        assert_eq!(f.bot.registry().channel_ids().await, vec!["two"]);

        f.bot.stop_all().await;
        assert!(!f.bot.enqueue_outbound("two", "late").await);
        assert!(!f.bot.start_timers("two").await);
        assert_eq!(f.bot.runtime_stats().await["stopped"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_cooldown_passthrough() {
        let f = fixture();
        assert!(f.bot.check_and_consume_cooldown("chan", "dice", "alice", 10, 0).await);
        assert!(!f.bot.check_and_consume_cooldown("chan", "dice", "bob", 10, 0).await);
        f.clock.advance_secs(10);
        assert!(f.bot.check_and_consume_cooldown("chan", "dice", "bob", 10, 0).await);
    }
}
