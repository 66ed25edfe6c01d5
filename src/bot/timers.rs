// src/bot/timers.rs - Periodic per-channel timer polling

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::bot::dispatcher::OutboundDispatcher;
use crate::bot::registry::{ChannelRuntimeRegistry, ChannelState};
use crate::clock::{choose, Picker};
use crate::store::ChannelStore;
use crate::types::{normalize_id, Timer};

pub struct TimerScheduler {
    registry: Arc<ChannelRuntimeRegistry>,
    store: Arc<dyn ChannelStore>,
    dispatcher: Arc<OutboundDispatcher>,
    picker: Arc<dyn Picker>,
    poll_interval: Duration,
}

impl TimerScheduler {
    pub fn new(
        registry: Arc<ChannelRuntimeRegistry>,
        store: Arc<dyn ChannelStore>,
        dispatcher: Arc<OutboundDispatcher>,
        picker: Arc<dyn Picker>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            dispatcher,
            picker,
            poll_interval,
        }
    }

    /// Begin polling the channel's timers. Returns false if a poll loop already runs.
    pub async fn start(self: &Arc<Self>, channel: &str) -> bool {
        if self.registry.is_stopped() {
            warn!("Not starting timers for #{}: runtime stopped", channel);
            return false;
        }

        let runtime = self.registry.get_or_create(channel).await;
        let mut task = runtime.timer_task.lock().await;
        // stop_all may have swept this runtime while we waited for the lock
        if self.registry.is_stopped() {
            warn!("Not starting timers for #{}: runtime stopped", runtime.channel_id());
            return false;
        }
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            debug!("Timers already scheduled for #{}", runtime.channel_id());
            return false;
        }

        let scheduler = Arc::clone(self);
        let channel_id = runtime.channel_id().to_string();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.poll_channel(&channel_id).await;
            }
        }));

        info!("Timer polling started for #{} every {:?}", runtime.channel_id(), self.poll_interval);
        true
    }

    /// Run one poll tick: fire every due timer at most once. Returns how many fired.
    pub async fn poll_channel(&self, channel: &str) -> usize {
        let runtime = self.registry.get_or_create(channel).await;
        let timers = match self.store.list_enabled_timers(runtime.channel_id()).await {
            Ok(timers) => timers,
            Err(e) => {
                error!("Failed to load timers for #{}: {}", runtime.channel_id(), e);
                return 0;
            }
        };

        let now = self.registry.clock().now();
        let mut fired = 0;

        for timer in timers.iter().filter(|t| t.enabled) {
            let interval = match timer.interval() {
                Some(interval) => interval,
                None => {
                    warn!(
                        "Skipping timer '{}' in #{}: interval of {} minutes is out of range",
                        timer.name,
                        runtime.channel_id(),
                        timer.interval_minutes
                    );
                    continue;
                }
            };
            let key = normalize_id(&timer.name);
            let message = {
                let state = runtime.lock().await;
                if !is_due(&state, &key, timer, interval, now) {
                    continue;
                }
                let candidates: Vec<&String> =
                    timer.messages.iter().filter(|m| !m.trim().is_empty()).collect();
                match choose(self.picker.as_ref(), &candidates) {
                    Some(message) => (*message).clone(),
                    None => {
                        debug!("Timer '{}' in #{} has no messages", timer.name, runtime.channel_id());
                        continue;
                    }
                }
            };

            if self.dispatcher.enqueue(runtime.channel_id(), message).await {
                runtime.lock().await.timer_last_fire.insert(key, now);
                debug!("Timer '{}' fired in #{}", timer.name, runtime.channel_id());
                fired += 1;
            }
        }
        fired
    }
}

/// Interval elapsed since the last fire, and for activity-gated timers the channel
/// saw a message since that fire and within the interval.
fn is_due(
    state: &ChannelState,
    key: &str,
    timer: &Timer,
    interval: chrono::Duration,
    now: DateTime<Utc>,
) -> bool {
    let last_fire = state.timer_last_fire.get(key).copied();

    if let Some(last_fire) = last_fire {
        if now - last_fire < interval {
            return false;
        }
    }

    if timer.require_chat_activity {
        let last_activity = state.last_activity_at;
        if last_fire.map(|fired| last_activity < fired).unwrap_or(false) {
            return false;
        }
        if now - last_activity > interval {
            return false;
        }
    }
    true
}
