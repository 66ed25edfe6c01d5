use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::sync::Arc;

use crate::bot::registry::ChannelRuntimeRegistry;
use crate::types::normalize_id;

/// Global and per-user command cooldowns, stored per channel
pub struct CooldownTracker {
    registry: Arc<ChannelRuntimeRegistry>,
}

impl CooldownTracker {
    pub fn new(registry: Arc<ChannelRuntimeRegistry>) -> Self {
        Self { registry }
    }

    /// Returns true and starts both cooldowns when the command may run now.
    ///
    /// A denied check leaves every table untouched; a 0-second cooldown is never recorded.
    pub async fn check_and_consume(
        &self,
        channel: &str,
        command: &str,
        user_id: &str,
        global_cooldown_seconds: u64,
        user_cooldown_seconds: u64,
    ) -> bool {
        let command = normalize_id(command);
        let user_id = normalize_id(user_id);
        let runtime = self.registry.get_or_create(channel).await;
        let now = self.registry.clock().now();

        let mut state = runtime.lock().await;

        if global_cooldown_seconds > 0 {
            if let Some(ready_at) = state.global_cooldowns.get(&command) {
                if now < *ready_at {
                    debug!(
                        "!{} in #{} on global cooldown for {}s",
                        command,
                        runtime.channel_id(),
                        (*ready_at - now).num_seconds()
                    );
                    return false;
                }
            }
        }

        let user_key = (command, user_id);
        if user_cooldown_seconds > 0 {
            if let Some(ready_at) = state.user_cooldowns.get(&user_key) {
                if now < *ready_at {
                    debug!(
                        "!{} in #{} on cooldown for {} for {}s",
                        user_key.0,
                        runtime.channel_id(),
                        user_key.1,
                        (*ready_at - now).num_seconds()
                    );
                    return false;
                }
            }
        }

        state.global_cooldowns.retain(|_, ready_at| *ready_at > now);
        state.user_cooldowns.retain(|_, ready_at| *ready_at > now);

        if global_cooldown_seconds > 0 {
            let ready_at = ready_at(now, global_cooldown_seconds);
            state.global_cooldowns.insert(user_key.0.clone(), ready_at);
        }
        if user_cooldown_seconds > 0 {
            let ready_at = ready_at(now, user_cooldown_seconds);
            state.user_cooldowns.insert(user_key, ready_at);
        }
        true
    }
}

/// `now + seconds`, saturating at the latest representable instant
fn ready_at(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    let ready = i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|cooldown| now.checked_add_signed(cooldown));
    match ready {
        Some(ready) => ready,
        None => {
            warn!("Cooldown of {}s is out of range, treating it as permanent", seconds);
            DateTime::<Utc>::MAX_UTC
        }
    }
}
