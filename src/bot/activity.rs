use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::bot::registry::ChannelRuntimeRegistry;

/// Last-seen chat message per channel, consulted by activity-gated timers
pub struct ActivityTracker {
    registry: Arc<ChannelRuntimeRegistry>,
}

impl ActivityTracker {
    pub fn new(registry: Arc<ChannelRuntimeRegistry>) -> Self {
        Self { registry }
    }

    pub async fn note_activity(&self, channel: &str) {
        let runtime = self.registry.get_or_create(channel).await;
        let now = self.registry.clock().now();
        runtime.lock().await.last_activity_at = now;
    }

    /// Defaults to the channel's creation time when nothing was seen yet
    pub async fn last_activity(&self, channel: &str) -> DateTime<Utc> {
        let runtime = self.registry.get_or_create(channel).await;
        let state = runtime.lock().await;
        state.last_activity_at
    }
}
