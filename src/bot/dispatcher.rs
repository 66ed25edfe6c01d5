// src/bot/dispatcher.rs - Ordered, rate-limited outbound pipeline per channel

use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bot::registry::ChannelRuntimeRegistry;
use crate::platforms::ChatPlatform;

/// A channel's queue plus the task draining it
pub(crate) struct OutboundLane {
    queue: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl OutboundLane {
    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop; anything still queued is dropped with the receiver
    pub(crate) fn abort(self) {
        self.task.abort();
    }
}

pub struct OutboundDispatcher {
    registry: Arc<ChannelRuntimeRegistry>,
    platform: Arc<dyn ChatPlatform>,
    message_delay: Duration,
}

impl OutboundDispatcher {
    pub fn new(
        registry: Arc<ChannelRuntimeRegistry>,
        platform: Arc<dyn ChatPlatform>,
        message_delay: Duration,
    ) -> Self {
        Self {
            registry,
            platform,
            message_delay,
        }
    }

    pub fn message_delay(&self) -> Duration {
        self.message_delay
    }

    /// Queue a line for the channel and return without waiting for delivery.
    ///
    /// Returns `false` only when the runtime is shutting down.
    pub async fn enqueue(&self, channel: &str, text: impl Into<String>) -> bool {
        if self.registry.is_stopped() {
            warn!("Dropping outbound message for #{}: runtime stopped", channel);
            return false;
        }

        let runtime = self.registry.get_or_create(channel).await;
        let mut lane = runtime.outbound.lock().await;
        // stop_all may have swept this runtime while we waited for the lock
        if self.registry.is_stopped() {
            warn!("Dropping outbound message for #{}: runtime stopped", runtime.channel_id());
            return false;
        }

        if !lane.as_ref().map(|l| l.is_running()).unwrap_or(false) {
            *lane = Some(self.spawn_lane(runtime.channel_id()));
        }

        let text = text.into();
        match lane.as_ref() {
            Some(active) => match active.queue.send(text) {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        "Send loop for #{} is gone, message dropped: {}",
                        runtime.channel_id(),
                        e.0
                    );
                    false
                }
            },
            None => false,
        }
    }

    fn spawn_lane(&self, channel_id: &str) -> OutboundLane {
        let (queue, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(send_loop(
            channel_id.to_string(),
            receiver,
            Arc::clone(&self.platform),
            self.message_delay,
        ));
        debug!("Started send loop for #{}", channel_id);
        OutboundLane { queue, task }
    }
}

/// Deliver one message at a time, then wait out the delay whether or not the send worked
async fn send_loop(
    channel_id: String,
    mut receiver: mpsc::UnboundedReceiver<String>,
    platform: Arc<dyn ChatPlatform>,
    delay: Duration,
) {
    while let Some(message) = receiver.recv().await {
        match platform.send_message(&channel_id, &message).await {
            Ok(()) => debug!("Sent to #{}: {}", channel_id, message),
            Err(e) => error!("Failed to send message to #{}: {}", channel_id, e),
        }
        tokio::time::sleep(delay).await;
    }
    debug!("Send loop for #{} finished", channel_id);
}
