use anyhow::Result;
use async_trait::async_trait;
use log::info;

/// Outbound side of a chat platform: everything the runtime asks the transport to do
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Deliver one chat line to the channel
    async fn send_message(&self, channel: &str, message: &str) -> Result<()>;

    /// Temporarily silence a user
    async fn timeout_user(
        &self,
        channel: &str,
        username: &str,
        duration_seconds: u64,
        reason: &str,
    ) -> Result<()>;

    /// Get the platform identifier (e.g., "twitch")
    fn platform_name(&self) -> &str;
}

/// Platform that only writes to the log; used for dry runs
#[derive(Debug, Default)]
pub struct LoggingPlatform;

#[async_trait]
impl ChatPlatform for LoggingPlatform {
    async fn send_message(&self, channel: &str, message: &str) -> Result<()> {
        info!("[#{}] >> {}", channel, message);
        Ok(())
    }

    async fn timeout_user(
        &self,
        channel: &str,
        username: &str,
        duration_seconds: u64,
        reason: &str,
    ) -> Result<()> {
        info!("[#{}] timeout {} for {}s ({})", channel, username, duration_seconds, reason);
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "log"
    }
}
