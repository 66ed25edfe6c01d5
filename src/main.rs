use anyhow::Result;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use chanbot::prelude::*;

const CONFIG_PATH: &str = "config/bot.yaml";

/// `channel user text...` read from stdin, for dry runs against the logging platform
fn parse_console_line(line: &str) -> Option<ChatMessage> {
    let mut parts = line.trim().splitn(3, ' ');
    let channel = parts.next().filter(|s| !s.is_empty())?;
    let username = parts.next()?;
    let content = parts.next()?;
    let mut message = ChatMessage::new(channel, username, content);
    message.is_broadcaster =
        username.trim_start_matches('@').eq_ignore_ascii_case(message.channel.as_str());
    Some(message)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C signal, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM signal, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C signal: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting chanbot v{}", chanbot::VERSION);

    let config = RuntimeConfig::load(CONFIG_PATH)?;
    if config.channels.is_empty() {
        warn!("No channels configured; set BOT_CHANNELS or add channels to {}", CONFIG_PATH);
    }

    let channels = config.channels.clone();
    let bot = ChatBot::new(
        config,
        Arc::new(LoggingPlatform),
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
        Arc::new(ThreadRngPicker),
    );

    for channel in &channels {
        bot.join_channel(channel).await;
    }
    info!(
        "Bot is running on {} channels. Type `<channel> <user> <message>` to simulate chat, \
         Ctrl+C to stop.",
        channels.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_console_line(&line) {
                    Some(message) => {
                        bot.handle_message(&message).await;
                    }
                    None => warn!("Expected `<channel> <user> <message>`"),
                },
                Ok(None) => {
                    // stdin closed; keep the timers running until a signal arrives
                    shutdown.as_mut().await;
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    shutdown.as_mut().await;
                    break;
                }
            },
        }
    }

    bot.stop_all().await;
    info!("Bot shutdown complete");
    Ok(())
}
