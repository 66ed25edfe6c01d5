// src/bot/registry.rs - Lazily created per-channel runtime state

use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;

use crate::bot::dispatcher::OutboundLane;
use crate::bot::giveaways::Giveaway;
use crate::clock::Clock;
use crate::types::normalize_id;

/// Mutable per-channel tables. Only touched while holding the owning runtime's lock.
#[derive(Debug)]
pub struct ChannelState {
    pub last_activity_at: DateTime<Utc>,
    /// user_id -> (timestamp, content), oldest first
    pub recent_messages: HashMap<String, VecDeque<(DateTime<Utc>, String)>>,
    /// timer name -> last successful fire
    pub timer_last_fire: HashMap<String, DateTime<Utc>>,
    /// command -> instant the command is runnable again
    pub global_cooldowns: HashMap<String, DateTime<Utc>>,
    /// (command, user_id) -> instant the user may run the command again
    pub user_cooldowns: HashMap<(String, String), DateTime<Utc>>,
    /// username -> expiry of a one-shot link permit
    pub link_permits: HashMap<String, DateTime<Utc>>,
    pub giveaway: Option<Giveaway>,
}

impl ChannelState {
    fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            last_activity_at: created_at,
            recent_messages: HashMap::new(),
            timer_last_fire: HashMap::new(),
            global_cooldowns: HashMap::new(),
            user_cooldowns: HashMap::new(),
            link_permits: HashMap::new(),
            giveaway: None,
        }
    }
}

/// Everything one channel owns: its state tables, its send lane and its timer poll loop
pub struct ChannelRuntime {
    channel_id: String,
    state: Mutex<ChannelState>,
    pub(crate) outbound: Mutex<Option<OutboundLane>>,
    pub(crate) timer_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelRuntime {
    fn new(channel_id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            channel_id,
            state: Mutex::new(ChannelState::new(created_at)),
            outbound: Mutex::new(None),
            timer_task: Mutex::new(None),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Exclusive access to the channel's tables
    pub async fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().await
    }

    pub async fn is_sender_active(&self) -> bool {
        self.outbound
            .lock()
            .await
            .as_ref()
            .map(|lane| lane.is_running())
            .unwrap_or(false)
    }

    pub async fn is_timer_scheduled(&self) -> bool {
        self.timer_task
            .lock()
            .await
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Abort the send loop (dropping its backlog) and the timer poll loop
    pub async fn shutdown(&self) {
        if let Some(lane) = self.outbound.lock().await.take() {
            lane.abort();
        }
        if let Some(task) = self.timer_task.lock().await.take() {
            task.abort();
        }
        debug!("Stopped loops for #{}", self.channel_id);
    }
}

/// Owner of every `ChannelRuntime`; one instance per bot, injected into each component
pub struct ChannelRuntimeRegistry {
    channels: RwLock<HashMap<String, Arc<ChannelRuntime>>>,
    clock: Arc<dyn Clock>,
    stopped: AtomicBool,
}

impl ChannelRuntimeRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            clock,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Fetch the channel's runtime, creating it on first reference
    pub async fn get_or_create(&self, channel: &str) -> Arc<ChannelRuntime> {
        let channel_id = normalize_id(channel);

        if let Some(runtime) = self.channels.read().await.get(&channel_id) {
            return Arc::clone(runtime);
        }

        let mut channels = self.channels.write().await;
        let runtime = channels.entry(channel_id.clone()).or_insert_with(|| {
            info!("Created runtime for #{}", channel_id);
            Arc::new(ChannelRuntime::new(channel_id.clone(), self.clock.now()))
        });
        Arc::clone(runtime)
    }

    pub async fn get(&self, channel: &str) -> Option<Arc<ChannelRuntime>> {
        self.channels.read().await.get(&normalize_id(channel)).cloned()
    }

    /// Drop a channel's runtime after stopping its loops
    pub async fn remove(&self, channel: &str) -> bool {
        let removed = self.channels.write().await.remove(&normalize_id(channel));
        match removed {
            Some(runtime) => {
                runtime.shutdown().await;
                info!("Removed runtime for #{}", runtime.channel_id());
                true
            }
            None => false,
        }
    }

    pub async fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn runtimes(&self) -> Vec<Arc<ChannelRuntime>> {
        self.channels.read().await.values().cloned().collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop every channel's loops; later enqueues and timer starts are refused
    pub async fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let runtimes = self.runtimes().await;
        futures_util::future::join_all(runtimes.iter().map(|runtime| runtime.shutdown())).await;
        info!("Stopped {} channel runtimes", runtimes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn test_get_or_create_returns_same_instance() {
        let registry = ChannelRuntimeRegistry::new(Arc::new(SystemClock));
        let first = registry.get_or_create("#Foo").await;
        let second = registry.get_or_create("foo").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.channel_id(), "foo");
        assert_eq!(registry.channel_ids().await, vec!["foo"]);
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_one_runtime() {
        let registry = Arc::new(ChannelRuntimeRegistry::new(Arc::new(SystemClock)));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get_or_create("busy").await })
            })
            .collect();

        let runtimes: Vec<Arc<ChannelRuntime>> = futures_util::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(runtimes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.runtimes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_channels_do_not_share_state() {
        let registry = ChannelRuntimeRegistry::new(Arc::new(SystemClock));
        let a = registry.get_or_create("a").await;
        let b = registry.get_or_create("b").await;

        a.lock().await.global_cooldowns.insert("hello".to_string(), Utc::now());
        assert!(b.lock().await.global_cooldowns.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_stop() {
        let registry = ChannelRuntimeRegistry::new(Arc::new(SystemClock));
        registry.get_or_create("gone").await;
        assert!(registry.remove("gone").await);
        assert!(!registry.remove("gone").await);
        assert!(registry.get("gone").await.is_none());

        assert!(!registry.is_stopped());
        registry.stop_all().await;
        assert!(registry.is_stopped());
    }
}
