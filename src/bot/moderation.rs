// src/bot/moderation.rs - Sliding-window spam heuristics, blacklist filters and link protection

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::bot::registry::ChannelRuntimeRegistry;
use crate::config::ModerationThresholds;
use crate::store::ChannelStore;
use crate::types::{
    normalize_id, ChatMessage, Filter, FilterKind, Infraction, LinkPolicy, ViolationReason,
};

/// First `scheme://...` token of a message
fn find_link(content: &str) -> Option<&str> {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"(?i)\b[a-z][a-z0-9+.\-]*://\S+").ok())
        .as_ref()
        .and_then(|regex| regex.find(content))
        .map(|m| m.as_str())
}

pub struct ModerationEngine {
    registry: Arc<ChannelRuntimeRegistry>,
    store: Arc<dyn ChannelStore>,
    thresholds: ModerationThresholds,
    window: Duration,
    flood_span: Duration,
    permit_duration: Duration,
    /// pattern -> compiled case-insensitive regex (None when the pattern is invalid)
    regex_cache: Mutex<HashMap<String, Option<Regex>>>,
}

impl ModerationEngine {
    pub fn new(
        registry: Arc<ChannelRuntimeRegistry>,
        store: Arc<dyn ChannelStore>,
        thresholds: ModerationThresholds,
        permit_seconds: i64,
    ) -> Self {
        let defaults = ModerationThresholds::default();
        Self {
            window: seconds_or(
                "window_seconds",
                thresholds.window_seconds,
                defaults.window_seconds,
            ),
            flood_span: seconds_or(
                "flood_span_seconds",
                thresholds.flood_span_seconds,
                defaults.flood_span_seconds,
            ),
            permit_duration: seconds_or("permit_seconds", permit_seconds, 60),
            registry,
            store,
            thresholds,
            regex_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate one inbound message; the first matching rule wins.
    ///
    /// Each user's window is updated under the channel lock, so evaluation order follows the
    /// order in which handlers reach that lock (arrival order for a sequential transport).
    /// Allow-listed domains match anywhere in the link text, so an entry may carry a path.
    pub async fn evaluate(
        &self,
        message: &ChatMessage,
        is_regular: bool,
    ) -> Option<ViolationReason> {
        if message.is_mod {
            return None;
        }

        let channel = normalize_id(&message.channel);
        let user_id = normalize_id(&message.user_id);
        let content = message.content.as_str();

        if let Some(reason) = self.check_window(&channel, &user_id, content).await {
            self.record(message, reason, reason.as_str().to_string()).await;
            return Some(reason);
        }

        if let Some(reason) = self.check_content(content) {
            self.record(message, reason, reason.as_str().to_string()).await;
            return Some(reason);
        }

        let filters = match self.store.list_enabled_filters(&channel).await {
            Ok(filters) => filters,
            Err(e) => {
                error!("Failed to load filters for #{}: {}", channel, e);
                Vec::new()
            }
        };
        if let Some((reason, filter)) = self.check_filters(&filters, content) {
            let detail = format!("{}: {}", filter_label(filter.kind), filter.pattern);
            self.record(message, reason, detail).await;
            return Some(reason);
        }

        let policy = match self.store.get_link_policy(&channel).await {
            Ok(policy) => policy.unwrap_or_default(),
            Err(e) => {
                error!("Failed to load link policy for #{}: {}", channel, e);
                LinkPolicy::default()
            }
        };
        if self.violates_link_policy(&channel, message, is_regular, &policy).await {
            let reason = ViolationReason::LinkProtection;
            self.record(message, reason, reason.as_str().to_string()).await;
            return Some(reason);
        }

        None
    }

    /// Grant `username` one link within the permit window
    pub async fn permit_user(&self, channel: &str, username: &str) {
        let runtime = self.registry.get_or_create(channel).await;
        let now = self.registry.clock().now();
        let expires = now
            .checked_add_signed(self.permit_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut state = runtime.lock().await;
        state.link_permits.retain(|_, expires| *expires >= now);
        state.link_permits.insert(normalize_id(username), expires);
        drop(state);
        info!("Permitted {} to post a link in #{}", username, runtime.channel_id());
    }

    pub fn permit_seconds(&self) -> i64 {
        self.permit_duration.num_seconds()
    }

    /// Flood and repetition rules over the user's trailing window
    async fn check_window(
        &self,
        channel: &str,
        user_id: &str,
        content: &str,
    ) -> Option<ViolationReason> {
        let runtime = self.registry.get_or_create(channel).await;
        let now = self.registry.clock().now();
        let window = self.window;

        let mut state = runtime.lock().await;
        // users whose newest message left the window
        state
            .recent_messages
            .retain(|_, recent| recent.back().map(|(at, _)| now - *at <= window).unwrap_or(false));
        let recent = state.recent_messages.entry(user_id.to_string()).or_default();
        recent.push_back((now, content.to_string()));
        while let Some((oldest, _)) = recent.front() {
            if now - *oldest > window {
                recent.pop_front();
            } else {
                break;
            }
        }

        if let Some((oldest, _)) = recent.front() {
            if recent.len() >= self.thresholds.flood_message_count
                && now - *oldest <= self.flood_span
            {
                return Some(ViolationReason::MessageFlood);
            }
        }

        let same = recent.iter().filter(|(_, c)| c == content).count();
        if same >= self.thresholds.repeat_count {
            return Some(ViolationReason::RepeatedMessage);
        }
        None
    }

    fn check_content(&self, content: &str) -> Option<ViolationReason> {
        let length = content.chars().count();
        let t = &self.thresholds;
        if length > t.caps_min_length && caps_ratio(content) > t.caps_ratio {
            return Some(ViolationReason::CapsSpam);
        }
        if length > t.symbol_min_length && symbol_ratio(content) > t.symbol_ratio {
            return Some(ViolationReason::SymbolSpam);
        }
        None
    }

    fn check_filters<'f>(
        &self,
        filters: &'f [Filter],
        content: &str,
    ) -> Option<(ViolationReason, &'f Filter)> {
        let lowered = content.to_lowercase();
        for filter in filters.iter().filter(|f| f.enabled) {
            let hit = match filter.kind {
                FilterKind::Regex => self.regex_matches(&filter.pattern, content),
                FilterKind::Word => {
                    let needle = filter.pattern.to_lowercase();
                    tokens(&lowered).any(|token| token == needle)
                }
                FilterKind::Phrase => lowered.contains(&filter.pattern.to_lowercase()),
            };
            if hit {
                debug!("Filter {:?} '{}' matched", filter.kind, filter.pattern);
                let reason = match filter.kind {
                    FilterKind::Regex => ViolationReason::FilteredRegex,
                    FilterKind::Word => ViolationReason::FilteredWord,
                    FilterKind::Phrase => ViolationReason::FilteredPhrase,
                };
                return Some((reason, filter));
            }
        }
        None
    }

    fn regex_matches(&self, pattern: &str, content: &str) -> bool {
        let mut cache = self.regex_cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let compiled = cache.entry(pattern.to_string()).or_insert_with(|| {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Skipping invalid regex filter '{}': {}", pattern, e);
                    None
                }
            }
        });
        compiled.as_ref().map(|regex| regex.is_match(content)).unwrap_or(false)
    }

    async fn violates_link_policy(
        &self,
        channel: &str,
        message: &ChatMessage,
        is_regular: bool,
        policy: &LinkPolicy,
    ) -> bool {
        if !policy.enabled {
            return false;
        }
        if (message.is_mod && policy.allow_mod)
            || (message.is_subscriber && policy.allow_sub)
            || (is_regular && policy.allow_regular)
        {
            return false;
        }

        let link = match find_link(&message.content) {
            Some(link) => link,
            None => return false,
        };

        if self.consume_permit(channel, &message.username).await {
            debug!("{} used a link permit in #{}", message.username, channel);
            return false;
        }

        let host = link_target(link);
        let text = link.to_lowercase();
        !policy
            .allowed_domains
            .iter()
            .map(|domain| domain.trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
            .any(|domain| host.contains(&domain) || text.contains(&domain))
    }

    async fn consume_permit(&self, channel: &str, username: &str) -> bool {
        let runtime = self.registry.get_or_create(channel).await;
        let now: DateTime<Utc> = self.registry.clock().now();
        let mut state = runtime.lock().await;
        let permit = state.link_permits.remove(&normalize_id(username));
        state.link_permits.retain(|_, expires| *expires >= now);
        match permit {
            Some(expires) => expires >= now,
            None => false,
        }
    }

    async fn record(&self, message: &ChatMessage, reason: ViolationReason, detail: String) {
        info!(
            "Flagged {} in #{} for {}: {}",
            message.username, message.channel, reason, message.content
        );
        let infraction = Infraction {
            channel: normalize_id(&message.channel),
            user_id: normalize_id(&message.user_id),
            username: message.username.clone(),
            kind: "timeout".to_string(),
            reason: detail,
            timestamp: self.registry.clock().now(),
        };
        if let Err(e) = self.store.record_infraction(infraction).await {
            error!("Failed to record infraction for {}: {}", message.username, e);
        }
    }
}

fn seconds_or(name: &str, seconds: i64, fallback: i64) -> Duration {
    match Duration::try_seconds(seconds).filter(|d| *d >= Duration::zero()) {
        Some(duration) => duration,
        None => {
            warn!("{} of {}s is out of range, using {}s", name, seconds, fallback);
            Duration::seconds(fallback)
        }
    }
}

fn filter_label(kind: FilterKind) -> &'static str {
    match kind {
        FilterKind::Regex => "filter regex",
        FilterKind::Word => "filter word",
        FilterKind::Phrase => "filter phrase",
    }
}

/// Share of uppercase letters among alphabetic characters
pub fn caps_ratio(text: &str) -> f64 {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    if letters == 0 {
        return 0.0;
    }
    let upper = text.chars().filter(|c| c.is_alphabetic() && c.is_uppercase()).count();
    upper as f64 / letters as f64
}

/// Share of characters that are neither alphanumeric nor whitespace
pub fn symbol_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let symbols = text.chars().filter(|c| !c.is_alphanumeric() && !c.is_whitespace()).count();
    symbols as f64 / total as f64
}

/// Word tokens: runs of alphanumerics, underscores and apostrophes
fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '\''))
        .filter(|t| !t.is_empty())
}

/// Lowercased host of a link, or the raw text when it does not parse as a URL
fn link_target(link: &str) -> String {
    match url::Url::parse(link) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.to_lowercase(),
            None => link.to_lowercase(),
        },
        Err(_) => link.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: MemoryStore,
        engine: ModerationEngine,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = Arc::new(ChannelRuntimeRegistry::new(clock.clone()));
        let store = MemoryStore::new();
        let engine = ModerationEngine::new(
            registry,
            Arc::new(store.clone()),
            ModerationThresholds::default(),
            60,
        );
        Fixture { clock, store, engine }
    }

    fn msg(content: &str) -> ChatMessage {
        ChatMessage::new("chan", "viewer", content)
    }

    #[tokio::test]
    async fn test_flood_within_nine_seconds() {
        let f = fixture();
        let mut last = None;
        for i in 0..6 {
            if i > 0 {
                f.clock.advance(Duration::milliseconds(1800));
            }
            last = f.engine.evaluate(&msg(&format!("message number {}", i)), false).await;
        }
        assert_eq!(last, Some(ViolationReason::MessageFlood));
        let infractions = f.store.infractions().await;
        assert_eq!(infractions.len(), 1);
        assert_eq!(infractions[0].reason, "message flood");
        assert_eq!(infractions[0].kind, "timeout");
    }

    #[tokio::test]
    async fn test_no_flood_across_eleven_seconds() {
        let f = fixture();
        for i in 0..6 {
            if i > 0 {
                f.clock.advance(Duration::milliseconds(2200));
            }
            let result = f.engine.evaluate(&msg(&format!("message number {}", i)), false).await;
            assert_eq!(result, None);
        }
    }

    #[tokio::test]
    async fn test_repetition() {
        let f = fixture();
        assert_eq!(f.engine.evaluate(&msg("hello"), false).await, None);
        f.clock.advance_secs(1);
        assert_eq!(f.engine.evaluate(&msg("hello"), false).await, None);
        f.clock.advance_secs(1);
        assert_eq!(
            f.engine.evaluate(&msg("hello"), false).await,
            Some(ViolationReason::RepeatedMessage)
        );
    }

    #[tokio::test]
    async fn test_two_repeats_and_one_different_is_fine() {
        let f = fixture();
        for content in ["hello", "hello", "goodbye"] {
            f.clock.advance_secs(1);
            assert_eq!(f.engine.evaluate(&msg(content), false).await, None);
        }
    }

    #[tokio::test]
    async fn test_window_evicts_old_messages() {
        let f = fixture();
        f.engine.evaluate(&msg("hello"), false).await;
        f.engine.evaluate(&msg("hello"), false).await;
        f.clock.advance_secs(16);
        assert_eq!(f.engine.evaluate(&msg("hello"), false).await, None);
    }

    #[tokio::test]
    async fn test_caps_spam_length_threshold() {
        let f = fixture();
        // 20 chars, 16 of 20 letters uppercase
        assert_eq!(
            f.engine.evaluate(&msg("ABCDEFGHIJKLMNOPqrst"), false).await,
            Some(ViolationReason::CapsSpam)
        );
        // 10 chars, same ratio
        assert_eq!(f.engine.evaluate(&msg("ABCDEFGHij"), false).await, None);
    }

    #[tokio::test]
    async fn test_symbol_spam() {
        let f = fixture();
        assert_eq!(
            f.engine.evaluate(&msg("!!!!!!!!ok!!"), false).await,
            Some(ViolationReason::SymbolSpam)
        );
        assert_eq!(f.engine.evaluate(&msg("!!!!!!!!!!"), false).await, None);
    }

    #[tokio::test]
    async fn test_moderators_are_exempt() {
        let f = fixture();
        let mut message = msg("ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        message.is_mod = true;
        assert_eq!(f.engine.evaluate(&message, false).await, None);
        assert!(f.store.infractions().await.is_empty());
    }

    #[tokio::test]
    async fn test_filters_in_stored_order() {
        let f = fixture();
        f.store.add_filter("chan", Filter::new(FilterKind::Word, "spoiler")).await;
        f.store.add_filter("chan", Filter::new(FilterKind::Phrase, "buy followers")).await;
        f.store.add_filter("chan", Filter::new(FilterKind::Regex, r"b[a4]d\s*bot")).await;

        let cases = [
            ("no SPOILER please", Some(ViolationReason::FilteredWord)),
            ("spoilers are fine", None),
            ("Buy Followers cheap", Some(ViolationReason::FilteredPhrase)),
            ("what a B4D  BOT", Some(ViolationReason::FilteredRegex)),
        ];
        for (content, expected) in cases {
            f.clock.advance_secs(1);
            assert_eq!(f.engine.evaluate(&msg(content), false).await, expected, "{}", content);
        }

        let reasons: Vec<String> =
            f.store.infractions().await.into_iter().map(|i| i.reason).collect();
        assert_eq!(reasons[0], "filter word: spoiler");
    }

    #[tokio::test]
    async fn test_invalid_regex_filter_is_skipped() {
        let f = fixture();
        f.store.add_filter("chan", Filter::new(FilterKind::Regex, "(unclosed")).await;
        assert_eq!(f.engine.evaluate(&msg("(unclosed paren"), false).await, None);
    }

    #[tokio::test]
    async fn test_default_link_policy_lets_subscribers_through() {
        let f = fixture();
        let mut message = msg("look https://example.com/thing");
        assert_eq!(f.engine.evaluate(&message, false).await, Some(ViolationReason::LinkProtection));

        message.is_subscriber = true;
        message.user_id = "subscriber".to_string();
        assert_eq!(f.engine.evaluate(&message, false).await, None);
        message.is_subscriber = false;
        message.user_id = "regular".to_string();
        assert_eq!(f.engine.evaluate(&message, true).await, None);
    }

    #[tokio::test]
    async fn test_link_policy_allow_list_and_disabled() {
        let f = fixture();
        f.store
            .set_link_policy("chan", LinkPolicy {
                enabled: true,
                allow_mod: false,
                allow_sub: false,
                allow_regular: false,
                allowed_domains: vec!["Twitch.tv".to_string()],
            })
            .await;

        assert_eq!(f.engine.evaluate(&msg("clip https://clips.twitch.tv/abc"), false).await, None);
        assert_eq!(
            f.engine.evaluate(&msg("https://evil.example/?twitch"), false).await,
            Some(ViolationReason::LinkProtection)
        );
        assert_eq!(f.engine.evaluate(&msg("no links here"), false).await, None);

        let disabled = LinkPolicy { enabled: false, ..LinkPolicy::default() };
        f.store.set_link_policy("chan", disabled).await;
        assert_eq!(f.engine.evaluate(&msg("ftp://files.example/x"), false).await, None);
    }

    #[tokio::test]
    async fn test_link_permit_is_single_use_and_expires() {
        let f = fixture();
        f.engine.permit_user("chan", "Viewer").await;
        assert_eq!(f.engine.evaluate(&msg("https://a.example"), false).await, None);
        f.clock.advance_secs(1);
        assert_eq!(
            f.engine.evaluate(&msg("https://b.example"), false).await,
            Some(ViolationReason::LinkProtection)
        );

        f.engine.permit_user("chan", "viewer").await;
        f.clock.advance_secs(61);
        assert_eq!(
            f.engine.evaluate(&msg("https://c.example"), false).await,
            Some(ViolationReason::LinkProtection)
        );
    }

    #[tokio::test]
    async fn test_allow_list_entry_with_path_matches_full_link() {
        let f = fixture();
        f.store
            .set_link_policy("chan", LinkPolicy {
                enabled: true,
                allow_mod: false,
                allow_sub: false,
                allow_regular: false,
                allowed_domains: vec!["youtube.com/watch".to_string()],
            })
            .await;

        let allowed = msg("watch https://www.YouTube.com/watch?v=abc");
        assert_eq!(f.engine.evaluate(&allowed, false).await, None);

        f.clock.advance_secs(1);
        assert_eq!(
            f.engine.evaluate(&msg("https://www.youtube.com/shorts/abc"), false).await,
            Some(ViolationReason::LinkProtection)
        );
    }

    #[tokio::test]
    async fn test_stale_user_windows_are_dropped() {
        let f = fixture();
        f.engine.evaluate(&ChatMessage::new("chan", "drifter", "hi all"), false).await;
        f.clock.advance_secs(16);
        f.engine.evaluate(&msg("hello"), false).await;

        let runtime = f.engine.registry.get("chan").await.unwrap();
        let state = runtime.lock().await;
        assert!(!state.recent_messages.contains_key("drifter"));
        assert_eq!(state.recent_messages["viewer"].len(), 1);
    }

    #[tokio::test]
    async fn test_expired_permits_are_dropped() {
        let f = fixture();
        f.engine.permit_user("chan", "first").await;
        f.engine.permit_user("chan", "second").await;
        f.clock.advance_secs(61);
        f.engine.permit_user("chan", "third").await;

        let runtime = f.engine.registry.get("chan").await.unwrap();
        let mut permitted: Vec<String> =
            runtime.lock().await.link_permits.keys().cloned().collect();
        permitted.sort();
        assert_eq!(permitted, vec!["third".to_string()]);
    }

    #[tokio::test]
    async fn test_out_of_range_durations_fall_back_to_defaults() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = Arc::new(ChannelRuntimeRegistry::new(clock.clone()));
        let thresholds = ModerationThresholds {
            window_seconds: i64::MAX,
            flood_span_seconds: -5,
            ..ModerationThresholds::default()
        };
        let engine =
            ModerationEngine::new(registry, Arc::new(MemoryStore::new()), thresholds, i64::MAX);
        assert_eq!(engine.permit_seconds(), 60);
        assert_eq!(engine.window, Duration::seconds(15));
        assert_eq!(engine.flood_span, Duration::seconds(10));

        engine.permit_user("chan", "viewer").await;
        assert_eq!(engine.evaluate(&msg("https://a.example"), false).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_flags_flood_once() {
        let f = fixture();
        let engine = Arc::new(f.engine);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.evaluate(&msg(&format!("burst message {}", i)), false).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        let floods = results.iter().filter(|r| **r == Some(ViolationReason::MessageFlood)).count();
        assert_eq!(floods, 1);
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 5);

        let runtime = engine.registry.get("chan").await.unwrap();
        assert_eq!(runtime.lock().await.recent_messages["viewer"].len(), 6);
        assert_eq!(f.store.infractions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mod_bypass_flag_decides_link_rule() {
        let f = fixture();
        let mut message = msg("see https://evil.example/x");
        message.is_mod = true;

        let bypass = LinkPolicy::default();
        assert!(!f.engine.violates_link_policy("chan", &message, false, &bypass).await);

        let strict = LinkPolicy { allow_mod: false, ..LinkPolicy::default() };
        assert!(f.engine.violates_link_policy("chan", &message, false, &strict).await);

        // full evaluation still exempts moderators before any rule runs
        f.store.set_link_policy("chan", strict).await;
        assert_eq!(f.engine.evaluate(&message, false).await, None);
    }

    #[test]
    fn test_ratios() {
        assert_eq!(caps_ratio("1234"), 0.0);
        assert!((caps_ratio("ABcd") - 0.5).abs() < f64::EPSILON);
        assert_eq!(symbol_ratio(""), 0.0);
        assert!((symbol_ratio("a!b?") - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_link_target_prefers_host() {
        assert_eq!(link_target("https://WWW.Example.com/path"), "www.example.com");
        assert_eq!(link_target("https://"), "https://");
    }
}
