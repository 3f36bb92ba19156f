//! Multi-channel notification dispatch.
//!
//! A [`NotificationManager`] routes [`Notification`]s to named [`Channel`]
//! implementations with per-channel retry ([`RetryPolicy`]), token-bucket
//! rate limiting ([`RateLimit`]), filter-driven routing ([`Route`]),
//! `{var}` templates ([`Template`]), time/size-window aggregation
//! ([`AggregationPolicy`]) and delayed scheduling.
//!
//! Channel failures are confined to their [`DeliveryResult`]; one broken
//! channel never stops dispatch to the others.
//!
//! ```no_run
//! use aspects::notifications::{Notification, NotificationManager, Severity};
//!
//! # async fn demo(manager: NotificationManager) {
//! let results = manager
//!     .send(
//!         &Notification::new("Disk almost full", "93% used", Severity::High),
//!         &["ops-email", "ops-chat"],
//!     )
//!     .await;
//!
//! for result in results {
//!     println!("{}: delivered={} attempts={}", result.channel, result.success, result.attempts);
//! }
//! # }
//! ```

mod channel;
mod ratelimit;
mod retry;
mod template;

pub use channel::{Channel, DeliveryResult};
pub use ratelimit::RateLimit;
pub use retry::RetryPolicy;
pub use template::Template;

use crate::util::Ring;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use ratelimit::ChannelRateLimiter;
use serde::{Deserialize, Serialize};
use slog::{o, Discard, Logger};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default bound on the delivery history when persistence is enabled.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Errors produced by the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// No template is registered under this name.
    #[error("unknown notification template `{0}`")]
    UnknownTemplate(String),

    /// A persisted history blob could not be restored; nothing was changed.
    #[error("malformed notification history: {0}")]
    MalformedHistory(#[source] serde_json::Error),
}

/// Urgency of a notification.
#[derive(
    Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Worth a look.
    Medium,
    /// Needs attention.
    High,
    /// Needs immediate attention.
    Critical,
}

impl Severity {
    /// The lowercase name used in aggregated titles and parameters.
    pub fn short_form(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parses the lowercase form produced by
    /// [`short_form`](Severity::short_form).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Severity::Info),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// Lifecycle state of a notification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Created but not yet dispatched.
    Pending,
    /// At least one channel delivery succeeded.
    Sent,
    /// Every channel delivery failed.
    Failed,
    /// Buffered into an aggregation bucket.
    Aggregated,
    /// Waiting for its scheduled dispatch time.
    Scheduled,
}

/// A message to be delivered through one or more channels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique id, assigned at creation.
    pub id: Uuid,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Urgency classification.
    pub severity: Severity,
    /// Free-form string metadata; also feeds aggregation group-by keys.
    pub metadata: BTreeMap<String, String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Lifecycle state.
    pub status: NotificationStatus,
}

impl Notification {
    /// Creates a pending notification.
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            severity,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
            status: NotificationStatus::Pending,
        }
    }

    /// Adds a metadata entry, replacing any previous value for the key.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

type RouteFilter = Arc<dyn Fn(&Notification) -> bool + Send + Sync>;

/// A filter-to-channels mapping used by
/// [`send_routed`](NotificationManager::send_routed).
#[derive(Clone)]
pub struct Route {
    name: String,
    channels: Vec<String>,
    filter: RouteFilter,
}

impl Route {
    /// Creates a route delivering matching notifications to `channels`.
    pub fn new(
        name: impl Into<String>,
        channels: Vec<String>,
        filter: impl Fn(&Notification) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            channels,
            filter: Arc::new(filter),
        }
    }

    /// The route's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The destination channel names.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Whether the route admits this notification.
    pub fn matches(&self, notification: &Notification) -> bool {
        (self.filter)(notification)
    }
}

/// Settings for time/size-window aggregation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregationPolicy {
    /// Maximum age of a bucket before a tick flushes it.
    pub window: Duration,
    /// Metadata fields whose values form the bucket key.
    pub group_by: Vec<String>,
    /// Bucket size that triggers an immediate flush.
    pub max_batch_size: usize,
}

impl AggregationPolicy {
    fn bucket_key(&self, metadata: &BTreeMap<String, String>) -> String {
        self.group_by
            .iter()
            .map(|field| metadata.get(field).cloned().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// One dispatch recorded into the delivery history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The dispatched notification, with its final status.
    pub notification: Notification,
    /// Per-channel outcomes.
    pub results: Vec<DeliveryResult>,
}

struct AggregationBucket {
    notifications: Vec<Notification>,
    channels: Vec<String>,
    opened_at: Instant,
}

struct AggregationState {
    policy: AggregationPolicy,
    buckets: HashMap<String, AggregationBucket>,
}

struct ScheduledNotification {
    id: Uuid,
    notification: Notification,
    channels: Vec<String>,
    due_at: Instant,
}

enum BufferOutcome {
    /// Aggregation disabled; dispatch directly.
    Direct,
    /// Buffered; nothing to send yet.
    Buffered,
    /// The bucket reached its size limit and must be dispatched.
    Flush(String, AggregationBucket),
}

struct ManagerInner {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
    routes: RwLock<Vec<Route>>,
    templates: RwLock<HashMap<String, Template>>,
    retry_policy: RwLock<RetryPolicy>,
    rate_limits: Mutex<HashMap<String, ChannelRateLimiter>>,
    aggregation: Mutex<Option<AggregationState>>,
    scheduled: Mutex<Vec<ScheduledNotification>>,
    history: Mutex<Option<Ring<HistoryEntry>>>,
    log: RwLock<Logger>,
}

/// Dispatches notifications to channels with retry, rate limiting, routing,
/// aggregation and scheduling.
///
/// Cloning yields another handle over the same state.
#[derive(Clone)]
pub struct NotificationManager {
    inner: Arc<ManagerInner>,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationManager {
    /// Creates a manager with no channels and the default retry policy.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                channels: RwLock::new(HashMap::new()),
                routes: RwLock::new(Vec::new()),
                templates: RwLock::new(HashMap::new()),
                retry_policy: RwLock::new(RetryPolicy::default()),
                rate_limits: Mutex::new(HashMap::new()),
                aggregation: Mutex::new(None),
                scheduled: Mutex::new(Vec::new()),
                history: Mutex::new(None),
                log: RwLock::new(Logger::root(Discard, o!())),
            }),
        }
    }

    /// Replaces the logger used for delivery diagnostics.
    pub fn set_logger(&self, logger: Logger) {
        *self.inner.log.write() = logger;
    }

    /// Registers a channel under its own name, replacing any previous
    /// channel with that name.
    pub fn add_channel(&self, channel: impl Channel + 'static) {
        let channel: Arc<dyn Channel> = Arc::new(channel);

        self.inner
            .channels
            .write()
            .insert(channel.name().to_owned(), channel);
    }

    /// Appends a route evaluated by
    /// [`send_routed`](NotificationManager::send_routed).
    pub fn add_route(&self, route: Route) {
        self.inner.routes.write().push(route);
    }

    /// Registers a template, replacing any previous one with that name.
    pub fn add_template(&self, template: Template) {
        self.inner
            .templates
            .write()
            .insert(template.name.clone(), template);
    }

    /// Replaces the retry policy applied to every delivery.
    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        *self.inner.retry_policy.write() = policy;
    }

    /// Applies admission limits to one channel, resetting its buckets.
    pub fn set_rate_limit(&self, channel: impl Into<String>, limit: RateLimit) {
        self.inner
            .rate_limits
            .lock()
            .insert(channel.into(), ChannelRateLimiter::new(limit));
    }

    /// Enables aggregation with the given policy, clearing any buffered
    /// buckets from a previous policy.
    pub fn enable_aggregation(&self, policy: AggregationPolicy) {
        *self.inner.aggregation.lock() = Some(AggregationState {
            policy,
            buckets: HashMap::new(),
        });
    }

    /// Starts recording dispatches into a bounded in-memory history.
    pub fn enable_persistence(&self, limit: usize) {
        let mut history = self.inner.history.lock();

        if history.is_none() {
            *history = Some(Ring::new(limit));
        }
    }

    /// Instantiates a registered template.
    pub fn create_from_template(
        &self,
        name: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Notification, NotificationError> {
        let templates = self.inner.templates.read();
        let template = templates
            .get(name)
            .ok_or_else(|| NotificationError::UnknownTemplate(name.to_owned()))?;

        Ok(template.render(params))
    }

    /// Dispatches to every named channel, in parallel, returning one result
    /// per channel.
    pub async fn send(
        &self,
        notification: &Notification,
        channels: &[&str],
    ) -> Vec<DeliveryResult> {
        let policy = *self.inner.retry_policy.read();
        let deliveries = channels
            .iter()
            .map(|name| self.deliver_to_channel(notification, name, policy));
        let results = join_all(deliveries).await;

        self.record_history(notification, &results);

        results
    }

    /// Evaluates every route and dispatches to the union of the matching
    /// routes' channels (in route declaration order, deduplicated).
    pub async fn send_routed(&self, notification: &Notification) -> Vec<DeliveryResult> {
        let mut selected: Vec<String> = Vec::new();

        {
            let routes = self.inner.routes.read();

            for route in routes.iter() {
                if !route.matches(notification) {
                    continue;
                }

                for channel in route.channels() {
                    if !selected.contains(channel) {
                        selected.push(channel.clone());
                    }
                }
            }
        }

        let refs: Vec<&str> = selected.iter().map(String::as_str).collect();

        self.send(notification, &refs).await
    }

    /// Buffers the notification for aggregation, dispatching a combined
    /// notification when the bucket fills. Falls back to a direct
    /// [`send`](NotificationManager::send) when aggregation is disabled.
    pub async fn send_aggregated(
        &self,
        notification: &Notification,
        channels: &[&str],
    ) -> Vec<DeliveryResult> {
        let outcome = {
            let mut aggregation = self.inner.aggregation.lock();

            match aggregation.as_mut() {
                None => BufferOutcome::Direct,
                Some(state) => {
                    let key = state.policy.bucket_key(&notification.metadata);
                    let bucket =
                        state
                            .buckets
                            .entry(key.clone())
                            .or_insert_with(|| AggregationBucket {
                                notifications: Vec::new(),
                                channels: Vec::new(),
                                opened_at: Instant::now(),
                            });
                    let mut buffered = notification.clone();

                    buffered.status = NotificationStatus::Aggregated;
                    bucket.notifications.push(buffered);

                    for channel in channels {
                        if !bucket.channels.iter().any(|c| c == channel) {
                            bucket.channels.push((*channel).to_owned());
                        }
                    }

                    if bucket.notifications.len() >= state.policy.max_batch_size {
                        let bucket = state.buckets.remove(&key).expect("bucket just filled");

                        BufferOutcome::Flush(key, bucket)
                    } else {
                        BufferOutcome::Buffered
                    }
                }
            }
        };

        match outcome {
            BufferOutcome::Direct => self.send(notification, channels).await,
            BufferOutcome::Buffered => Vec::new(),
            BufferOutcome::Flush(key, bucket) => self.dispatch_bucket(&key, bucket).await,
        }
    }

    /// Flushes every aggregation bucket regardless of age or size.
    pub async fn flush_aggregated(&self) -> Vec<DeliveryResult> {
        let buckets: Vec<(String, AggregationBucket)> = {
            let mut aggregation = self.inner.aggregation.lock();

            match aggregation.as_mut() {
                None => Vec::new(),
                Some(state) => state.buckets.drain().collect(),
            }
        };
        let mut results = Vec::new();

        for (key, bucket) in buckets {
            results.extend(self.dispatch_bucket(&key, bucket).await);
        }

        results
    }

    /// Schedules a notification for dispatch after `delay`; returns an id
    /// usable with [`cancel_scheduled`](NotificationManager::cancel_scheduled).
    pub fn schedule(
        &self,
        notification: Notification,
        channels: &[&str],
        delay: Duration,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let mut notification = notification;

        notification.status = NotificationStatus::Scheduled;
        self.inner.scheduled.lock().push(ScheduledNotification {
            id,
            notification,
            channels: channels.iter().map(|c| (*c).to_owned()).collect(),
            due_at: Instant::now() + delay,
        });

        id
    }

    /// Cancels a scheduled notification; returns whether it was still
    /// pending.
    pub fn cancel_scheduled(&self, id: Uuid) -> bool {
        let mut scheduled = self.inner.scheduled.lock();
        let before = scheduled.len();

        scheduled.retain(|entry| entry.id != id);
        scheduled.len() != before
    }

    /// Number of notifications waiting for their dispatch time.
    pub fn scheduled_count(&self) -> usize {
        self.inner.scheduled.lock().len()
    }

    /// Dispatches every scheduled notification whose time has arrived and
    /// flushes aggregation buckets older than the configured window.
    pub async fn process_scheduled(&self) -> Vec<DeliveryResult> {
        let now = Instant::now();
        let due: Vec<ScheduledNotification> = {
            let mut scheduled = self.inner.scheduled.lock();
            let (due, waiting): (Vec<_>, Vec<_>) = scheduled
                .drain(..)
                .partition(|entry| entry.due_at <= now);

            *scheduled = waiting;
            due
        };
        let mut results = Vec::new();

        for entry in due {
            let mut notification = entry.notification;

            notification.status = NotificationStatus::Pending;

            let refs: Vec<&str> = entry.channels.iter().map(String::as_str).collect();

            results.extend(self.send(&notification, &refs).await);
        }

        let aged: Vec<(String, AggregationBucket)> = {
            let mut aggregation = self.inner.aggregation.lock();

            match aggregation.as_mut() {
                None => Vec::new(),
                Some(state) => {
                    let window = state.policy.window;
                    let expired: Vec<String> = state
                        .buckets
                        .iter()
                        .filter(|(_, bucket)| now.duration_since(bucket.opened_at) >= window)
                        .map(|(key, _)| key.clone())
                        .collect();

                    expired
                        .into_iter()
                        .filter_map(|key| state.buckets.remove(&key).map(|b| (key, b)))
                        .collect()
                }
            }
        };

        for (key, bucket) in aged {
            results.extend(self.dispatch_bucket(&key, bucket).await);
        }

        results
    }

    /// Spawns a tokio task calling
    /// [`process_scheduled`](NotificationManager::process_scheduled) every
    /// `interval` until aborted.
    pub fn spawn_scheduler(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                manager.process_scheduled().await;
            }
        })
    }

    /// The recorded delivery history, oldest first. Empty unless
    /// [`enable_persistence`](NotificationManager::enable_persistence) was
    /// called.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner
            .history
            .lock()
            .as_ref()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Serializes the delivery history to an opaque JSON value.
    pub fn save_history(&self) -> serde_json::Value {
        serde_json::to_value(self.history()).expect("history serialization is infallible")
    }

    /// Restores a delivery history saved by
    /// [`save_history`](NotificationManager::save_history), enabling
    /// persistence if needed.
    pub fn load_history(&self, value: serde_json::Value) -> Result<(), NotificationError> {
        let entries: Vec<HistoryEntry> =
            serde_json::from_value(value).map_err(NotificationError::MalformedHistory)?;
        let mut history = self.inner.history.lock();
        let ring = history.get_or_insert_with(|| Ring::new(DEFAULT_HISTORY_LIMIT));

        ring.clear();

        for entry in entries {
            ring.push(entry);
        }

        Ok(())
    }

    async fn deliver_to_channel(
        &self,
        notification: &Notification,
        name: &str,
        policy: RetryPolicy,
    ) -> DeliveryResult {
        let channel = {
            let channels = self.inner.channels.read();

            channels.get(name).cloned()
        };
        let Some(channel) = channel else {
            return DeliveryResult::failure(name, 0, format!("Unknown channel `{name}`"));
        };

        // Admission is checked-and-decremented atomically before the first
        // attempt; a denied send makes no channel call.
        {
            let mut limits = self.inner.rate_limits.lock();

            if let Some(limiter) = limits.get_mut(name) {
                if !limiter.try_acquire() {
                    return DeliveryResult::failure(name, 0, "Rate limit exceeded");
                }
            }
        }

        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match channel.send(notification).await {
                Ok(()) => return DeliveryResult::success(name, attempts),
                Err(error) => {
                    slog::debug!(self.inner.log.read(), "channel delivery failed";
                        "channel" => name, "attempt" => attempts, "error" => %error);

                    match policy.backoff_after(attempts) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            return DeliveryResult::failure(name, attempts, error.to_string());
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_bucket(
        &self,
        key: &str,
        bucket: AggregationBucket,
    ) -> Vec<DeliveryResult> {
        let count = bucket.notifications.len();
        let severity = bucket
            .notifications
            .iter()
            .map(|n| n.severity)
            .max()
            .unwrap_or(Severity::Info);
        let group = if key.is_empty() { "all" } else { key };
        let message = bucket
            .notifications
            .iter()
            .map(|n| n.message.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let combined = Notification::new(
            format!("{count} {} in {group}", severity.short_form()),
            message,
            severity,
        )
        .with_metadata("aggregated_count", count.to_string())
        .with_metadata("group_key", group);

        let refs: Vec<&str> = bucket.channels.iter().map(String::as_str).collect();

        self.send(&combined, &refs).await
    }

    fn record_history(&self, notification: &Notification, results: &[DeliveryResult]) {
        let mut history = self.inner.history.lock();
        let Some(ring) = history.as_mut() else {
            return;
        };
        let mut recorded = notification.clone();

        recorded.status = if results.iter().any(|r| r.success) {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };

        ring.push(HistoryEntry {
            notification: recorded,
            results: results.to_vec(),
        });
    }
}
