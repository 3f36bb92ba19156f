use aspects::notifications::{
    AggregationPolicy, Channel, Notification, NotificationManager, NotificationStatus, RateLimit,
    RetryPolicy, Route, Severity, Template,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A channel that fails its first `failures` sends, then succeeds,
/// recording everything it delivers. Clones share their state so tests can
/// keep a handle after registering the channel.
#[derive(Clone)]
struct FlakyChannel {
    name: String,
    inner: Arc<FlakyInner>,
}

struct FlakyInner {
    failures: AtomicUsize,
    delivered: Mutex<Vec<Notification>>,
}

impl FlakyChannel {
    fn new(name: &str, failures: usize) -> Self {
        Self {
            name: name.to_owned(),
            inner: Arc::new(FlakyInner {
                failures: AtomicUsize::new(failures),
                delivered: Mutex::new(Vec::new()),
            }),
        }
    }

    fn delivered(&self) -> Vec<Notification> {
        self.inner.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for FlakyChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> aspects::Result<()> {
        let remaining = self.inner.failures.load(Ordering::SeqCst);

        if remaining > 0 {
            self.inner.failures.store(remaining - 1, Ordering::SeqCst);

            return Err("transient failure".into());
        }

        self.inner.delivered.lock().unwrap().push(notification.clone());

        Ok(())
    }
}

fn notification() -> Notification {
    Notification::new("Disk almost full", "93% used", Severity::High)
}

#[tokio::test]
async fn retry_to_success_scenario() {
    let manager = NotificationManager::new();
    let channel = FlakyChannel::new("email", 2);

    manager.add_channel(channel.clone());
    manager.set_retry_policy(RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        multiplier: 2.0,
    });

    let results = manager.send(&notification(), &["email"]).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].attempts, 3);
    assert_eq!(channel.delivered().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_report_failure() {
    let manager = NotificationManager::new();

    manager.add_channel(FlakyChannel::new("email", 10));
    manager.set_retry_policy(RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        multiplier: 2.0,
    });

    let results = manager.send(&notification(), &["email"]).await;

    assert!(!results[0].success);
    assert_eq!(results[0].attempts, 3);
    assert!(results[0].error.as_ref().unwrap().contains("transient"));
}

#[tokio::test]
async fn one_broken_channel_never_stops_the_others() {
    let manager = NotificationManager::new();
    let good = FlakyChannel::new("good", 0);

    manager.add_channel(FlakyChannel::new("broken", 100));
    manager.add_channel(good.clone());
    manager.set_retry_policy(RetryPolicy::no_retry());

    let results = manager.send(&notification(), &["broken", "good"]).await;

    assert_eq!(results.len(), 2);
    assert!(!results.iter().find(|r| r.channel == "broken").unwrap().success);
    assert!(results.iter().find(|r| r.channel == "good").unwrap().success);
    assert_eq!(good.delivered().len(), 1);
}

#[tokio::test]
async fn rate_limit_denies_without_calling_the_channel() {
    let manager = NotificationManager::new();
    let channel = FlakyChannel::new("chat", 0);

    manager.add_channel(channel.clone());
    manager.set_rate_limit(
        "chat",
        RateLimit {
            max_per_minute: 2,
            max_per_hour: 100,
        },
    );

    let first = manager.send(&notification(), &["chat"]).await;
    let second = manager.send(&notification(), &["chat"]).await;
    let third = manager.send(&notification(), &["chat"]).await;

    assert!(first[0].success);
    assert!(second[0].success);
    assert!(!third[0].success);
    assert_eq!(third[0].attempts, 0);
    assert_eq!(third[0].error.as_deref(), Some("Rate limit exceeded"));
    assert_eq!(channel.delivered().len(), 2);
}

#[tokio::test]
async fn routing_selects_the_union_of_matching_routes() {
    let manager = NotificationManager::new();
    let email = FlakyChannel::new("email", 0);
    let pager = FlakyChannel::new("pager", 0);
    let chat = FlakyChannel::new("chat", 0);

    manager.add_channel(email.clone());
    manager.add_channel(pager.clone());
    manager.add_channel(chat.clone());
    manager.add_route(Route::new("critical-page", vec!["pager".into()], |n| {
        n.severity >= Severity::Critical
    }));
    manager.add_route(Route::new("all-email", vec!["email".into()], |_| true));
    manager.add_route(Route::new("chat-too", vec!["chat".into(), "email".into()], |n| {
        n.severity >= Severity::High
    }));

    let results = manager
        .send_routed(&Notification::new("down", "api is down", Severity::Critical))
        .await;
    let mut channels: Vec<&str> = results.iter().map(|r| r.channel.as_str()).collect();

    channels.sort();
    assert_eq!(channels, vec!["chat", "email", "pager"]);
    // Deduplicated: email appears in two routes but is delivered once.
    assert_eq!(email.delivered().len(), 1);

    let info_results = manager
        .send_routed(&Notification::new("fyi", "all good", Severity::Info))
        .await;

    assert_eq!(info_results.len(), 1);
    assert_eq!(info_results[0].channel, "email");
}

#[tokio::test]
async fn templates_fill_parameters() {
    let manager = NotificationManager::new();

    manager.add_template(Template::new(
        "disk-alert",
        "Disk {disk} almost full",
        "Disk {disk} on {host} is at {percent}%",
        Severity::Medium,
    ));

    let mut params = serde_json::Map::new();

    params.insert("disk".into(), serde_json::json!("/dev/sda1"));
    params.insert("host".into(), serde_json::json!("web-1"));
    params.insert("percent".into(), serde_json::json!(93));
    params.insert("severity".into(), serde_json::json!("high"));

    let built = manager.create_from_template("disk-alert", &params).unwrap();

    assert_eq!(built.title, "Disk /dev/sda1 almost full");
    assert_eq!(built.message, "Disk /dev/sda1 on web-1 is at 93%");
    assert_eq!(built.severity, Severity::High);

    assert!(manager.create_from_template("nope", &params).is_err());
}

#[tokio::test]
async fn aggregation_combines_by_group_key() {
    let manager = NotificationManager::new();
    let channel = FlakyChannel::new("digest", 0);

    manager.add_channel(channel.clone());
    manager.enable_aggregation(AggregationPolicy {
        window: Duration::from_secs(300),
        group_by: vec!["host".into()],
        max_batch_size: 3,
    });

    for i in 0..3 {
        let n = Notification::new("event", format!("line {i}"), Severity::Critical)
            .with_metadata("host", "db");
        let results = manager.send_aggregated(&n, &["digest"]).await;

        if i < 2 {
            assert!(results.is_empty());
        } else {
            assert_eq!(results.len(), 1);
            assert!(results[0].success);
        }
    }

    let delivered = channel.delivered();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].title, "3 critical in db");
    assert_eq!(delivered[0].message, "line 0\nline 1\nline 2");
    assert_eq!(delivered[0].severity, Severity::Critical);
}

#[tokio::test]
async fn aggregation_window_flushes_on_tick() {
    let manager = NotificationManager::new();
    let channel = FlakyChannel::new("digest", 0);

    manager.add_channel(channel.clone());
    manager.enable_aggregation(AggregationPolicy {
        window: Duration::from_millis(20),
        group_by: vec![],
        max_batch_size: 100,
    });

    let n = Notification::new("event", "only one", Severity::Info);

    assert!(manager.send_aggregated(&n, &["digest"]).await.is_empty());

    tokio::time::sleep(Duration::from_millis(40)).await;

    let results = manager.process_scheduled().await;

    assert_eq!(results.len(), 1);
    assert_eq!(channel.delivered()[0].title, "1 info in all");
}

#[tokio::test]
async fn scheduling_dispatches_when_due() {
    let manager = NotificationManager::new();
    let channel = FlakyChannel::new("email", 0);

    manager.add_channel(channel.clone());

    manager.schedule(notification(), &["email"], Duration::from_millis(30));

    // Too early: nothing goes out.
    assert!(manager.process_scheduled().await.is_empty());
    assert_eq!(manager.scheduled_count(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let results = manager.process_scheduled().await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(manager.scheduled_count(), 0);
    assert_eq!(channel.delivered().len(), 1);
}

#[tokio::test]
async fn history_records_final_statuses() {
    let manager = NotificationManager::new();

    manager.add_channel(FlakyChannel::new("good", 0));
    manager.add_channel(FlakyChannel::new("dead", 100));
    manager.set_retry_policy(RetryPolicy::no_retry());
    manager.enable_persistence(100);

    manager.send(&notification(), &["good"]).await;
    manager.send(&notification(), &["dead"]).await;

    let history = manager.history();

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].notification.status, NotificationStatus::Sent);
    assert_eq!(history[1].notification.status, NotificationStatus::Failed);

    // Histories round-trip through their opaque JSON form.
    let blob = manager.save_history();
    let restored = NotificationManager::new();

    restored.load_history(blob).unwrap();

    assert_eq!(restored.history().len(), 2);
}
