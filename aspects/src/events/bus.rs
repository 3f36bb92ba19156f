use super::{Event, EventError, Pattern};
use parking_lot::RwLock;
use slog::{o, Discard, Logger};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of one subscription, returned by the subscribe methods and
/// accepted by [`EventBus::unsubscribe`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(super) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

type Handler = Arc<dyn Fn(&Event) -> crate::Result<()> + Send + Sync>;
type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;
type Middleware = Arc<dyn Fn(&Event, &mut dyn FnMut(&Event)) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&Event, &crate::Error) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    pattern: Pattern,
    filter: Option<Filter>,
    priority: i32,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    subscriptions: Vec<Subscription>,
    middleware: Vec<Middleware>,
    error_handler: Option<ErrorHandler>,
}

struct BusInner {
    state: RwLock<BusState>,
    next_id: AtomicU64,
    log: RwLock<Logger>,
}

/// A synchronous in-process publish/subscribe bus.
///
/// `EventBus` values are cheap handles over shared state; cloning one (or
/// deriving a namespaced view with [`EventBus::namespace`]) addresses the
/// same subscriptions.
///
/// Dispatch for one [`publish`](EventBus::publish) call collects every
/// subscription whose pattern matches and whose filter admits the event,
/// orders them by descending priority (insertion order within equal
/// priorities), and runs them through the middleware chain. The
/// subscription table is snapshotted and internal locks are released before
/// any user code runs, so handlers may freely subscribe, unsubscribe or
/// publish again.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
    namespace: Option<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with no subscriptions.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: RwLock::new(BusState::default()),
                next_id: AtomicU64::new(0),
                log: RwLock::new(Logger::root(Discard, o!())),
            }),
            namespace: None,
        }
    }

    /// Replaces the logger used for dispatch diagnostics.
    pub fn set_logger(&self, logger: Logger) {
        *self.inner.log.write() = logger;
    }

    /// Subscribes a handler at the default priority (0).
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: impl Fn(&Event) -> crate::Result<()> + Send + Sync + 'static,
    ) -> Result<SubscriptionId, EventError> {
        self.subscribe_with_priority(pattern, 0, handler)
    }

    /// Subscribes a handler with an explicit priority. Higher priorities run
    /// first.
    pub fn subscribe_with_priority(
        &self,
        pattern: &str,
        priority: i32,
        handler: impl Fn(&Event) -> crate::Result<()> + Send + Sync + 'static,
    ) -> Result<SubscriptionId, EventError> {
        self.add_subscription(Pattern::parse(pattern)?, None, priority, Arc::new(handler))
    }

    /// Subscribes a handler to every event admitted by `filter`, regardless
    /// of type.
    pub fn subscribe_with_filter(
        &self,
        filter: impl Fn(&Event) -> bool + Send + Sync + 'static,
        handler: impl Fn(&Event) -> crate::Result<()> + Send + Sync + 'static,
    ) -> Result<SubscriptionId, EventError> {
        self.add_subscription(
            Pattern::parse("*").expect("`*` is a valid pattern"),
            Some(Arc::new(filter)),
            0,
            Arc::new(handler),
        )
    }

    fn add_subscription(
        &self,
        pattern: Pattern,
        filter: Option<Filter>,
        priority: i32,
        handler: Handler,
    ) -> Result<SubscriptionId, EventError> {
        let pattern = match &self.namespace {
            Some(prefix) => pattern.prefixed(prefix),
            None => pattern,
        };
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        self.inner.state.write().subscriptions.push(Subscription {
            id,
            pattern,
            filter,
            priority,
            handler,
        });

        Ok(id)
    }

    /// Removes a subscription. Unknown ids are silently ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .state
            .write()
            .subscriptions
            .retain(|s| s.id != id);
    }

    /// Number of live subscriptions on the underlying bus (including those
    /// made through other namespaced views).
    pub fn subscription_count(&self) -> usize {
        self.inner.state.read().subscriptions.len()
    }

    /// Appends a middleware to the dispatch chain.
    ///
    /// Each middleware receives the event and a `next` continuation that
    /// invokes the rest of the chain and, ultimately, the matched handlers.
    /// A middleware that does not call `next` halts dispatch.
    pub fn add_middleware(
        &self,
        middleware: impl Fn(&Event, &mut dyn FnMut(&Event)) + Send + Sync + 'static,
    ) {
        self.inner.state.write().middleware.push(Arc::new(middleware));
    }

    /// Installs the handler invoked with `(event, error)` when a
    /// subscription handler fails. Replaces any previous error handler.
    pub fn on_error(&self, handler: impl Fn(&Event, &crate::Error) + Send + Sync + 'static) {
        self.inner.state.write().error_handler = Some(Arc::new(handler));
    }

    /// Returns a lightweight view of this bus that prefixes `prefix.` onto
    /// event types on publish and onto patterns on subscribe.
    pub fn namespace(&self, prefix: &str) -> EventBus {
        let namespace = match &self.namespace {
            Some(existing) => format!("{existing}.{prefix}"),
            None => prefix.to_owned(),
        };

        EventBus {
            inner: Arc::clone(&self.inner),
            namespace: Some(namespace),
        }
    }

    /// Publishes an event to every matching subscription, synchronously.
    ///
    /// Handler errors are routed to the error handler and never propagate to
    /// the publisher.
    pub fn publish(&self, event: &Event) {
        let namespaced;
        let event = match &self.namespace {
            Some(prefix) => {
                namespaced = Event {
                    event_type: format!("{prefix}.{}", event.event_type),
                    ..event.clone()
                };

                &namespaced
            }
            None => event,
        };

        let (matched, middleware, error_handler) = {
            let state = self.inner.state.read();
            let mut matched: Vec<(i32, Handler)> = state
                .subscriptions
                .iter()
                .filter(|s| {
                    s.pattern.matches(&event.event_type)
                        && s.filter.as_ref().is_none_or(|f| f(event))
                })
                .map(|s| (s.priority, Arc::clone(&s.handler)))
                .collect();

            // Stable sort: insertion order is preserved within a priority.
            matched.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));

            (
                matched,
                state.middleware.clone(),
                state.error_handler.clone(),
            )
        };

        let log = self.inner.log.read().clone();
        let mut terminal = |event: &Event| {
            for (_, handler) in &matched {
                if let Err(error) = handler(event) {
                    slog::debug!(log, "event handler failed";
                        "event_type" => %event.event_type, "error" => %error);

                    if let Some(error_handler) = &error_handler {
                        error_handler(event, &error);
                    }
                }
            }
        };

        run_chain(&middleware, event, &mut terminal);
    }
}

fn run_chain(middleware: &[Middleware], event: &Event, terminal: &mut dyn FnMut(&Event)) {
    match middleware.split_first() {
        None => terminal(event),
        Some((current, rest)) => {
            current(event, &mut |next_event| {
                run_chain(rest, next_event, terminal)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl Fn(i32) -> Handler) {
        let record: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let record = Arc::clone(&record);

            move |tag: i32| -> Handler {
                let record = Arc::clone(&record);

                Arc::new(move |_: &Event| {
                    record.lock().unwrap().push(tag);
                    Ok(())
                })
            }
        };

        (record, make)
    }

    #[test]
    fn priority_order_is_descending_and_stable() {
        let bus = EventBus::new();
        let (record, make) = recorder();

        bus.add_subscription(Pattern::parse("t").unwrap(), None, 50, make(50))
            .unwrap();
        bus.add_subscription(Pattern::parse("t").unwrap(), None, 200, make(200))
            .unwrap();
        bus.add_subscription(Pattern::parse("t").unwrap(), None, 100, make(100))
            .unwrap();
        bus.add_subscription(Pattern::parse("t").unwrap(), None, 100, make(101))
            .unwrap();

        bus.publish(&Event::new("t", json!(null)));

        assert_eq!(*record.lock().unwrap(), vec![200, 100, 101, 50]);
    }

    #[test]
    fn filters_gate_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_handler = Arc::clone(&hits);

        bus.subscribe_with_filter(
            |event| event.data["level"] == "high",
            move |_| {
                hits_in_handler.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

        bus.publish(&Event::new("a", json!({"level": "low"})));
        bus.publish(&Event::new("b", json!({"level": "high"})));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_errors_reach_error_handler_and_spare_others() {
        let bus = EventBus::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(AtomicUsize::new(0));

        {
            let errors = Arc::clone(&errors);

            bus.on_error(move |_, _| {
                errors.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.subscribe_with_priority("t", 10, |_| Err("boom".into()))
            .unwrap();

        {
            let delivered = Arc::clone(&delivered);

            bus.subscribe(
                "t",
                move |_| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();
        }

        bus.publish(&Event::new("t", json!(null)));

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn middleware_can_halt_dispatch() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.add_middleware(|event, next| {
            if event.event_type != "blocked" {
                next(event);
            }
        });

        {
            let delivered = Arc::clone(&delivered);

            bus.subscribe("*", move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        bus.publish(&Event::new("blocked", json!(null)));
        bus.publish(&Event::new("allowed", json!(null)));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn middleware_chain_runs_outermost_first() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["outer", "inner"] {
            let order = Arc::clone(&order);

            bus.add_middleware(move |event, next| {
                order.lock().unwrap().push(format!("{tag}:enter"));
                next(event);
                order.lock().unwrap().push(format!("{tag}:exit"));
            });
        }

        bus.publish(&Event::new("t", json!(null)));

        assert_eq!(
            *order.lock().unwrap(),
            vec!["outer:enter", "inner:enter", "inner:exit", "outer:exit"]
        );
    }

    #[test]
    fn namespaced_views_prefix_types_and_patterns() {
        let bus = EventBus::new();
        let shop = bus.namespace("shop");
        let delivered = Arc::new(AtomicUsize::new(0));

        {
            let delivered = Arc::clone(&delivered);

            shop.subscribe("orders.*", move |event| {
                assert_eq!(event.event_type, "shop.orders.created");
                delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        shop.publish(&Event::new("orders.created", json!(null)));
        // The raw type on the root bus does not match the namespaced pattern.
        bus.publish(&Event::new("orders.created", json!(null)));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_unknown_id_is_a_no_op() {
        let bus = EventBus::new();
        let id = bus.subscribe("t", |_| Ok(())).unwrap();

        bus.unsubscribe(id);
        bus.unsubscribe(id);

        assert_eq!(bus.subscription_count(), 0);
    }
}
