use super::{Event, EventError, Pattern, SubscriptionId};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type AsyncHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, crate::Result<()>> + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&Event, &crate::Error) + Send + Sync>;

struct AsyncSubscription {
    id: SubscriptionId,
    pattern: Pattern,
    priority: i32,
    handler: AsyncHandler,
}

/// An event bus driving async handlers.
///
/// Matching and ordering follow [`EventBus`](super::EventBus): for one
/// [`publish`](AsyncEventBus::publish) call, handlers run in descending
/// priority order, each awaited to completion before the next starts.
/// Handler errors are routed to the error handler and never surface to the
/// publisher.
#[derive(Clone, Default)]
pub struct AsyncEventBus {
    inner: Arc<AsyncBusInner>,
}

#[derive(Default)]
struct AsyncBusInner {
    subscriptions: RwLock<Vec<AsyncSubscription>>,
    error_handler: RwLock<Option<ErrorHandler>>,
    next_id: AtomicU64,
}

impl AsyncEventBus {
    /// Creates a bus with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes an async handler at the default priority (0).
    pub fn subscribe<F, Fut>(&self, pattern: &str, handler: F) -> Result<SubscriptionId, EventError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        self.subscribe_with_priority(pattern, 0, handler)
    }

    /// Subscribes an async handler with an explicit priority. Higher
    /// priorities run first.
    pub fn subscribe_with_priority<F, Fut>(
        &self,
        pattern: &str,
        priority: i32,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        let pattern = Pattern::parse(pattern)?;
        let id = SubscriptionId::from_raw(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: AsyncHandler = Arc::new(move |event| Box::pin(handler(event)));

        self.inner.subscriptions.write().push(AsyncSubscription {
            id,
            pattern,
            priority,
            handler,
        });

        Ok(id)
    }

    /// Removes a subscription. Unknown ids are silently ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscriptions.write().retain(|s| s.id != id);
    }

    /// Installs the handler invoked when a subscription handler fails.
    pub fn on_error(&self, handler: impl Fn(&Event, &crate::Error) + Send + Sync + 'static) {
        *self.inner.error_handler.write() = Some(Arc::new(handler));
    }

    /// Publishes an event, awaiting every matching handler in priority
    /// order.
    pub async fn publish(&self, event: &Event) {
        let matched = {
            let subscriptions = self.inner.subscriptions.read();
            let mut matched: Vec<(i32, AsyncHandler)> = subscriptions
                .iter()
                .filter(|s| s.pattern.matches(&event.event_type))
                .map(|s| (s.priority, Arc::clone(&s.handler)))
                .collect();

            matched.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
            matched
        };

        let error_handler = self.inner.error_handler.read().clone();

        for (_, handler) in matched {
            if let Err(error) = handler(event.clone()).await {
                if let Some(error_handler) = &error_handler {
                    error_handler(event, &error);
                }
            }
        }
    }
}
