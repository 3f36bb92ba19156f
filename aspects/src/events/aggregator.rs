use super::{Event, EventBus, EventError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

type BatchHandler = Arc<dyn Fn(Vec<Event>) + Send + Sync>;

struct PatternBuffer {
    handler: BatchHandler,
    events: Vec<Event>,
    oldest_at: Option<Instant>,
}

struct AggregatorInner {
    max_batch_size: usize,
    max_wait: Duration,
    buffers: Mutex<HashMap<String, PatternBuffer>>,
}

impl AggregatorInner {
    /// Drains the buffer for `pattern` and returns the batch with its
    /// handler, so the handler can run outside the lock.
    fn take_batch(&self, pattern: &str) -> Option<(BatchHandler, Vec<Event>)> {
        let mut buffers = self.buffers.lock();
        let buffer = buffers.get_mut(pattern)?;

        if buffer.events.is_empty() {
            return None;
        }

        buffer.oldest_at = None;

        Some((
            Arc::clone(&buffer.handler),
            std::mem::take(&mut buffer.events),
        ))
    }

    fn due_patterns(&self, now: Instant) -> Vec<String> {
        self.buffers
            .lock()
            .iter()
            .filter(|(_, buffer)| {
                buffer
                    .oldest_at
                    .is_some_and(|oldest| now.duration_since(oldest) >= self.max_wait)
            })
            .map(|(pattern, _)| pattern.clone())
            .collect()
    }

    fn flush_due_at(&self, now: Instant) {
        for pattern in self.due_patterns(now) {
            if let Some((handler, batch)) = self.take_batch(&pattern) {
                handler(batch);
            }
        }
    }
}

/// Buffers matching events and delivers them in batches.
///
/// A batch for a pattern is flushed as soon as it reaches the configured
/// size; older-than-`max_wait` buffers are flushed by [`flush_due`]
/// (typically driven by [`spawn_flusher`]) or by an explicit [`flush`] /
/// [`flush_all`] call.
///
/// [`flush_due`]: EventAggregator::flush_due
/// [`spawn_flusher`]: EventAggregator::spawn_flusher
/// [`flush`]: EventAggregator::flush
/// [`flush_all`]: EventAggregator::flush_all
pub struct EventAggregator {
    inner: Arc<AggregatorInner>,
    bus: EventBus,
}

impl EventAggregator {
    /// Creates an aggregator over `bus` flushing at `max_batch_size` events
    /// or `max_wait` of buffer age, whichever comes first.
    pub fn new(bus: &EventBus, max_batch_size: usize, max_wait: Duration) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                max_batch_size: max_batch_size.max(1),
                max_wait,
                buffers: Mutex::new(HashMap::new()),
            }),
            bus: bus.clone(),
        }
    }

    /// Registers a batch receiver for events matching `pattern`.
    pub fn on_batch(
        &self,
        pattern: &str,
        handler: impl Fn(Vec<Event>) + Send + Sync + 'static,
    ) -> Result<(), EventError> {
        // Validate before touching any state; the later subscribe call
        // cannot fail for a pattern that parses here.
        super::Pattern::parse(pattern)?;

        {
            let mut buffers = self.inner.buffers.lock();

            buffers.insert(
                pattern.to_owned(),
                PatternBuffer {
                    handler: Arc::new(handler),
                    events: Vec::new(),
                    oldest_at: None,
                },
            );
        }

        let inner = Arc::clone(&self.inner);
        let key = pattern.to_owned();

        self.bus.subscribe(pattern, move |event| {
            let full = {
                let mut buffers = inner.buffers.lock();
                let Some(buffer) = buffers.get_mut(&key) else {
                    return Ok(());
                };

                if buffer.events.is_empty() {
                    buffer.oldest_at = Some(Instant::now());
                }

                buffer.events.push(event.clone());
                buffer.events.len() >= inner.max_batch_size
            };

            if full {
                if let Some((handler, batch)) = inner.take_batch(&key) {
                    handler(batch);
                }
            }

            Ok(())
        })?;

        Ok(())
    }

    /// Number of buffered events for `pattern`.
    pub fn pending(&self, pattern: &str) -> usize {
        self.inner
            .buffers
            .lock()
            .get(pattern)
            .map_or(0, |buffer| buffer.events.len())
    }

    /// Flushes the buffer for `pattern` regardless of size or age.
    pub fn flush(&self, pattern: &str) {
        if let Some((handler, batch)) = self.inner.take_batch(pattern) {
            handler(batch);
        }
    }

    /// Flushes every non-empty buffer.
    pub fn flush_all(&self) {
        let patterns: Vec<String> = self.inner.buffers.lock().keys().cloned().collect();

        for pattern in patterns {
            self.flush(&pattern);
        }
    }

    /// Flushes buffers whose oldest event has waited at least `max_wait`.
    pub fn flush_due(&self) {
        self.inner.flush_due_at(Instant::now());
    }

    /// Spawns a tokio task that calls [`flush_due`](EventAggregator::flush_due)
    /// every `interval`. The task holds only a weak reference and exits when
    /// the aggregator is dropped.
    pub fn spawn_flusher(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<AggregatorInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(inner) = weak.upgrade() else {
                    return;
                };

                inner.flush_due_at(Instant::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    fn batch_recorder() -> (Arc<PlMutex<Vec<usize>>>, impl Fn(Vec<Event>) + Send + Sync) {
        let batches: Arc<PlMutex<Vec<usize>>> = Arc::new(PlMutex::new(Vec::new()));
        let handler = {
            let batches = Arc::clone(&batches);

            move |batch: Vec<Event>| {
                batches.lock().push(batch.len());
            }
        };

        (batches, handler)
    }

    #[test]
    fn count_threshold_flushes_inline() {
        let bus = EventBus::new();
        let aggregator = EventAggregator::new(&bus, 3, Duration::from_secs(60));
        let (batches, handler) = batch_recorder();

        aggregator.on_batch("job.*", handler).unwrap();

        for i in 0..7 {
            bus.publish(&Event::new("job.done", json!(i)));
        }

        assert_eq!(*batches.lock(), vec![3, 3]);
        assert_eq!(aggregator.pending("job.*"), 1);
    }

    #[test]
    fn explicit_flush_delivers_partial_batches() {
        let bus = EventBus::new();
        let aggregator = EventAggregator::new(&bus, 10, Duration::from_secs(60));
        let (batches, handler) = batch_recorder();

        aggregator.on_batch("job.*", handler).unwrap();

        bus.publish(&Event::new("job.done", json!(null)));
        aggregator.flush_all();
        aggregator.flush_all();

        assert_eq!(*batches.lock(), vec![1]);
    }

    #[test]
    fn age_based_flush() {
        let bus = EventBus::new();
        let aggregator = EventAggregator::new(&bus, 10, Duration::from_millis(10));
        let (batches, handler) = batch_recorder();

        aggregator.on_batch("job.*", handler).unwrap();
        bus.publish(&Event::new("job.done", json!(null)));

        // Not yet due.
        aggregator.inner.flush_due_at(Instant::now());
        assert!(batches.lock().is_empty());

        std::thread::sleep(Duration::from_millis(15));
        aggregator.flush_due();

        assert_eq!(*batches.lock(), vec![1]);
    }

    #[test]
    fn non_matching_events_are_ignored() {
        let bus = EventBus::new();
        let aggregator = EventAggregator::new(&bus, 2, Duration::from_secs(60));
        let (batches, handler) = batch_recorder();

        aggregator.on_batch("job.*", handler).unwrap();
        bus.publish(&Event::new("other", json!(null)));

        assert_eq!(aggregator.pending("job.*"), 0);
        assert!(batches.lock().is_empty());
    }
}
