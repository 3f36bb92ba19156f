use super::{Event, EventBus, EventError, Pattern, SubscriptionId};
use crate::util::Ring;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Default bound on the number of retained events.
pub const DEFAULT_STORE_CAPACITY: usize = 10_000;

/// Priority of the recording subscription. The store observes events after
/// every application subscriber has run.
const RECORD_PRIORITY: i32 = i32::MIN;

struct StoreInner {
    events: Mutex<Ring<Event>>,
    recording: AtomicBool,
}

/// A bounded append-only log of events observed on a bus.
///
/// Attaching a store subscribes it to every event at the lowest possible
/// priority; once the ring is full the oldest events are dropped. The store
/// holds a handle to the bus it watches (for [`replay`](EventStore::replay)),
/// never the other way around.
pub struct EventStore {
    inner: Arc<StoreInner>,
    bus: EventBus,
    subscription: SubscriptionId,
}

impl EventStore {
    /// Attaches a store with the [default capacity](DEFAULT_STORE_CAPACITY)
    /// to a bus.
    pub fn attach(bus: &EventBus) -> Self {
        Self::attach_with_capacity(bus, DEFAULT_STORE_CAPACITY)
    }

    /// Attaches a store retaining at most `max_events` events.
    pub fn attach_with_capacity(bus: &EventBus, max_events: usize) -> Self {
        let inner = Arc::new(StoreInner {
            events: Mutex::new(Ring::new(max_events)),
            recording: AtomicBool::new(true),
        });
        let recorder = Arc::clone(&inner);
        let subscription = bus
            .subscribe_with_priority("*", RECORD_PRIORITY, move |event| {
                if recorder.recording.load(Ordering::Acquire) {
                    recorder.events.lock().push(event.clone());
                }

                Ok(())
            })
            .expect("`*` is a valid pattern");

        Self {
            inner,
            bus: bus.clone(),
            subscription,
        }
    }

    /// Unsubscribes from the bus, keeping recorded events queryable.
    pub fn detach(&self) {
        self.bus.unsubscribe(self.subscription);
    }

    /// Records an event directly, bypassing the bus.
    pub fn record(&self, event: Event) {
        self.inner.events.lock().push(event);
    }

    /// All retained events, oldest first.
    pub fn all(&self) -> Vec<Event> {
        self.inner.events.lock().iter().cloned().collect()
    }

    /// Retained events whose type matches `pattern`, oldest first.
    pub fn by_pattern(&self, pattern: &str) -> Result<Vec<Event>, EventError> {
        let pattern = Pattern::parse(pattern)?;

        Ok(self
            .inner
            .events
            .lock()
            .iter()
            .filter(|e| pattern.matches(&e.event_type))
            .cloned()
            .collect())
    }

    /// Retained events with exactly the given type, oldest first.
    pub fn by_type(&self, event_type: &str) -> Vec<Event> {
        self.inner
            .events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Retained events with `from <= timestamp <= to`, oldest first.
    pub fn by_time_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Event> {
        self.inner
            .events
            .lock()
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect()
    }

    /// The retained event with the given id, if any.
    pub fn by_id(&self, id: Uuid) -> Option<Event> {
        self.inner.events.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.inner.events.lock().len()
    }

    /// Whether no events are retained.
    pub fn is_empty(&self) -> bool {
        self.inner.events.lock().is_empty()
    }

    /// Drops all retained events.
    pub fn clear(&self) {
        self.inner.events.lock().clear();
    }

    /// Re-publishes retained events onto the connected bus in their original
    /// order. With a pattern, only matching events are replayed.
    ///
    /// Recording is paused for the duration so the replay does not append
    /// its own events back into the store.
    pub fn replay(&self, pattern: Option<&str>) -> Result<usize, EventError> {
        let pattern = pattern.map(Pattern::parse).transpose()?;
        let to_replay: Vec<Event> = {
            let events = self.inner.events.lock();

            events
                .iter()
                .filter(|e| {
                    pattern
                        .as_ref()
                        .is_none_or(|p| p.matches(&e.event_type))
                })
                .cloned()
                .collect()
        };

        self.inner.recording.store(false, Ordering::Release);

        for event in &to_replay {
            self.bus.publish(event);
        }

        self.inner.recording.store(true, Ordering::Release);

        Ok(to_replay.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn records_published_events_in_order() {
        let bus = EventBus::new();
        let store = EventStore::attach(&bus);

        bus.publish(&Event::new("a.one", json!(1)));
        bus.publish(&Event::new("b.two", json!(2)));
        bus.publish(&Event::new("a.three", json!(3)));

        assert_eq!(store.len(), 3);
        assert_eq!(
            store
                .by_pattern("a.*")
                .unwrap()
                .iter()
                .map(|e| e.event_type.as_str())
                .collect::<Vec<_>>(),
            vec!["a.one", "a.three"]
        );
    }

    #[test]
    fn capacity_bounds_retention() {
        let bus = EventBus::new();
        let store = EventStore::attach_with_capacity(&bus, 2);

        for i in 0..5 {
            bus.publish(&Event::new(format!("e.{i}"), json!(null)));
        }

        assert_eq!(store.len(), 2);
        assert_eq!(store.all()[0].event_type, "e.3");
    }

    #[test]
    fn lookup_by_id_and_time_range() {
        let bus = EventBus::new();
        let store = EventStore::attach(&bus);
        let event = Event::new("x", json!(null));

        bus.publish(&event);

        assert_eq!(store.by_id(event.id).unwrap().id, event.id);
        assert!(store.by_id(Uuid::new_v4()).is_none());

        let hits = store.by_time_range(
            event.timestamp - chrono::Duration::seconds(1),
            event.timestamp + chrono::Duration::seconds(1),
        );

        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn replay_republishes_without_rerecording() {
        let bus = EventBus::new();
        let store = EventStore::attach(&bus);
        let seen = Arc::new(AtomicUsize::new(0));

        {
            let seen = Arc::clone(&seen);

            bus.subscribe("*", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        bus.publish(&Event::new("a", json!(null)));
        bus.publish(&Event::new("b", json!(null)));

        let replayed = store.replay(Some("a")).unwrap();

        assert_eq!(replayed, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn detach_stops_recording() {
        let bus = EventBus::new();
        let store = EventStore::attach(&bus);

        bus.publish(&Event::new("a", json!(null)));
        store.detach();
        bus.publish(&Event::new("b", json!(null)));

        assert_eq!(store.len(), 1);
    }
}
