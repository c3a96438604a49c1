//! Event bus — ordered, at-least-once delivery with durable cursors.
//!
//! The bus assigns every published event a per-source monotonically
//! increasing sequence number and fans it out to each subscriber's queue.
//! Subscribers acknowledge processed events; the cursor (last acknowledged
//! sequence per source) is persisted through the [`CursorStore`] port so a
//! restarted subscriber replays retained events above its cursor before
//! going live. Duplicate delivery is possible by design — consumers
//! deduplicate on `(source, sequence)`.
//!
//! Backpressure: per-subscriber queues are bounded. When a queue is full,
//! incoming low-priority events (routine telemetry) are dropped with a
//! logged warning; high-priority events (security, geofence, timers) evict
//! a queued low-priority event instead and are themselves never dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use nido_domain::error::NidoError;
use nido_domain::event::{Event, EventPayload, EventPriority, EventSource, EventType};
use nido_domain::time::now;

use crate::ports::event_bus::EventPublisher;
use crate::ports::storage::CursorStore;

/// Tunables for the bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// How many events the bus retains for replay after restart or
    /// resubscription.
    pub retention: usize,
    /// Per-subscriber queue bound; the low-priority drop threshold.
    pub queue_bound: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            retention: 1024,
            queue_bound: 256,
        }
    }
}

struct SubscriberState {
    name: String,
    event_types: Vec<EventType>,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    queue_bound: usize,
    dropped: AtomicU64,
}

impl SubscriberState {
    fn wants(&self, event_type: EventType) -> bool {
        self.event_types.contains(&event_type)
    }

    /// Enqueue respecting the backpressure policy. High-priority events
    /// are never dropped; they evict the oldest queued low-priority event
    /// when the queue is full.
    fn offer(&self, event: Event) {
        let mut queue = self.queue.lock().expect("subscriber queue poisoned");
        if queue.len() >= self.queue_bound {
            if event.priority() == EventPriority::Low {
                drop(queue);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subscriber = %self.name,
                    event_type = %event.event_type(),
                    source = %event.source.key(),
                    "queue full, dropping low-priority event"
                );
                return;
            }
            if let Some(pos) = queue
                .iter()
                .position(|queued| queued.priority() == EventPriority::Low)
            {
                let evicted = queue.remove(pos);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(evicted) = evicted {
                    tracing::warn!(
                        subscriber = %self.name,
                        event_type = %evicted.event_type(),
                        "queue full, evicting low-priority event for a high-priority one"
                    );
                }
            }
            queue.push_back(event);
        } else {
            queue.push_back(event);
        }
        drop(queue);
        self.notify.notify_one();
    }
}

/// In-process event bus with durable subscriber cursors.
pub struct EventBus<C> {
    config: BusConfig,
    store: Arc<C>,
    sequences: Mutex<HashMap<String, u64>>,
    log: Mutex<VecDeque<Event>>,
    subscribers: Mutex<Vec<Arc<SubscriberState>>>,
}

impl<C: CursorStore> EventBus<C> {
    /// Create a new bus backed by the given cursor store.
    pub fn new(config: BusConfig, store: Arc<C>) -> Self {
        Self {
            config,
            store,
            sequences: Mutex::new(HashMap::new()),
            log: Mutex::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to a set of event types under a durable name.
    ///
    /// The subscriber's cursor is loaded from the store; retained events
    /// above the cursor are replayed into the queue before live delivery
    /// begins, giving at-least-once semantics across restarts.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the cursor store fails to load.
    pub async fn subscribe(
        &self,
        name: &str,
        event_types: Vec<EventType>,
    ) -> Result<Subscription<C>, NidoError> {
        let cursors = self.store.load(name).await?;
        // After a restart the in-memory counters start at zero; bump them
        // above the restored cursors so fresh publishes keep sequence
        // numbers strictly increasing per source.
        {
            let mut sequences = self.sequences.lock().expect("bus sequences poisoned");
            for (source, cursor) in &cursors {
                let counter = sequences.entry(source.clone()).or_insert(0);
                if *counter < *cursor {
                    *counter = *cursor;
                }
            }
        }
        let state = Arc::new(SubscriberState {
            name: name.to_string(),
            event_types,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            queue_bound: self.config.queue_bound,
            dropped: AtomicU64::new(0),
        });

        {
            let log = self.log.lock().expect("bus log poisoned");
            let mut queue = state.queue.lock().expect("subscriber queue poisoned");
            for event in log.iter() {
                if !state.wants(event.event_type()) {
                    continue;
                }
                let cursor = cursors.get(&event.source.key()).copied().unwrap_or(0);
                if event.sequence > cursor {
                    queue.push_back(event.clone());
                }
            }
            if !queue.is_empty() {
                tracing::info!(
                    subscriber = name,
                    replayed = queue.len(),
                    "replaying retained events above cursor"
                );
            }
        }
        state.notify.notify_one();

        self.subscribers
            .lock()
            .expect("bus subscribers poisoned")
            .push(state.clone());

        Ok(Subscription {
            state,
            cursors: Mutex::new(cursors),
            store: self.store.clone(),
        })
    }

    fn next_sequence(&self, source: &EventSource) -> u64 {
        let mut sequences = self.sequences.lock().expect("bus sequences poisoned");
        let counter = sequences.entry(source.key()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn fan_out(&self, event: &Event) {
        {
            let mut log = self.log.lock().expect("bus log poisoned");
            log.push_back(event.clone());
            while log.len() > self.config.retention {
                log.pop_front();
            }
        }
        let subscribers = self.subscribers.lock().expect("bus subscribers poisoned");
        for subscriber in subscribers.iter() {
            if subscriber.wants(event.event_type()) {
                subscriber.offer(event.clone());
            }
        }
    }
}

impl<C: CursorStore> EventPublisher for EventBus<C> {
    fn publish(
        &self,
        payload: EventPayload,
        source: EventSource,
    ) -> impl Future<Output = Result<Event, NidoError>> + Send {
        let mut event = Event::new(payload, source, now());
        event.sequence = self.next_sequence(&event.source);
        tracing::trace!(
            event_type = %event.event_type(),
            source = %event.source.key(),
            sequence = event.sequence,
            "publishing event"
        );
        self.fan_out(&event);
        async move { Ok(event) }
    }
}

use std::future::Future;

/// A named, durable subscription to the bus.
///
/// `next` yields events in per-source sequence order (as published);
/// `ack` persists the cursor. The subscription can be shared across
/// worker tasks.
pub struct Subscription<C> {
    state: Arc<SubscriberState>,
    cursors: Mutex<HashMap<String, u64>>,
    store: Arc<C>,
}

impl<C: CursorStore> Subscription<C> {
    /// The durable subscriber name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Await the next event. The returned sequence is infinite until the
    /// subscription is dropped.
    pub async fn next(&self) -> Event {
        loop {
            if let Some(event) = self
                .state
                .queue
                .lock()
                .expect("subscriber queue poisoned")
                .pop_front()
            {
                return event;
            }
            self.state.notify.notified().await;
        }
    }

    /// Pop the next event without waiting.
    #[must_use]
    pub fn try_next(&self) -> Option<Event> {
        self.state
            .queue
            .lock()
            .expect("subscriber queue poisoned")
            .pop_front()
    }

    /// Acknowledge an event, persisting the cursor for its source.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the cursor store fails to persist.
    pub async fn ack(&self, event: &Event) -> Result<(), NidoError> {
        let source = event.source.key();
        {
            let mut cursors = self.cursors.lock().expect("subscription cursors poisoned");
            let cursor = cursors.entry(source.clone()).or_insert(0);
            if event.sequence <= *cursor {
                return Ok(());
            }
            *cursor = event.sequence;
        }
        self.store.store(&self.state.name, &source, event.sequence).await
    }

    /// How many events this subscriber has dropped under backpressure.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nido_domain::device::{AttributeValue, Capability};
    use nido_domain::id::{DeviceId, RuleId};
    use std::collections::HashMap as StdHashMap;

    // ── In-memory cursor store ─────────────────────────────────────

    #[derive(Default)]
    struct InMemoryCursorStore {
        cursors: Mutex<StdHashMap<String, StdHashMap<String, u64>>>,
    }

    impl CursorStore for InMemoryCursorStore {
        fn load(
            &self,
            subscriber: &str,
        ) -> impl Future<Output = Result<StdHashMap<String, u64>, NidoError>> + Send {
            let result = self
                .cursors
                .lock()
                .unwrap()
                .get(subscriber)
                .cloned()
                .unwrap_or_default();
            async { Ok(result) }
        }

        fn store(
            &self,
            subscriber: &str,
            source: &str,
            sequence: u64,
        ) -> impl Future<Output = Result<(), NidoError>> + Send {
            self.cursors
                .lock()
                .unwrap()
                .entry(subscriber.to_string())
                .or_default()
                .insert(source.to_string(), sequence);
            async { Ok(()) }
        }
    }

    fn bus() -> EventBus<InMemoryCursorStore> {
        EventBus::new(BusConfig::default(), Arc::new(InMemoryCursorStore::default()))
    }

    fn bus_with(config: BusConfig, store: Arc<InMemoryCursorStore>) -> EventBus<InMemoryCursorStore> {
        EventBus::new(config, store)
    }

    fn telemetry(device: &str, value: f64) -> (EventPayload, EventSource) {
        (
            EventPayload::TelemetryChanged {
                device: DeviceId::from(device),
                changes: StdHashMap::from([(
                    Capability::Temperature,
                    AttributeValue::Float(value),
                )]),
            },
            EventSource::Device {
                device: DeviceId::from(device),
            },
        )
    }

    fn lock_telemetry(device: &str) -> (EventPayload, EventSource) {
        (
            EventPayload::TelemetryChanged {
                device: DeviceId::from(device),
                changes: StdHashMap::from([(
                    Capability::LockState,
                    AttributeValue::String("locked".into()),
                )]),
            },
            EventSource::Device {
                device: DeviceId::from(device),
            },
        )
    }

    #[tokio::test]
    async fn should_deliver_event_to_subscriber() {
        let bus = bus();
        let sub = bus
            .subscribe("engine", vec![EventType::TelemetryChanged])
            .await
            .unwrap();

        let (payload, source) = telemetry("sensor-1", 20.0);
        let published = bus.publish(payload, source).await.unwrap();

        let received = sub.next().await;
        assert_eq!(received, published);
    }

    #[tokio::test]
    async fn should_assign_increasing_sequence_numbers_per_source() {
        let bus = bus();
        let (p1, s1) = telemetry("sensor-1", 20.0);
        let (p2, s2) = telemetry("sensor-1", 21.0);
        let (p3, s3) = telemetry("sensor-2", 22.0);

        let e1 = bus.publish(p1, s1).await.unwrap();
        let e2 = bus.publish(p2, s2).await.unwrap();
        let e3 = bus.publish(p3, s3).await.unwrap();

        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
        // Independent source restarts its own counter.
        assert_eq!(e3.sequence, 1);
    }

    #[tokio::test]
    async fn should_deliver_in_sequence_order_per_source() {
        let bus = bus();
        let sub = bus
            .subscribe("engine", vec![EventType::TelemetryChanged])
            .await
            .unwrap();

        for i in 0..10 {
            let (payload, source) = telemetry("sensor-1", f64::from(i));
            bus.publish(payload, source).await.unwrap();
        }

        let mut last = 0;
        for _ in 0..10 {
            let event = sub.next().await;
            assert!(event.sequence > last);
            last = event.sequence;
        }
    }

    #[tokio::test]
    async fn should_not_deliver_unsubscribed_event_types() {
        let bus = bus();
        let sub = bus
            .subscribe("engine", vec![EventType::TimerFired])
            .await
            .unwrap();

        let (payload, source) = telemetry("sensor-1", 20.0);
        bus.publish(payload, source).await.unwrap();
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn should_resume_from_acked_cursor_after_restart() {
        let store = Arc::new(InMemoryCursorStore::default());
        let bus = bus_with(BusConfig::default(), store.clone());

        let sub = bus
            .subscribe("engine", vec![EventType::TelemetryChanged])
            .await
            .unwrap();
        let (p1, s1) = telemetry("sensor-1", 20.0);
        let (p2, s2) = telemetry("sensor-1", 21.0);
        bus.publish(p1, s1).await.unwrap();
        let second = bus.publish(p2, s2).await.unwrap();

        let first = sub.next().await;
        sub.ack(&first).await.unwrap();
        drop(sub);

        // A "restarted" subscriber replays only what was not acknowledged.
        let resumed = bus
            .subscribe("engine", vec![EventType::TelemetryChanged])
            .await
            .unwrap();
        let replayed = resumed.next().await;
        assert_eq!(replayed, second);
        assert!(resumed.try_next().is_none());
    }

    #[tokio::test]
    async fn should_tolerate_duplicate_ack() {
        let bus = bus();
        let sub = bus
            .subscribe("engine", vec![EventType::TelemetryChanged])
            .await
            .unwrap();
        let (payload, source) = telemetry("sensor-1", 20.0);
        bus.publish(payload, source).await.unwrap();
        let event = sub.next().await;
        sub.ack(&event).await.unwrap();
        sub.ack(&event).await.unwrap();
    }

    #[tokio::test]
    async fn should_drop_low_priority_events_when_queue_full() {
        let config = BusConfig {
            retention: 1024,
            queue_bound: 2,
        };
        let bus = bus_with(config, Arc::new(InMemoryCursorStore::default()));
        let sub = bus
            .subscribe("engine", vec![EventType::TelemetryChanged])
            .await
            .unwrap();

        for i in 0..5 {
            let (payload, source) = telemetry("sensor-1", f64::from(i));
            bus.publish(payload, source).await.unwrap();
        }

        assert_eq!(sub.dropped(), 3);
    }

    #[tokio::test]
    async fn should_never_drop_high_priority_events() {
        let config = BusConfig {
            retention: 1024,
            queue_bound: 2,
        };
        let bus = bus_with(config, Arc::new(InMemoryCursorStore::default()));
        let sub = bus
            .subscribe("engine", vec![EventType::TelemetryChanged])
            .await
            .unwrap();

        // Fill the queue with routine telemetry, then storm lock events.
        for i in 0..2 {
            let (payload, source) = telemetry("sensor-1", f64::from(i));
            bus.publish(payload, source).await.unwrap();
        }
        for _ in 0..3 {
            let (payload, source) = lock_telemetry("lock-1");
            bus.publish(payload, source).await.unwrap();
        }

        let mut high = 0;
        while let Some(event) = sub.try_next() {
            if event.priority() == EventPriority::High {
                high += 1;
            }
        }
        assert_eq!(high, 3);
    }

    #[tokio::test]
    async fn should_continue_sequences_above_restored_cursor() {
        // Simulates a restart: a fresh bus (empty log, zeroed counters)
        // over a cursor store that already saw sequence 2.
        let store = Arc::new(InMemoryCursorStore::default());
        store.store("engine", "device:sensor-1", 2).await.unwrap();
        let bus = bus_with(BusConfig::default(), store);

        let sub = bus
            .subscribe("engine", vec![EventType::TelemetryChanged])
            .await
            .unwrap();
        let (payload, source) = telemetry("sensor-1", 20.0);
        let published = bus.publish(payload, source).await.unwrap();

        assert_eq!(published.sequence, 3);
        assert_eq!(sub.next().await, published);
    }

    #[tokio::test]
    async fn should_publish_timer_event_with_scheduler_source() {
        let bus = bus();
        let sub = bus
            .subscribe("engine", vec![EventType::TimerFired])
            .await
            .unwrap();
        let rule = RuleId::new();
        bus.publish(EventPayload::TimerFired { rule }, EventSource::Scheduler)
            .await
            .unwrap();
        let event = sub.next().await;
        assert_eq!(event.source, EventSource::Scheduler);
        assert!(matches!(event.payload, EventPayload::TimerFired { rule: r } if r == rule));
    }
}
