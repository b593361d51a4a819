//! Partitioned in-process event bus.
//!
//! Events are routed to one of N bounded worker queues by hashing the
//! entity identifier, so all events for one identifier are delivered in
//! publication order while unrelated entities fan out in parallel. Each
//! worker invokes every registered subscriber once per event, in arrival
//! order. A subscriber that exceeds the delivery timeout has that event
//! dropped and logged; a stuck subscriber cannot halt the bus.
//!
//! `publish` never blocks: when the target partition's buffer is full the
//! call fails with `EventBusSaturated` and the caller decides whether to
//! drop-log or back off.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::config::EventBusConfig;
use crate::core::error::{TitanError, TitanResult};
use crate::events::schema::AnyEvent;

/// A bus subscriber. Handlers observe every published event once, in
/// arrival order per subscriber, and are expected to be cooperative with
/// respect to the delivery timeout.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &AnyEvent);

    /// Name used in logs when delivery is dropped.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Counters for bus activity.
#[derive(Debug, Default)]
pub struct BusStats {
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub dropped_on_timeout: AtomicU64,
    pub rejected_saturated: AtomicU64,
}

struct Partition {
    sender: mpsc::Sender<AnyEvent>,
}

/// In-process event bus with bounded partitioned buffers.
pub struct InMemoryEventBus {
    partitions: Vec<Partition>,
    receivers: Mutex<Vec<mpsc::Receiver<AnyEvent>>>,
    subscribers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    subscriber_timeout: Duration,
    stats: Arc<BusStats>,
}

impl InMemoryEventBus {
    pub fn new(config: &EventBusConfig) -> Self {
        let partition_count = config.partitions.max(1);
        let per_partition = (config.capacity / partition_count).max(1);

        let mut partitions = Vec::with_capacity(partition_count);
        let mut receivers = Vec::with_capacity(partition_count);
        for _ in 0..partition_count {
            let (tx, rx) = mpsc::channel(per_partition);
            partitions.push(Partition { sender: tx });
            receivers.push(rx);
        }

        let (shutdown, _) = watch::channel(false);
        Self {
            partitions,
            receivers: Mutex::new(receivers),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            pending: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            shutdown,
            subscriber_timeout: Duration::from_millis(config.subscriber_timeout_ms),
            stats: Arc::new(BusStats::default()),
        }
    }

    /// Register a subscriber. Events published afterwards are delivered to
    /// it in arrival order.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        tracing::info!(handler = handler.name(), "event bus subscriber registered");
        self.subscribers.write().push(handler);
    }

    /// Enqueue an event without blocking. Fails with `EventBusSaturated`
    /// when the target partition's buffer is full.
    pub fn publish(&self, event: AnyEvent) -> TitanResult<()> {
        let index = Self::partition_index(event.partition_key(), self.partitions.len());
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.partitions[index].sender.try_send(event) {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.settle_one();
                self.stats.rejected_saturated.fetch_add(1, Ordering::Relaxed);
                Err(TitanError::EventBusSaturated)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.settle_one();
                Err(TitanError::Internal("event bus is stopped".to_string()))
            }
        }
    }

    fn partition_index(key: &str, partitions: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % partitions
    }

    fn settle_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Spawn the partition workers. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let receivers: Vec<mpsc::Receiver<AnyEvent>> =
            self.receivers.lock().drain(..).collect();
        let mut workers = self.workers.lock();

        for (index, mut rx) in receivers.into_iter().enumerate() {
            let subscribers = Arc::clone(&self.subscribers);
            let pending = Arc::clone(&self.pending);
            let drained = Arc::clone(&self.drained);
            let stats = Arc::clone(&self.stats);
            let timeout = self.subscriber_timeout;
            let mut shutdown = self.shutdown.subscribe();

            workers.push(tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                        event = rx.recv() => match event {
                            Some(event) => event,
                            None => break,
                        },
                    };

                    let handlers: Vec<Arc<dyn EventHandler>> =
                        subscribers.read().iter().cloned().collect();
                    for handler in handlers {
                        match tokio::time::timeout(timeout, handler.handle(&event)).await {
                            Ok(()) => {
                                stats.delivered.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(_) => {
                                stats.dropped_on_timeout.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(
                                    handler = handler.name(),
                                    partition = index,
                                    event_id = %event.event_id(),
                                    "subscriber exceeded delivery timeout, event dropped for it"
                                );
                            }
                        }
                    }

                    if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                        drained.notify_waiters();
                    }
                }
            }));
        }

        tracing::info!(partitions = self.partitions.len(), "event bus started");
    }

    /// Wait until every queued event has been observed by every registered
    /// subscriber.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop the workers, cancelling in-flight delivery. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            worker.abort();
            let _ = worker.await;
        }
        tracing::info!("event bus stopped");
    }

    /// Number of events accepted but not yet fully delivered.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::encode_id;
    use crate::core::model::EntityKind;
    use crate::events::schema::{EntityEvent, EventType};
    use chrono::Utc;
    use parking_lot::Mutex as PlMutex;
    use uuid::Uuid;

    fn sample_event(identifier: &str, event_type: EventType) -> AnyEvent {
        AnyEvent::from_entity(EntityEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            kind: EntityKind::Aas,
            identifier: identifier.to_string(),
            identifier_b64: encode_id(identifier),
            doc_bytes: Some(Arc::new(b"{}".to_vec())),
            etag: Some("e".repeat(64)),
            semantic_id: None,
        })
    }

    struct Recorder {
        seen: PlMutex<Vec<(String, EventType)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: PlMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &AnyEvent) {
            self.seen.lock().push((
                event.identifier().to_string(),
                event.event_type().unwrap(),
            ));
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn bus_config(capacity: usize) -> EventBusConfig {
        EventBusConfig {
            capacity,
            partitions: 4,
            subscriber_timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn test_publish_before_start_is_buffered() {
        let bus = InMemoryEventBus::new(&bus_config(100));
        bus.publish(sample_event("urn:x:1", EventType::Created)).unwrap();
        assert_eq!(bus.pending_count(), 1);

        let recorder = Recorder::new();
        bus.subscribe(recorder.clone());
        bus.start();
        bus.drain().await;
        bus.stop().await;

        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_each_event() {
        let bus = InMemoryEventBus::new(&bus_config(100));
        let first = Recorder::new();
        let second = Recorder::new();
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());
        bus.start();

        bus.publish(sample_event("urn:x:1", EventType::Created)).unwrap();
        bus.drain().await;
        bus.stop().await;

        assert_eq!(first.seen.lock().len(), 1);
        assert_eq!(second.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_per_identifier_order_is_preserved() {
        let bus = InMemoryEventBus::new(&bus_config(1000));
        let recorder = Recorder::new();
        bus.subscribe(recorder.clone());
        bus.start();

        for _ in 0..10 {
            bus.publish(sample_event("urn:x:ordered", EventType::Created)).unwrap();
            bus.publish(sample_event("urn:x:ordered", EventType::Updated)).unwrap();
            bus.publish(sample_event("urn:x:ordered", EventType::Deleted)).unwrap();
        }
        bus.drain().await;
        bus.stop().await;

        let seen = recorder.seen.lock();
        let types: Vec<EventType> = seen
            .iter()
            .filter(|(id, _)| id == "urn:x:ordered")
            .map(|(_, t)| *t)
            .collect();
        assert_eq!(types.len(), 30);
        for window in types.chunks(3) {
            assert_eq!(window, &[EventType::Created, EventType::Updated, EventType::Deleted]);
        }
    }

    #[tokio::test]
    async fn test_saturated_bus_rejects_publish() {
        // 4 partitions of capacity 1; all events for one identifier land on
        // the same partition
        let bus = InMemoryEventBus::new(&bus_config(4));
        bus.publish(sample_event("urn:x:full", EventType::Created)).unwrap();
        let result = bus.publish(sample_event("urn:x:full", EventType::Updated));
        assert!(matches!(result, Err(TitanError::EventBusSaturated)));
        assert_eq!(bus.stats().rejected_saturated.load(Ordering::Relaxed), 1);
        // The rejected event does not count as pending
        assert_eq!(bus.pending_count(), 1);
    }

    struct StuckHandler;

    #[async_trait]
    impl EventHandler for StuckHandler {
        async fn handle(&self, _event: &AnyEvent) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        fn name(&self) -> &str {
            "stuck"
        }
    }

    #[tokio::test]
    async fn test_stuck_subscriber_does_not_halt_the_bus() {
        let bus = InMemoryEventBus::new(&bus_config(100));
        let recorder = Recorder::new();
        bus.subscribe(Arc::new(StuckHandler));
        bus.subscribe(recorder.clone());
        bus.start();

        bus.publish(sample_event("urn:x:1", EventType::Created)).unwrap();
        bus.drain().await;
        bus.stop().await;

        // The healthy subscriber still observed the event
        assert_eq!(recorder.seen.lock().len(), 1);
        assert_eq!(bus.stats().dropped_on_timeout.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_slow_processing() {
        let bus = InMemoryEventBus::new(&bus_config(100));

        struct Slow {
            seen: PlMutex<usize>,
        }

        #[async_trait]
        impl EventHandler for Slow {
            async fn handle(&self, _event: &AnyEvent) {
                tokio::time::sleep(Duration::from_millis(20)).await;
                *self.seen.lock() += 1;
            }
        }

        let slow = Arc::new(Slow {
            seen: PlMutex::new(0),
        });
        bus.subscribe(slow.clone());
        bus.start();

        for n in 0..3 {
            bus.publish(sample_event(&format!("urn:x:{n}"), EventType::Created)).unwrap();
        }
        bus.drain().await;
        assert_eq!(*slow.seen.lock(), 3);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let bus = InMemoryEventBus::new(&bus_config(100));
        bus.start();
        bus.start();
        bus.stop().await;
        bus.stop().await;
    }
}
