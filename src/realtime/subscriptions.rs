//! Subscription manager.
//!
//! Connects the event bus to real-time clients. Each subscription owns a
//! bounded queue: matching events are enqueued without blocking, and when a
//! queue is full the oldest event is evicted and counted. Consumers read
//! the queue as an asynchronous stream; dropping the subscription removes
//! it from the registry and drains its queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::events::bus::EventHandler;
use crate::events::schema::{AnyEvent, EventType};

/// Filter criteria for a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
    /// Entity discriminator to match (`aas`, `submodel`,
    /// `concept_description`, `submodel_element`, `operation_invocation`)
    pub entity_type: String,
    /// Mutation types to include
    pub event_types: Vec<EventType>,
    /// Optional specific identifier to match
    pub identifier: Option<String>,
}

impl SubscriptionFilter {
    /// An event matches iff its entity equals the filter's, its mutation
    /// type is included, and, when the filter names an identifier, the
    /// identifiers are equal.
    pub fn matches(&self, event: &AnyEvent) -> bool {
        if event.entity() != self.entity_type {
            return false;
        }
        match event.event_type() {
            Some(event_type) => {
                if !self.event_types.contains(&event_type) {
                    return false;
                }
            }
            // Operation events carry no CRUD type; entity match suffices
            None => {}
        }
        if let Some(identifier) = &self.identifier {
            if event.identifier() != identifier {
                return false;
            }
        }
        true
    }
}

struct SubscriptionQueue {
    events: Mutex<VecDeque<AnyEvent>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    evicted: AtomicU64,
}

impl SubscriptionQueue {
    fn push(&self, event: AnyEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
        drop(events);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.events.lock().clear();
        self.notify.notify_waiters();
    }
}

struct Registered {
    filter: SubscriptionFilter,
    queue: Arc<SubscriptionQueue>,
}

/// A live subscription handed to a consumer. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    queue: Arc<SubscriptionQueue>,
    registry: Arc<DashMap<Uuid, Registered>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Events evicted from this subscription's queue so far.
    pub fn evicted_count(&self) -> u64 {
        self.queue.evicted.load(Ordering::Relaxed)
    }

    /// Receive the next matching event. Returns `None` once the
    /// subscription is closed and its queue is exhausted.
    pub async fn recv(&self) -> Option<AnyEvent> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(event) = self.queue.events.lock().pop_front() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
        self.queue.close();
    }
}

/// Registry of real-time subscribers, fed from the event bus.
pub struct SubscriptionManager {
    registry: Arc<DashMap<Uuid, Registered>>,
    queue_depth: usize,
}

impl SubscriptionManager {
    pub fn new(queue_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(DashMap::new()),
            queue_depth: queue_depth.max(1),
        })
    }

    /// Register a new subscription.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(SubscriptionQueue {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.queue_depth,
            closed: AtomicBool::new(false),
            evicted: AtomicU64::new(0),
        });
        self.registry.insert(
            id,
            Registered {
                filter,
                queue: Arc::clone(&queue),
            },
        );
        tracing::debug!(subscription_id = %id, "subscription registered");
        Subscription {
            id,
            queue,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Close every subscription; their consumers observe end-of-stream.
    pub fn shutdown(&self) {
        for entry in self.registry.iter() {
            entry.value().queue.close();
        }
        self.registry.clear();
        tracing::info!("subscription manager shut down");
    }
}

#[async_trait]
impl EventHandler for SubscriptionManager {
    async fn handle(&self, event: &AnyEvent) {
        for entry in self.registry.iter() {
            let registered = entry.value();
            if registered.filter.matches(event) {
                registered.queue.push(event.clone());
            }
        }
    }

    fn name(&self) -> &str {
        "subscription-manager"
    }
}
