//! # Real-Time Subscriptions
//!
//! Registry of live subscribers (WebSocket clients and internal consumers)
//! fed from the event bus. Each subscription carries a filter and a bounded
//! queue; events that match are enqueued without blocking, evicting the
//! oldest entry when the queue is full.

pub mod subscriptions;

pub use subscriptions::{Subscription, SubscriptionFilter, SubscriptionManager};
