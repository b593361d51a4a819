//! # Event Fan-Out
//!
//! In-process publish/subscribe substrate for mutation events:
//! - [`schema`]: event kinds and the broadcast wire format
//! - [`bus`]: partitioned bounded bus with drain semantics
//! - [`publisher`]: publish helpers used by the write handlers
//! - [`batch`]: micro-batch writer sitting between the bus and auxiliary
//!   sinks
//!
//! Events are published strictly after the authoritative write has
//! committed. Per-identifier delivery order is preserved for every
//! subscriber; there is no cross-entity or cross-subscriber ordering
//! guarantee.

pub mod batch;
pub mod bus;
pub mod publisher;
pub mod schema;

pub use batch::{BatchMetrics, BatchSink, EventBroadcaster, MicroBatchWriter};
pub use bus::{BusStats, EventHandler, InMemoryEventBus};
pub use schema::{
    AnyEvent, ElementEvent, EntityEvent, EventType, InvocationPhase, OperationEvent,
};
