//! # Titan-AAS - Asset Administration Shell Server
//!
//! A server implementing the IDTA AAS Repository and Registry HTTP APIs
//! with a layered read path and real-time event fan-out.
//!
//! ## Architecture
//!
//! - `core`: Identifier codec, canonical byte images, projections, and
//!   element operations
//! - `persistence`: Dual-representation authoritative store (PostgreSQL or
//!   embedded), cursor pagination, blob externalization
//! - `cache`: Hot byte cache (Redis or embedded) and distributed
//!   invalidation
//! - `events`: Partitioned event bus, publishers, micro-batch writer
//! - `distributed`: Lease-based leader election
//! - `realtime`: Subscription manager for WebSocket clients
//! - `api`: HTTP handlers, routes, and the `Core` wiring value
//! - `audit`: Immutable audit records
//!
//! Every stored document is kept both as a structured column for queries
//! and as a canonical byte image for zero-copy streaming reads; the ETag is
//! the SHA-256 of the byte image.

#![warn(clippy::all)]

pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod core;
pub mod distributed;
pub mod events;
pub mod persistence;
pub mod realtime;

pub use api::{build_router, Core, SharedCore};
pub use config::TitanConfig;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
