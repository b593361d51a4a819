//! # Distributed Coordination
//!
//! Lease-based leader election over the broker, ensuring that at most one
//! replica runs a named singleton worker (scheduled cleanup, periodic
//! aggregation, scheduler loops).

pub mod leader;

pub use leader::{generate_instance_id, LeaderElection, LeadershipHandler};
