//! # HTTP API
//!
//! IDTA Repository and Registry endpoints. Handlers orchestrate the read
//! path (hot cache probe, conditional requests, projections) and the write
//! path (validate, persist, cache update, event publish, invalidation
//! broadcast) on top of the `Core` wiring value.

pub mod error;
pub mod handlers;
pub mod params;
pub mod responses;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use routes::build_router;
pub use state::{Core, SharedCore};
