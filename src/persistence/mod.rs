//! # Persistence Layer
//!
//! Durable storage of every entity class with atomic write semantics.
//!
//! Every row carries the dual representation: a structured `doc` column for
//! queries and filters, and the canonical `doc_bytes` image for zero-copy
//! streaming reads, with the ETag derived from the bytes. Secondary
//! attributes (globalAssetId, semanticId, idShort) are extracted on every
//! write so discovery queries never see stale values.
//!
//! Two implementations of the [`EntityStore`] trait exist:
//! - [`PgEntityStore`]: PostgreSQL with JSONB + GIN indexes, the production
//!   backend
//! - [`MemoryEntityStore`]: an embedded store for tests and single-process
//!   development

pub mod blob;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod schema;
pub mod store;

pub use blob::{BlobAsset, BlobExternalizer, BlobStore, LocalBlobStore};
pub use memory::MemoryEntityStore;
pub use pool::{connect_pool, PoolHealth};
pub use postgres::PgEntityStore;
pub use store::{frame_page, EntityStore, ListFilter, Page, PageItem};
