//! # Hot Byte Cache
//!
//! Sub-millisecond reads of canonical byte images keyed by the encoded
//! identifier. The cache is a derived copy of the authoritative store and is
//! never authoritative itself: on every successful write the affected entry
//! is rewritten with the new bytes, on delete it is removed, and on element
//! mutation the containing Submodel entry is invalidated together with its
//! cached element values.
//!
//! Two backends implement [`ByteCache`]:
//! - [`RedisByteCache`]: shared across replicas, the production backend
//! - [`MemoryByteCache`]: embedded (moka) cache for tests and single-replica
//!   deployments
//!
//! Cross-replica consistency is handled by [`invalidation`], which carries
//! invalidation messages over a broker pub/sub channel.

pub mod invalidation;
pub mod keys;
pub mod store;

pub use invalidation::{
    CacheInvalidationBroadcaster, InvalidationMessage, InvalidationScope, LocalCacheInvalidator,
};
pub use store::{ByteCache, CacheStats, MemoryByteCache, RedisByteCache};
