//! Byte cache backends.
//!
//! Entries pack the ETag and the byte image into a single value so reads
//! and writes stay atomic: the first 64 bytes are the hex ETag, the rest is
//! the canonical document image.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::Expiry;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;

use crate::cache::keys;
use crate::core::error::{TitanError, TitanResult};
use crate::core::model::EntityKind;

const ETAG_LEN: usize = 64;

/// Hit/miss counters, kept in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// TTL'd byte+etag store keyed by encoded identifier.
#[async_trait]
pub trait ByteCache: Send + Sync {
    /// Fetch a cached entity image.
    async fn get(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>>;

    /// Write an entity image. `ttl` of `None` uses the backend default.
    async fn set(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
        doc_bytes: &[u8],
        etag: &str,
        ttl: Option<Duration>,
    ) -> TitanResult<()>;

    /// Remove an entity image.
    async fn delete(&self, kind: EntityKind, identifier_b64: &str) -> TitanResult<()>;

    /// Fetch a cached element value.
    async fn get_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
    ) -> TitanResult<Option<Vec<u8>>>;

    /// Cache an element value.
    async fn set_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
        value_bytes: &[u8],
        ttl: Option<Duration>,
    ) -> TitanResult<()>;

    /// Remove a cached element value.
    async fn delete_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
    ) -> TitanResult<()>;

    /// Remove every cached element value of a submodel.
    async fn invalidate_submodel_elements(&self, submodel_b64: &str) -> TitanResult<()>;

    /// Drop every key the server owns.
    async fn clear_all(&self) -> TitanResult<()>;

    /// Liveness probe for health reporting.
    async fn ping(&self) -> bool;

    /// Counters snapshot.
    fn stats(&self) -> CacheStats;
}

fn pack(etag: &str, doc_bytes: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(ETAG_LEN + doc_bytes.len());
    value.extend_from_slice(etag.as_bytes());
    value.extend_from_slice(doc_bytes);
    value
}

fn unpack(value: Vec<u8>) -> Option<(Vec<u8>, String)> {
    if value.len() < ETAG_LEN {
        return None;
    }
    let etag = String::from_utf8(value[..ETAG_LEN].to_vec()).ok()?;
    Some((value[ETAG_LEN..].to_vec(), etag))
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

/// Redis-backed byte cache shared by all replicas.
pub struct RedisByteCache {
    conn: ConnectionManager,
    default_ttl: Duration,
    stats: Arc<RwLock<CacheStats>>,
}

impl RedisByteCache {
    pub fn new(conn: ConnectionManager, default_ttl: Duration) -> Self {
        Self {
            conn,
            default_ttl,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    /// Open a connection manager against the given Redis URL.
    pub async fn connect(url: &str, default_ttl: Duration) -> TitanResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| TitanError::Internal(format!("redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| TitanError::Internal(format!("redis connect: {e}")))?;
        Ok(Self::new(conn, default_ttl))
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> TitanResult<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| TitanError::Internal(format!("cache set: {e}")))?;
        self.stats.write().writes += 1;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> TitanResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| TitanError::Internal(format!("cache get: {e}")))?;
        let mut stats = self.stats.write();
        if value.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        Ok(value)
    }

    async fn delete_raw(&self, key: &str) -> TitanResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| TitanError::Internal(format!("cache delete: {e}")))?;
        self.stats.write().deletes += 1;
        Ok(())
    }

    /// Enumerate keys matching `pattern` with a non-blocking scan and delete
    /// them.
    async fn delete_pattern(&self, pattern: &str) -> TitanResult<u64> {
        let mut conn = self.conn.clone();
        let mut deleted = 0u64;
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(250)
                .query_async(&mut conn)
                .await
                .map_err(|e| TitanError::Internal(format!("cache scan: {e}")))?;
            if !batch.is_empty() {
                deleted += batch.len() as u64;
                redis::cmd("DEL")
                    .arg(&batch)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| TitanError::Internal(format!("cache delete: {e}")))?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        self.stats.write().deletes += deleted;
        Ok(deleted)
    }
}

#[async_trait]
impl ByteCache for RedisByteCache {
    async fn get(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>> {
        let value = self.get_raw(&keys::entity_key(kind, identifier_b64)).await?;
        Ok(value.and_then(unpack))
    }

    async fn set(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
        doc_bytes: &[u8],
        etag: &str,
        ttl: Option<Duration>,
    ) -> TitanResult<()> {
        self.set_raw(&keys::entity_key(kind, identifier_b64), pack(etag, doc_bytes), ttl)
            .await
    }

    async fn delete(&self, kind: EntityKind, identifier_b64: &str) -> TitanResult<()> {
        self.delete_raw(&keys::entity_key(kind, identifier_b64)).await
    }

    async fn get_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
    ) -> TitanResult<Option<Vec<u8>>> {
        self.get_raw(&keys::element_key(submodel_b64, id_short_path)).await
    }

    async fn set_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
        value_bytes: &[u8],
        ttl: Option<Duration>,
    ) -> TitanResult<()> {
        self.set_raw(
            &keys::element_key(submodel_b64, id_short_path),
            value_bytes.to_vec(),
            ttl,
        )
        .await
    }

    async fn delete_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
    ) -> TitanResult<()> {
        self.delete_raw(&keys::element_key(submodel_b64, id_short_path)).await
    }

    async fn invalidate_submodel_elements(&self, submodel_b64: &str) -> TitanResult<()> {
        self.delete_pattern(&keys::element_pattern(submodel_b64)).await?;
        Ok(())
    }

    async fn clear_all(&self) -> TitanResult<()> {
        let dropped = self.delete_pattern(&keys::all_pattern()).await?;
        tracing::info!(dropped, "cleared all cache entries");
        Ok(())
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }

    fn stats(&self) -> CacheStats {
        *self.stats.read()
    }
}

// ---------------------------------------------------------------------------
// Embedded backend
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct MemoryEntry {
    payload: Arc<Vec<u8>>,
    ttl: Duration,
}

struct PerEntryExpiry;

impl Expiry<String, MemoryEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Embedded byte cache for tests and single-replica deployments.
pub struct MemoryByteCache {
    cache: MokaCache<String, MemoryEntry>,
    default_ttl: Duration,
    stats: Arc<RwLock<CacheStats>>,
}

impl MemoryByteCache {
    pub fn new(capacity: u64, default_ttl: Duration) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(capacity)
            .expire_after(PerEntryExpiry)
            .build();
        Self {
            cache,
            default_ttl,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    async fn set_raw(&self, key: String, payload: Vec<u8>, ttl: Option<Duration>) {
        let entry = MemoryEntry {
            payload: Arc::new(payload),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.cache.insert(key, entry).await;
        self.stats.write().writes += 1;
    }

    async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.cache.get(key).await.map(|e| e.payload.as_ref().clone());
        let mut stats = self.stats.write();
        if value.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        value
    }

    async fn delete_prefix(&self, prefix: &str) {
        let matching: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.as_ref().clone())
            .collect();
        for key in matching {
            self.cache.invalidate(&key).await;
            self.stats.write().deletes += 1;
        }
    }
}

#[async_trait]
impl ByteCache for MemoryByteCache {
    async fn get(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>> {
        Ok(self
            .get_raw(&keys::entity_key(kind, identifier_b64))
            .await
            .and_then(unpack))
    }

    async fn set(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
        doc_bytes: &[u8],
        etag: &str,
        ttl: Option<Duration>,
    ) -> TitanResult<()> {
        self.set_raw(keys::entity_key(kind, identifier_b64), pack(etag, doc_bytes), ttl)
            .await;
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, identifier_b64: &str) -> TitanResult<()> {
        self.cache.invalidate(&keys::entity_key(kind, identifier_b64)).await;
        self.stats.write().deletes += 1;
        Ok(())
    }

    async fn get_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
    ) -> TitanResult<Option<Vec<u8>>> {
        Ok(self.get_raw(&keys::element_key(submodel_b64, id_short_path)).await)
    }

    async fn set_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
        value_bytes: &[u8],
        ttl: Option<Duration>,
    ) -> TitanResult<()> {
        self.set_raw(
            keys::element_key(submodel_b64, id_short_path),
            value_bytes.to_vec(),
            ttl,
        )
        .await;
        Ok(())
    }

    async fn delete_element_value(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
    ) -> TitanResult<()> {
        self.cache
            .invalidate(&keys::element_key(submodel_b64, id_short_path))
            .await;
        self.stats.write().deletes += 1;
        Ok(())
    }

    async fn invalidate_submodel_elements(&self, submodel_b64: &str) -> TitanResult<()> {
        self.delete_prefix(&keys::element_key_prefix(submodel_b64)).await;
        Ok(())
    }

    async fn clear_all(&self) -> TitanResult<()> {
        self.cache.invalidate_all();
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    fn stats(&self) -> CacheStats {
        *self.stats.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> MemoryByteCache {
        MemoryByteCache::new(1000, Duration::from_secs(3600))
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let etag = "a".repeat(64);
        let packed = pack(&etag, b"{\"id\":1}");
        let (bytes, unpacked_etag) = unpack(packed).unwrap();
        assert_eq!(bytes, b"{\"id\":1}");
        assert_eq!(unpacked_etag, etag);
    }

    #[test]
    fn test_unpack_rejects_short_values() {
        assert!(unpack(vec![1, 2, 3]).is_none());
    }

    #[tokio::test]
    async fn test_entity_round_trip() {
        let cache = cache();
        let etag = "e".repeat(64);
        cache
            .set(EntityKind::Aas, "aWQ", b"{\"id\":\"urn\"}", &etag, None)
            .await
            .unwrap();

        let (bytes, got_etag) = cache.get(EntityKind::Aas, "aWQ").await.unwrap().unwrap();
        assert_eq!(bytes, b"{\"id\":\"urn\"}");
        assert_eq!(got_etag, etag);

        cache.delete(EntityKind::Aas, "aWQ").await.unwrap();
        assert!(cache.get(EntityKind::Aas, "aWQ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entity_kinds_do_not_collide() {
        let cache = cache();
        let etag = "e".repeat(64);
        cache
            .set(EntityKind::Submodel, "aWQ", b"submodel", &etag, None)
            .await
            .unwrap();
        assert!(cache.get(EntityKind::Aas, "aWQ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_element_values_and_bulk_invalidation() {
        let cache = cache();
        cache
            .set_element_value("c20", "Outer.P", b"\"v\"", None)
            .await
            .unwrap();
        cache
            .set_element_value("c20", "Outer.Q", b"\"w\"", None)
            .await
            .unwrap();
        cache
            .set_element_value("other", "Outer.P", b"\"x\"", None)
            .await
            .unwrap();

        cache.invalidate_submodel_elements("c20").await.unwrap();
        // moka applies invalidations lazily; reads observe them immediately
        assert!(cache.get_element_value("c20", "Outer.P").await.unwrap().is_none());
        assert!(cache.get_element_value("c20", "Outer.Q").await.unwrap().is_none());
        assert_eq!(
            cache.get_element_value("other", "Outer.P").await.unwrap().unwrap(),
            b"\"x\"".to_vec()
        );
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = cache();
        let etag = "e".repeat(64);
        cache
            .set(
                EntityKind::Aas,
                "aWQ",
                b"bytes",
                &etag,
                Some(Duration::from_millis(30)),
            )
            .await
            .unwrap();
        assert!(cache.get(EntityKind::Aas, "aWQ").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get(EntityKind::Aas, "aWQ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = cache();
        let etag = "e".repeat(64);
        cache.set(EntityKind::Aas, "aWQ", b"b", &etag, None).await.unwrap();
        let _ = cache.get(EntityKind::Aas, "aWQ").await.unwrap();
        let _ = cache.get(EntityKind::Aas, "bWlzcw").await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.hit_rate() > 0.49 && stats.hit_rate() < 0.51);
    }
}
