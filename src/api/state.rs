//! Core wiring.
//!
//! `Core` is the explicit composition of every subsystem, threaded through
//! the handlers instead of living in globals. Tests build one over the
//! in-memory backends; production wires PostgreSQL and Redis.
//!
//! The write-path contract lives here: the authoritative write commits
//! first, then the cache is updated, then the event is published, then the
//! invalidation broadcast goes out. Failures after commit are logged and
//! never surfaced; replicas recover through TTL expiry or the next read
//! miss.

use std::sync::Arc;

use serde_json::Value;

use crate::audit::AuditSink;
use crate::cache::invalidation::{CacheInvalidationBroadcaster, LocalCacheInvalidator};
use crate::cache::store::{ByteCache, MemoryByteCache, RedisByteCache};
use crate::config::TitanConfig;
use crate::core::error::{TitanError, TitanResult};
use crate::core::model::{extract_semantic_id, EntityKind};
use crate::distributed::leader::LeaderElection;
use crate::events::batch::MicroBatchWriter;
use crate::events::bus::InMemoryEventBus;
use crate::events::publisher;
use crate::events::schema::EventType;
use crate::persistence::blob::{BlobExternalizer, BlobStore, LocalBlobStore};
use crate::persistence::memory::MemoryEntityStore;
use crate::persistence::pool::connect_pool;
use crate::persistence::postgres::PgEntityStore;
use crate::persistence::schema::migrate;
use crate::persistence::store::EntityStore;
use crate::realtime::subscriptions::SubscriptionManager;

/// Explicit dependency composition for the whole server.
pub struct Core {
    pub config: TitanConfig,
    pub store: Arc<dyn EntityStore>,
    pub cache: Arc<dyn ByteCache>,
    pub bus: Arc<InMemoryEventBus>,
    pub batch_writer: Arc<MicroBatchWriter>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub invalidation: Option<Arc<CacheInvalidationBroadcaster>>,
    pub leader: Option<Arc<LeaderElection>>,
    pub blob_store: Arc<dyn BlobStore>,
    pub blobs: BlobExternalizer,
}

/// Shared handle handed to every handler.
pub type SharedCore = Arc<Core>;

impl Core {
    /// Wire every subsystem over the embedded backends. Used by tests and
    /// single-process development mode.
    pub fn standalone(config: TitanConfig) -> SharedCore {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
        let cache: Arc<dyn ByteCache> = Arc::new(MemoryByteCache::new(
            config.cache.memory_capacity,
            config.cache.ttl(),
        ));
        Self::assemble(config, store, cache, None, None)
    }

    /// Wire PostgreSQL, Redis, distributed invalidation, and leader
    /// election for a production replica.
    pub async fn connect(config: TitanConfig) -> TitanResult<SharedCore> {
        let pool = connect_pool(&config.database).await?;
        migrate(&pool).await?;
        let store: Arc<dyn EntityStore> = Arc::new(PgEntityStore::new(pool));

        let redis_url = config.cache.redis_url.clone().ok_or_else(|| {
            TitanError::Internal("TITAN_REDIS_URL is required for replica mode".into())
        })?;
        let cache: Arc<dyn ByteCache> =
            Arc::new(RedisByteCache::connect(&redis_url, config.cache.ttl()).await?);

        let invalidator = Arc::new(LocalCacheInvalidator::new(Arc::clone(&cache)));
        let invalidation = Arc::new(CacheInvalidationBroadcaster::new(&redis_url, invalidator)?);
        let leader = Arc::new(LeaderElection::new(
            "maintenance",
            &redis_url,
            config.leader.clone(),
        )?);

        Ok(Self::assemble(
            config,
            store,
            cache,
            Some(invalidation),
            Some(leader),
        ))
    }

    fn assemble(
        config: TitanConfig,
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn ByteCache>,
        invalidation: Option<Arc<CacheInvalidationBroadcaster>>,
        leader: Option<Arc<LeaderElection>>,
    ) -> SharedCore {
        let bus = Arc::new(InMemoryEventBus::new(&config.event_bus));
        let batch_writer = MicroBatchWriter::new(
            Arc::clone(&cache),
            Arc::new(AuditSink),
            None,
            config.batch_writer.clone(),
        );
        let subscriptions = SubscriptionManager::new(config.realtime.queue_depth);
        let blob_store: Arc<dyn BlobStore> =
            Arc::new(LocalBlobStore::new(config.blobs.directory.clone()));
        let blobs = BlobExternalizer::new(
            Arc::clone(&blob_store),
            config.blobs.inline_threshold_bytes,
        );

        Arc::new(Self {
            config,
            store,
            cache,
            bus,
            batch_writer,
            subscriptions,
            invalidation,
            leader,
            blob_store,
            blobs,
        })
    }

    /// Start the background machinery: bus workers, batch flushing, the
    /// invalidation listener, and leader election.
    pub async fn start(self: &SharedCore) {
        self.bus.subscribe(self.batch_writer.clone() as Arc<dyn crate::events::bus::EventHandler>);
        self.bus.subscribe(self.subscriptions.clone() as Arc<dyn crate::events::bus::EventHandler>);
        self.bus.start();
        self.batch_writer.start();
        if let Some(invalidation) = &self.invalidation {
            invalidation.start();
        }
        if let Some(leader) = &self.leader {
            leader.start();
        }
        tracing::info!("core started");
    }

    /// Drain in-flight events and stop the background machinery.
    pub async fn shutdown(&self) {
        self.bus.drain().await;
        self.batch_writer.stop().await;
        self.bus.stop().await;
        self.subscriptions.shutdown();
        if let Some(invalidation) = &self.invalidation {
            invalidation.stop().await;
        }
        if let Some(leader) = &self.leader {
            leader.stop().await;
        }
        tracing::info!("core stopped");
    }

    // -- post-commit fan-out ------------------------------------------------

    /// Steps 5 and 6 of the write path, plus the invalidation broadcast.
    /// Everything here is best-effort: the authoritative write has already
    /// committed.
    pub async fn after_entity_write(
        &self,
        kind: EntityKind,
        event_type: EventType,
        identifier: &str,
        identifier_b64: &str,
        doc: &Value,
        doc_bytes: Vec<u8>,
        etag: &str,
    ) {
        let doc_bytes = Arc::new(doc_bytes);

        if let Err(e) = self
            .cache
            .set(kind, identifier_b64, &doc_bytes, etag, None)
            .await
        {
            tracing::warn!(error = %e, "cache update after write failed");
        }
        if matches!(kind, EntityKind::Submodel) && event_type == EventType::Updated {
            if let Err(e) = self.cache.invalidate_submodel_elements(identifier_b64).await {
                tracing::warn!(error = %e, "element invalidation after write failed");
            }
        }

        let semantic_id = match kind {
            EntityKind::Submodel | EntityKind::SubmodelDescriptor => extract_semantic_id(doc),
            _ => None,
        };
        if let Err(e) = publisher::publish_entity_event(
            &self.bus,
            kind,
            event_type,
            identifier,
            identifier_b64,
            doc_bytes,
            etag,
            semantic_id,
        ) {
            tracing::warn!(error = %e, "event publish after write failed");
        }

        self.broadcast_invalidation(kind, identifier_b64).await;
    }

    /// Cache removal, deleted event, and invalidation broadcast after a
    /// committed delete.
    pub async fn after_entity_delete(
        &self,
        kind: EntityKind,
        identifier: &str,
        identifier_b64: &str,
    ) {
        if let Err(e) = self.cache.delete(kind, identifier_b64).await {
            tracing::warn!(error = %e, "cache delete failed");
        }
        if matches!(kind, EntityKind::Submodel) {
            if let Err(e) = self.cache.invalidate_submodel_elements(identifier_b64).await {
                tracing::warn!(error = %e, "element invalidation after delete failed");
            }
            self.reap_blob_assets(identifier).await;
        }

        if let Err(e) = publisher::publish_entity_deleted(&self.bus, kind, identifier, identifier_b64)
        {
            tracing::warn!(error = %e, "deleted event publish failed");
        }

        self.broadcast_invalidation(kind, identifier_b64).await;
    }

    /// Post-commit fan-out of an element mutation: the parent entry
    /// re-materializes on next read, affected sub-keys are dropped, and the
    /// element event goes out.
    pub async fn after_element_write(
        &self,
        event_type: EventType,
        submodel_identifier: &str,
        submodel_b64: &str,
        id_short_path: &str,
        value_bytes: Option<Vec<u8>>,
    ) {
        if let Err(e) = self.cache.delete(EntityKind::Submodel, submodel_b64).await {
            tracing::warn!(error = %e, "submodel cache invalidation failed");
        }
        if let Err(e) = self.cache.invalidate_submodel_elements(submodel_b64).await {
            tracing::warn!(error = %e, "element cache invalidation failed");
        }

        let value_bytes = value_bytes.map(Arc::new);
        if event_type != EventType::Deleted {
            if let Some(bytes) = &value_bytes {
                if let Err(e) = self
                    .cache
                    .set_element_value(submodel_b64, id_short_path, bytes, None)
                    .await
                {
                    tracing::warn!(error = %e, "element value cache write failed");
                }
            }
        }

        if let Err(e) = publisher::publish_element_event(
            &self.bus,
            event_type,
            submodel_identifier,
            submodel_b64,
            id_short_path,
            value_bytes,
        ) {
            tracing::warn!(error = %e, "element event publish failed");
        }

        if let Some(invalidation) = &self.invalidation {
            if let Err(e) = invalidation.publish_element(submodel_b64, id_short_path).await {
                tracing::warn!(error = %e, "element invalidation broadcast failed");
            }
            if let Err(e) = invalidation
                .publish_entity(EntityKind::Submodel, submodel_b64)
                .await
            {
                tracing::warn!(error = %e, "submodel invalidation broadcast failed");
            }
        }
    }

    async fn broadcast_invalidation(&self, kind: EntityKind, identifier_b64: &str) {
        if let Some(invalidation) = &self.invalidation {
            if let Err(e) = invalidation.publish_entity(kind, identifier_b64).await {
                tracing::warn!(error = %e, "invalidation broadcast failed");
            }
        }
    }

    async fn reap_blob_assets(&self, submodel_identifier: &str) {
        match self.store.delete_blob_assets(submodel_identifier).await {
            Ok(removed) => {
                for asset in removed {
                    if let Err(e) = self.blob_store.delete(&asset.storage_uri).await {
                        tracing::warn!(
                            storage_uri = %asset.storage_uri,
                            error = %e,
                            "blob object delete failed"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "blob asset cleanup failed");
            }
        }
    }
}
