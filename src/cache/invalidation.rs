//! Distributed cache invalidation.
//!
//! A single broker pub/sub channel keeps horizontally scaled replicas
//! consistent: whichever replica mutates an entity broadcasts an
//! invalidation message after commit, and every replica (the publisher
//! included) drops the matching local cache entries on receipt.
//! Self-invalidation is harmless: it re-deletes a key that is either already
//! fresh or about to be rewritten.
//!
//! Publication is fire-and-forget. A lost message only delays consistency
//! until the entry's TTL expires.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::store::ByteCache;
use crate::core::error::{TitanError, TitanResult};
use crate::core::model::EntityKind;

/// Channel every replica subscribes to.
pub const INVALIDATION_CHANNEL: &str = "titan:cache:invalidation";

/// Scope of an invalidation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    Aas,
    Submodel,
    Element,
    ConceptDescription,
    All,
}

impl InvalidationScope {
    /// Scope covering a mutated entity class.
    pub fn for_entity(kind: EntityKind) -> InvalidationScope {
        match kind {
            EntityKind::Aas | EntityKind::AasDescriptor => InvalidationScope::Aas,
            EntityKind::Submodel | EntityKind::SubmodelDescriptor => InvalidationScope::Submodel,
            EntityKind::ConceptDescription => InvalidationScope::ConceptDescription,
        }
    }
}

/// Wire message carried on the invalidation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    #[serde(rename = "type")]
    pub scope: InvalidationScope,
    pub identifier_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_short_path: Option<String>,
}

impl InvalidationMessage {
    pub fn entity(scope: InvalidationScope, identifier_b64: impl Into<String>) -> Self {
        Self {
            scope,
            identifier_b64: identifier_b64.into(),
            id_short_path: None,
        }
    }

    pub fn element(submodel_b64: impl Into<String>, id_short_path: impl Into<String>) -> Self {
        Self {
            scope: InvalidationScope::Element,
            identifier_b64: submodel_b64.into(),
            id_short_path: Some(id_short_path.into()),
        }
    }

    pub fn all() -> Self {
        Self {
            scope: InvalidationScope::All,
            identifier_b64: "*".to_string(),
            id_short_path: None,
        }
    }

    pub fn to_bytes(&self) -> TitanResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TitanError::Internal(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> TitanResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| TitanError::Internal(format!("invalid invalidation message: {e}")))
    }
}

/// Exponential backoff with jitter for background reconnect loops, capped
/// at 60 seconds.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(500);
    let exp = base.saturating_mul(1u32 << attempt.min(7));
    let capped = exp.min(Duration::from_secs(60));
    let jitter = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
    capped + Duration::from_millis(jitter)
}

/// Applies invalidation messages to the local byte cache.
pub struct LocalCacheInvalidator {
    cache: Arc<dyn ByteCache>,
}

impl LocalCacheInvalidator {
    pub fn new(cache: Arc<dyn ByteCache>) -> Self {
        Self { cache }
    }

    /// Drop the local cache entries the message covers.
    pub async fn handle(&self, message: &InvalidationMessage) {
        let result = match message.scope {
            InvalidationScope::Aas => {
                self.cache
                    .delete(EntityKind::Aas, &message.identifier_b64)
                    .await
            }
            InvalidationScope::ConceptDescription => {
                self.cache
                    .delete(EntityKind::ConceptDescription, &message.identifier_b64)
                    .await
            }
            InvalidationScope::Submodel => {
                let deleted = self
                    .cache
                    .delete(EntityKind::Submodel, &message.identifier_b64)
                    .await;
                let elements = self
                    .cache
                    .invalidate_submodel_elements(&message.identifier_b64)
                    .await;
                deleted.and(elements)
            }
            InvalidationScope::Element => match &message.id_short_path {
                Some(path) => {
                    self.cache
                        .delete_element_value(&message.identifier_b64, path)
                        .await
                }
                None => Ok(()),
            },
            InvalidationScope::All => self.cache.clear_all().await,
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "local cache invalidation failed");
        } else {
            tracing::debug!(
                scope = ?message.scope,
                identifier_b64 = %message.identifier_b64,
                "invalidated local cache entries"
            );
        }
    }
}

/// Broadcasts invalidation messages and listens for messages from every
/// replica, dispatching them to the local invalidator.
pub struct CacheInvalidationBroadcaster {
    client: redis::Client,
    channel: String,
    invalidator: Arc<LocalCacheInvalidator>,
    shutdown: watch::Sender<bool>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CacheInvalidationBroadcaster {
    pub fn new(redis_url: &str, invalidator: Arc<LocalCacheInvalidator>) -> TitanResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TitanError::Internal(format!("redis client: {e}")))?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            client,
            channel: INVALIDATION_CHANNEL.to_string(),
            invalidator,
            shutdown,
            listener: parking_lot::Mutex::new(None),
        })
    }

    /// Subscribe to the invalidation channel and start dispatching incoming
    /// messages. Reconnects with capped exponential backoff.
    pub fn start(&self) {
        let mut guard = self.listener.lock();
        if guard.is_some() {
            return;
        }

        let client = self.client.clone();
        let channel = self.channel.clone();
        let invalidator = Arc::clone(&self.invalidator);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if *shutdown.borrow() {
                    break;
                }

                match client.get_async_connection().await.map(|c| c.into_pubsub()) {
                    Ok(mut pubsub) => {
                        if let Err(e) = pubsub.subscribe(&channel).await {
                            tracing::warn!(error = %e, "invalidation subscribe failed");
                        } else {
                            tracing::info!(channel = %channel, "invalidation listener started");
                            attempt = 0;

                            use futures::StreamExt;
                            let mut stream = pubsub.on_message();
                            loop {
                                tokio::select! {
                                    _ = shutdown.changed() => {
                                        if *shutdown.borrow() {
                                            return;
                                        }
                                    }
                                    message = stream.next() => {
                                        let Some(message) = message else { break };
                                        let payload: Vec<u8> =
                                            message.get_payload().unwrap_or_default();
                                        match InvalidationMessage::from_bytes(&payload) {
                                            Ok(msg) => invalidator.handle(&msg).await,
                                            Err(e) => {
                                                tracing::warn!(error = %e, "bad invalidation message");
                                            }
                                        }
                                    }
                                }
                            }
                            tracing::warn!("invalidation stream closed, reconnecting");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "invalidation listener connect failed");
                    }
                }

                attempt = attempt.saturating_add(1);
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        });

        *guard = Some(handle);
    }

    /// Stop the listener task.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        tracing::info!("invalidation listener stopped");
    }

    /// Publish a message to every replica. Fire-and-forget: a failed
    /// publish is logged by the caller and never fails the request.
    pub async fn publish(&self, message: &InvalidationMessage) -> TitanResult<u64> {
        let bytes = message.to_bytes()?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TitanError::Internal(format!("invalidation publish connect: {e}")))?;
        let receivers: u64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(bytes)
            .query_async(&mut conn)
            .await
            .map_err(|e| TitanError::Internal(format!("invalidation publish: {e}")))?;
        tracing::debug!(
            scope = ?message.scope,
            identifier_b64 = %message.identifier_b64,
            receivers,
            "published invalidation"
        );
        Ok(receivers)
    }

    /// Publish the invalidation covering a mutated entity.
    pub async fn publish_entity(&self, kind: EntityKind, identifier_b64: &str) -> TitanResult<u64> {
        self.publish(&InvalidationMessage::entity(
            InvalidationScope::for_entity(kind),
            identifier_b64,
        ))
        .await
    }

    /// Publish the invalidation covering a mutated element value.
    pub async fn publish_element(
        &self,
        submodel_b64: &str,
        id_short_path: &str,
    ) -> TitanResult<u64> {
        self.publish(&InvalidationMessage::element(submodel_b64, id_short_path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryByteCache;

    #[test]
    fn test_wire_format() {
        let msg = InvalidationMessage::element("c20", "Outer.P");
        let bytes = msg.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "element");
        assert_eq!(json["identifier_b64"], "c20");
        assert_eq!(json["id_short_path"], "Outer.P");

        let back = InvalidationMessage::from_bytes(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_entity_message_omits_path() {
        let msg = InvalidationMessage::entity(InvalidationScope::Aas, "aWQ");
        let json: serde_json::Value =
            serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "aas");
        assert!(json.get("id_short_path").is_none());
    }

    #[test]
    fn test_scope_for_entity() {
        assert_eq!(
            InvalidationScope::for_entity(EntityKind::Aas),
            InvalidationScope::Aas
        );
        assert_eq!(
            InvalidationScope::for_entity(EntityKind::SubmodelDescriptor),
            InvalidationScope::Submodel
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 0..20 {
            let delay = backoff_delay(attempt);
            assert!(delay <= Duration::from_secs(75));
        }
        assert!(backoff_delay(0) >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_local_invalidator_submodel_scope() {
        let cache = Arc::new(MemoryByteCache::new(100, Duration::from_secs(60)));
        let etag = "e".repeat(64);
        cache
            .set(EntityKind::Submodel, "c20", b"doc", &etag, None)
            .await
            .unwrap();
        cache
            .set_element_value("c20", "Outer.P", b"\"v\"", None)
            .await
            .unwrap();

        let invalidator = LocalCacheInvalidator::new(cache.clone());
        invalidator
            .handle(&InvalidationMessage::entity(InvalidationScope::Submodel, "c20"))
            .await;

        assert!(cache.get(EntityKind::Submodel, "c20").await.unwrap().is_none());
        assert!(cache.get_element_value("c20", "Outer.P").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_invalidator_all_scope() {
        let cache = Arc::new(MemoryByteCache::new(100, Duration::from_secs(60)));
        let etag = "e".repeat(64);
        cache.set(EntityKind::Aas, "a", b"1", &etag, None).await.unwrap();
        cache.set(EntityKind::Submodel, "b", b"2", &etag, None).await.unwrap();

        let invalidator = LocalCacheInvalidator::new(cache.clone());
        invalidator.handle(&InvalidationMessage::all()).await;

        assert!(cache.get(EntityKind::Aas, "a").await.unwrap().is_none());
        assert!(cache.get(EntityKind::Submodel, "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_self_invalidation_is_harmless() {
        let cache = Arc::new(MemoryByteCache::new(100, Duration::from_secs(60)));
        let invalidator = LocalCacheInvalidator::new(cache.clone());

        // Deleting a key that does not exist is a no-op
        invalidator
            .handle(&InvalidationMessage::entity(InvalidationScope::Aas, "bm90aGVyZQ"))
            .await;
        assert!(cache.get(EntityKind::Aas, "bm90aGVyZQ").await.unwrap().is_none());
    }
}
