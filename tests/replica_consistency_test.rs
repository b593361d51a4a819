//! Cross-replica cache consistency.
//!
//! Two replicas share an authoritative store but hold separate local byte
//! caches. The invalidation channel is simulated by handing the message a
//! writing replica would publish straight to the other replica's local
//! invalidator, which is exactly what the broker listener does on receipt.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use titan_aas::cache::invalidation::{
    InvalidationMessage, InvalidationScope, LocalCacheInvalidator,
};
use titan_aas::cache::store::{ByteCache, MemoryByteCache};
use titan_aas::core::canonical::canonical_triple;
use titan_aas::core::ids::encode_id;
use titan_aas::core::model::EntityKind;
use titan_aas::persistence::memory::MemoryEntityStore;
use titan_aas::persistence::store::EntityStore;

struct Replica {
    cache: Arc<MemoryByteCache>,
    invalidator: LocalCacheInvalidator,
}

impl Replica {
    fn new() -> Self {
        let cache = Arc::new(MemoryByteCache::new(1000, Duration::from_secs(3600)));
        let invalidator = LocalCacheInvalidator::new(cache.clone());
        Self { cache, invalidator }
    }

    /// The read path: local cache, then the shared store with a refill.
    async fn read(
        &self,
        store: &dyn EntityStore,
        identifier: &str,
        identifier_b64: &str,
    ) -> (Vec<u8>, String) {
        if let Some(hit) = self.cache.get(EntityKind::Aas, identifier_b64).await.unwrap() {
            return hit;
        }
        let (bytes, etag) = store
            .get_bytes(EntityKind::Aas, identifier)
            .await
            .unwrap()
            .unwrap();
        self.cache
            .set(EntityKind::Aas, identifier_b64, &bytes, &etag, None)
            .await
            .unwrap();
        (bytes, etag)
    }
}

#[tokio::test]
async fn test_read_after_cross_replica_write_sees_new_etag() {
    let store = MemoryEntityStore::new();
    let r1 = Replica::new();
    let r2 = Replica::new();

    let identifier = "urn:x:replicated";
    let identifier_b64 = encode_id(identifier);

    // Create through R2 and warm R1's cache with the first version
    let doc = json!({"id": identifier, "idShort": "V1", "assetInformation": {"assetKind": "Instance"}});
    let (_, etag1) = store.create(EntityKind::Aas, &doc).await.unwrap();
    let (_, read_etag) = r1.read(&store, identifier, &identifier_b64).await;
    assert_eq!(read_etag, etag1);

    // R2 replaces the entity, updates its own cache, and broadcasts
    let mut updated = doc.clone();
    updated["idShort"] = json!("V2");
    let (_, bytes2, etag2) = canonical_triple(&updated).unwrap();
    let (stored_bytes, stored_etag) = store
        .update(EntityKind::Aas, identifier, &updated)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_bytes, bytes2);
    assert_eq!(stored_etag, etag2);
    r2.cache
        .set(EntityKind::Aas, &identifier_b64, &bytes2, &etag2, None)
        .await
        .unwrap();

    let message = InvalidationMessage::entity(InvalidationScope::Aas, identifier_b64.clone());
    // Every replica receives the broadcast, the publisher included
    r1.invalidator.handle(&message).await;
    r2.invalidator.handle(&message).await;

    // R1's next read must observe the new ETag
    let (_, observed) = r1.read(&store, identifier, &identifier_b64).await;
    assert_eq!(observed, etag2);
    assert_ne!(observed, etag1);
}

#[tokio::test]
async fn test_submodel_invalidation_covers_element_values() {
    let r1 = Replica::new();
    let sm_b64 = encode_id("urn:x:sm");

    r1.cache
        .set(EntityKind::Submodel, &sm_b64, b"doc-bytes", &"e".repeat(64), None)
        .await
        .unwrap();
    r1.cache
        .set_element_value(&sm_b64, "Outer.P", b"\"v\"", None)
        .await
        .unwrap();

    let message = InvalidationMessage::entity(InvalidationScope::Submodel, sm_b64.clone());
    r1.invalidator.handle(&message).await;

    assert!(r1.cache.get(EntityKind::Submodel, &sm_b64).await.unwrap().is_none());
    assert!(r1
        .cache
        .get_element_value(&sm_b64, "Outer.P")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_element_invalidation_is_scoped_to_one_path() {
    let r1 = Replica::new();
    let sm_b64 = encode_id("urn:x:sm");

    r1.cache
        .set_element_value(&sm_b64, "Outer.P", b"\"v\"", None)
        .await
        .unwrap();
    r1.cache
        .set_element_value(&sm_b64, "Outer.Q", b"\"w\"", None)
        .await
        .unwrap();

    let message = InvalidationMessage::element(sm_b64.clone(), "Outer.P");
    r1.invalidator.handle(&message).await;

    assert!(r1
        .cache
        .get_element_value(&sm_b64, "Outer.P")
        .await
        .unwrap()
        .is_none());
    assert!(r1
        .cache
        .get_element_value(&sm_b64, "Outer.Q")
        .await
        .unwrap()
        .is_some());
}
