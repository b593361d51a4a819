//! Blob externalization.
//!
//! `Blob` elements whose payload exceeds the configured threshold are not
//! stored inline. The payload moves to a blob store, the element's `value`
//! becomes the storage URI, and a `BlobAsset` row records the mapping with a
//! content hash for deduplication.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::error::{TitanError, TitanResult};
use crate::core::model::ElementKind;
use crate::persistence::store::EntityStore;

/// Metadata row for an externalized blob payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobAsset {
    pub id: Uuid,
    pub submodel_identifier: String,
    pub id_short_path: String,
    pub storage_uri: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Content-addressed object storage for externalized payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store content under its hash, returning the storage URI.
    async fn put(&self, sha256: &str, content: &[u8]) -> TitanResult<String>;

    /// Fetch content by storage URI.
    async fn get(&self, storage_uri: &str) -> TitanResult<Option<Vec<u8>>>;

    /// Remove content by storage URI.
    async fn delete(&self, storage_uri: &str) -> TitanResult<()>;
}

/// Filesystem-backed blob store. Objects land under
/// `{root}/{sha256[..2]}/{sha256}`.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, sha256: &str) -> PathBuf {
        let prefix = if sha256.len() >= 2 { &sha256[..2] } else { sha256 };
        self.root.join(prefix).join(sha256)
    }

    fn path_from_uri(uri: &str) -> TitanResult<PathBuf> {
        uri.strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| TitanError::Internal(format!("unsupported blob URI: {uri}")))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, sha256: &str, content: &[u8]) -> TitanResult<String> {
        let path = self.object_path(sha256);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TitanError::Internal(format!("blob store mkdir: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| TitanError::Internal(format!("blob store write: {e}")))?;
        Ok(format!("file://{}", path.display()))
    }

    async fn get(&self, storage_uri: &str) -> TitanResult<Option<Vec<u8>>> {
        let path = Self::path_from_uri(storage_uri)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TitanError::Internal(format!("blob store read: {e}"))),
        }
    }

    async fn delete(&self, storage_uri: &str) -> TitanResult<()> {
        let path = Self::path_from_uri(storage_uri)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TitanError::Internal(format!("blob store delete: {e}"))),
        }
    }
}

/// Walks Submodel documents and moves oversized Blob payloads out of the
/// inline representation.
pub struct BlobExternalizer {
    store: Arc<dyn BlobStore>,
    threshold_bytes: usize,
}

impl BlobExternalizer {
    pub fn new(store: Arc<dyn BlobStore>, threshold_bytes: usize) -> Self {
        Self {
            store,
            threshold_bytes,
        }
    }

    /// Externalize every oversized Blob payload in `doc`.
    ///
    /// Returns the rewritten document together with the asset rows to
    /// persist. Payloads whose hash is already on record reuse the stored
    /// object instead of writing a second copy.
    pub async fn externalize(
        &self,
        entity_store: &dyn EntityStore,
        submodel_identifier: &str,
        doc: &Value,
    ) -> TitanResult<(Value, Vec<BlobAsset>)> {
        let mut result = doc.clone();
        let mut candidates = Vec::new();
        collect_blob_paths(&result, String::new(), true, &mut candidates);

        let mut assets = Vec::new();
        for path in candidates {
            let Some(element) = find_mut(&mut result, &path) else {
                continue;
            };
            let Some(value) = element.get("value").and_then(Value::as_str) else {
                continue;
            };
            if value.starts_with("file://") {
                // Already externalized by an earlier write
                continue;
            }

            // Blob values are Base64; fall back to the raw string when the
            // payload is not valid Base64
            let content = BASE64_STANDARD
                .decode(value)
                .unwrap_or_else(|_| value.as_bytes().to_vec());
            if content.len() <= self.threshold_bytes {
                continue;
            }

            let sha256 = hex::encode(Sha256::digest(&content));
            let storage_uri = match entity_store.find_blob_by_sha256(&sha256).await? {
                Some(existing) => existing.storage_uri,
                None => self.store.put(&sha256, &content).await?,
            };

            let content_type = element
                .get("contentType")
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream")
                .to_string();

            if let Some(obj) = element.as_object_mut() {
                obj.insert("value".to_string(), Value::String(storage_uri.clone()));
            }

            assets.push(BlobAsset {
                id: Uuid::new_v4(),
                submodel_identifier: submodel_identifier.to_string(),
                id_short_path: path,
                storage_uri,
                content_type,
                size_bytes: content.len() as i64,
                sha256,
                created_at: Utc::now(),
            });
        }

        Ok((result, assets))
    }
}

fn collect_blob_paths(node: &Value, prefix: String, is_root: bool, out: &mut Vec<String>) {
    let children_key = if is_root { "submodelElements" } else { "value" };
    let Some(children) = node.get(children_key).and_then(Value::as_array) else {
        return;
    };

    for (index, child) in children.iter().enumerate() {
        let segment = match child.get("idShort").and_then(Value::as_str) {
            Some(id_short) if !prefix.is_empty() => format!("{prefix}.{id_short}"),
            Some(id_short) => id_short.to_string(),
            None => format!("{prefix}[{index}]"),
        };

        match ElementKind::of(child) {
            ElementKind::Blob => out.push(segment),
            kind if kind.is_container() => {
                collect_blob_paths(child, segment, false, out);
            }
            _ => {}
        }
    }
}

fn find_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    use crate::core::path::{parse_id_short_path, PathSegment};
    let segments = parse_id_short_path(path).ok()?;
    let mut current = doc;
    for segment in &segments {
        let key = if current.get("submodelElements").is_some() {
            "submodelElements"
        } else {
            "value"
        };
        let children = current.get_mut(key)?.as_array_mut()?;
        let index = match segment {
            PathSegment::IdShort(name) => children
                .iter()
                .position(|c| c.get("idShort").and_then(Value::as_str) == Some(name.as_str()))?,
            PathSegment::Index(i) => {
                if *i >= children.len() {
                    return None;
                }
                *i
            }
        };
        current = &mut children[index];
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::MemoryEntityStore;
    use serde_json::json;

    fn submodel_with_blob(payload: &str) -> Value {
        json!({
            "id": "urn:x:sm",
            "submodelElements": [
                {
                    "modelType": "SubmodelElementCollection",
                    "idShort": "Media",
                    "value": [
                        {
                            "modelType": "Blob",
                            "idShort": "Image",
                            "contentType": "image/png",
                            "value": payload
                        }
                    ]
                },
                {"modelType": "Property", "idShort": "Name", "value": "small"}
            ]
        })
    }

    #[tokio::test]
    async fn test_small_blob_stays_inline() {
        let dir = std::env::temp_dir().join(format!("titan-blob-{}", Uuid::new_v4()));
        let externalizer = BlobExternalizer::new(Arc::new(LocalBlobStore::new(&dir)), 1024);
        let store = MemoryEntityStore::new();

        let payload = BASE64_STANDARD.encode([0u8; 16]);
        let doc = submodel_with_blob(&payload);
        let (result, assets) = externalizer
            .externalize(&store, "urn:x:sm", &doc)
            .await
            .unwrap();

        assert!(assets.is_empty());
        assert_eq!(result, doc);
    }

    #[tokio::test]
    async fn test_oversized_blob_is_externalized() {
        let dir = std::env::temp_dir().join(format!("titan-blob-{}", Uuid::new_v4()));
        let externalizer = BlobExternalizer::new(Arc::new(LocalBlobStore::new(&dir)), 64);
        let store = MemoryEntityStore::new();

        let payload = BASE64_STANDARD.encode([7u8; 256]);
        let doc = submodel_with_blob(&payload);
        let (result, assets) = externalizer
            .externalize(&store, "urn:x:sm", &doc)
            .await
            .unwrap();

        assert_eq!(assets.len(), 1);
        let asset = &assets[0];
        assert_eq!(asset.id_short_path, "Media.Image");
        assert_eq!(asset.content_type, "image/png");
        assert_eq!(asset.size_bytes, 256);

        let rewritten = &result["submodelElements"][0]["value"][0]["value"];
        assert_eq!(rewritten.as_str().unwrap(), asset.storage_uri);
        assert!(rewritten.as_str().unwrap().starts_with("file://"));
    }

    #[tokio::test]
    async fn test_dedup_by_content_hash() {
        let dir = std::env::temp_dir().join(format!("titan-blob-{}", Uuid::new_v4()));
        let externalizer = BlobExternalizer::new(Arc::new(LocalBlobStore::new(&dir)), 64);
        let store = MemoryEntityStore::new();

        let payload = BASE64_STANDARD.encode([9u8; 512]);
        let doc = submodel_with_blob(&payload);
        let (_, assets) = externalizer
            .externalize(&store, "urn:x:sm", &doc)
            .await
            .unwrap();
        store.upsert_blob_asset(&assets[0]).await.unwrap();

        // A second submodel carrying the same payload reuses the object
        let (_, assets2) = externalizer
            .externalize(&store, "urn:x:other", &doc)
            .await
            .unwrap();
        assert_eq!(assets2[0].storage_uri, assets[0].storage_uri);
        assert_eq!(assets2[0].sha256, assets[0].sha256);
    }

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("titan-blob-{}", Uuid::new_v4()));
        let store = LocalBlobStore::new(&dir);
        let sha = hex::encode(Sha256::digest(b"content"));

        let uri = store.put(&sha, b"content").await.unwrap();
        assert_eq!(store.get(&uri).await.unwrap().unwrap(), b"content");

        store.delete(&uri).await.unwrap();
        assert!(store.get(&uri).await.unwrap().is_none());
        // Idempotent delete
        store.delete(&uri).await.unwrap();
    }
}
