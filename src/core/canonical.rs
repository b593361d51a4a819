//! Canonical JSON byte images and ETag derivation.
//!
//! Every stored document exposes a consistent `(doc, doc_bytes, etag)`
//! triple. The byte image is a compact UTF-8 JSON encoding with keys in the
//! server's write-time insertion order and `null` object members pruned, so
//! `bytes -> parse -> re-serialize` reproduces the same bytes. The ETag is
//! the lowercase hex SHA-256 of the byte image.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::error::{TitanError, TitanResult};

/// Produce the canonical byte image of a document.
///
/// Object members whose value is `null` are omitted; `null` entries inside
/// arrays are kept, since array positions are significant. Keys stay in the
/// order the server wrote them.
pub fn canonical_bytes(doc: &Value) -> TitanResult<Vec<u8>> {
    let pruned = prune_nulls(doc);
    serde_json::to_vec(&pruned).map_err(|e| TitanError::InvalidDocument(e.to_string()))
}

/// Derive the ETag for a canonical byte image.
pub fn etag_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Produce the full consistent triple for a document: the pruned document,
/// its canonical bytes, and the ETag over those bytes.
pub fn canonical_triple(doc: &Value) -> TitanResult<(Value, Vec<u8>, String)> {
    let pruned = prune_nulls(doc);
    let bytes =
        serde_json::to_vec(&pruned).map_err(|e| TitanError::InvalidDocument(e.to_string()))?;
    let etag = etag_of(&bytes);
    Ok((pruned, bytes, etag))
}

fn prune_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), prune_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(prune_nulls).collect()),
        other => other.clone(),
    }
}
