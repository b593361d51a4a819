//! Store abstraction: the `EntityStore` trait, cursor codec, and the
//! zero-copy page framer.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::{TitanError, TitanResult};
use crate::core::model::EntityKind;
use crate::persistence::blob::BlobAsset;

/// One row of a paginated listing: the canonical bytes and ETag, plus the
/// stable sort key the cursor is derived from.
#[derive(Debug, Clone)]
pub struct PageItem {
    pub doc_bytes: Vec<u8>,
    pub etag: String,
    pub created_at: DateTime<Utc>,
    pub row_id: Uuid,
}

/// A page of results with the opaque continuation cursor.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<PageItem>,
    pub next_cursor: Option<String>,
}

/// Optional listing filters. Unset fields do not constrain the query.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Filter on the extracted `idShort`
    pub id_short: Option<String>,
    /// Filter on the extracted semantic id (submodels, submodel descriptors)
    pub semantic_id: Option<String>,
    /// Filter on the extracted global asset id (shells, shell descriptors)
    pub global_asset_id: Option<String>,
    /// Filter on a `(name, value)` specific asset id pair
    pub specific_asset_id: Option<(String, String)>,
    /// Filter on an `isCaseOf` key value (concept descriptions)
    pub is_case_of: Option<String>,
    /// Filter on an embedded data specification key value
    pub data_specification_ref: Option<String>,
}

impl ListFilter {
    pub fn is_empty(&self) -> bool {
        self.id_short.is_none()
            && self.semantic_id.is_none()
            && self.global_asset_id.is_none()
            && self.specific_asset_id.is_none()
            && self.is_case_of.is_none()
            && self.data_specification_ref.is_none()
    }
}

/// Authoritative store of every entity class.
///
/// All writes are atomic; `create`/`update` compute and persist the
/// canonical `(doc, doc_bytes, etag)` triple and re-extract indexed
/// secondary attributes from the current document.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fast-path lookup by primary identifier.
    async fn get_bytes(
        &self,
        kind: EntityKind,
        identifier: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>>;

    /// Fast-path lookup by the pre-encoded identifier, using the indexed
    /// `identifier_b64` column directly.
    async fn get_bytes_by_b64(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>>;

    /// Slow-path lookup: the parsed document for projection and patches.
    async fn get_doc(&self, kind: EntityKind, identifier: &str) -> TitanResult<Option<Value>>;

    /// Create a new entity. Fails with `AlreadyExists` when the identifier
    /// is taken.
    async fn create(&self, kind: EntityKind, doc: &Value) -> TitanResult<(Vec<u8>, String)>;

    /// Replace an entity whole. Returns `None` when absent.
    async fn update(
        &self,
        kind: EntityKind,
        identifier: &str,
        doc: &Value,
    ) -> TitanResult<Option<(Vec<u8>, String)>>;

    /// Delete an entity. Returns `false` when absent.
    async fn delete(&self, kind: EntityKind, identifier: &str) -> TitanResult<bool>;

    /// Existence probe.
    async fn exists(&self, kind: EntityKind, identifier: &str) -> TitanResult<bool>;

    /// Cursor-paginated listing ordered by the stable `(created_at, id)`
    /// pair. Pages stay contiguous under concurrent inserts.
    async fn list_page(
        &self,
        kind: EntityKind,
        limit: usize,
        cursor: Option<&str>,
        filter: &ListFilter,
    ) -> TitanResult<Page>;

    /// Store liveness probe for health reporting.
    async fn ping(&self) -> TitanResult<()>;

    // -- entity-specific finders -------------------------------------------

    async fn find_by_global_asset_id(
        &self,
        kind: EntityKind,
        global_asset_id: &str,
        limit: usize,
    ) -> TitanResult<Page> {
        let filter = ListFilter {
            global_asset_id: Some(global_asset_id.to_string()),
            ..Default::default()
        };
        self.list_page(kind, limit, None, &filter).await
    }

    async fn find_by_semantic_id(
        &self,
        kind: EntityKind,
        semantic_id: &str,
        limit: usize,
    ) -> TitanResult<Page> {
        let filter = ListFilter {
            semantic_id: Some(semantic_id.to_string()),
            ..Default::default()
        };
        self.list_page(kind, limit, None, &filter).await
    }

    async fn find_by_specific_asset_id(
        &self,
        kind: EntityKind,
        name: &str,
        value: &str,
        limit: usize,
    ) -> TitanResult<Page> {
        let filter = ListFilter {
            specific_asset_id: Some((name.to_string(), value.to_string())),
            ..Default::default()
        };
        self.list_page(kind, limit, None, &filter).await
    }

    // -- blob asset registry -----------------------------------------------

    /// Record (or refresh) an externalized blob row. The
    /// `(submodel, idShortPath)` pair is unique.
    async fn upsert_blob_asset(&self, asset: &BlobAsset) -> TitanResult<()>;

    /// All blob rows belonging to a submodel.
    async fn blob_assets_for(&self, submodel_identifier: &str) -> TitanResult<Vec<BlobAsset>>;

    /// Remove every blob row of a submodel, returning the removed rows so
    /// the caller can reap stored objects.
    async fn delete_blob_assets(&self, submodel_identifier: &str) -> TitanResult<Vec<BlobAsset>>;

    /// Dedup lookup by content hash.
    async fn find_blob_by_sha256(&self, sha256: &str) -> TitanResult<Option<BlobAsset>>;
}

// ---------------------------------------------------------------------------
// Cursor codec
// ---------------------------------------------------------------------------

/// Encode the `(created_at, id)` sort key of the last returned row as an
/// opaque continuation cursor.
pub fn encode_cursor(created_at: DateTime<Utc>, row_id: Uuid) -> String {
    let raw = format!("{}:{}", created_at.timestamp_micros(), row_id);
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// A cursor positioned before the first possible row. Returned for
/// zero-limit probes at the start of a traversal.
pub fn origin_cursor() -> String {
    encode_cursor(
        Utc.timestamp_micros(0).single().unwrap_or_else(Utc::now),
        Uuid::nil(),
    )
}

/// Decode a continuation cursor back into its sort key.
pub fn decode_cursor(cursor: &str) -> TitanResult<(DateTime<Utc>, Uuid)> {
    let invalid = || TitanError::InvalidDocument(format!("invalid cursor: {cursor}"));
    let raw = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let raw = String::from_utf8(raw).map_err(|_| invalid())?;
    let (micros, id) = raw.split_once(':').ok_or_else(invalid)?;
    let micros: i64 = micros.parse().map_err(|_| invalid())?;
    let created_at = Utc
        .timestamp_micros(micros)
        .single()
        .ok_or_else(invalid)?;
    let row_id = Uuid::parse_str(id).map_err(|_| invalid())?;
    Ok((created_at, row_id))
}

// ---------------------------------------------------------------------------
// Zero-copy page framer
// ---------------------------------------------------------------------------

/// Assemble the paginated JSON response directly from stored byte images.
///
/// No row is parsed or re-serialized; the frame is composed by
/// concatenation around the raw `doc_bytes` of each item.
pub fn frame_page(page: &Page) -> Vec<u8> {
    let payload: usize = page.items.iter().map(|i| i.doc_bytes.len() + 1).sum();
    let mut out = Vec::with_capacity(payload + 64);

    out.extend_from_slice(b"{\"result\":[");
    for (i, item) in page.items.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(&item.doc_bytes);
    }
    out.extend_from_slice(b"],\"paging_metadata\":{\"cursor\":");
    match &page.next_cursor {
        // Cursors are Base64URL and never need JSON escaping
        Some(cursor) => {
            out.push(b'"');
            out.extend_from_slice(cursor.as_bytes());
            out.push(b'"');
        }
        None => out.extend_from_slice(b"null"),
    }
    out.extend_from_slice(b"}}");
    out
}
