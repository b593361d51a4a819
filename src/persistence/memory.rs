//! Embedded in-memory implementation of the authoritative store.
//!
//! Used by tests and by single-process development mode. Behavior matches
//! the PostgreSQL backend: the same canonical triples, the same pagination
//! contract, the same error mapping.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::core::canonical::canonical_triple;
use crate::core::error::{TitanError, TitanResult};
use crate::core::ids::{encode_id, validate_identifier_length};
use crate::core::model::{
    extract_data_specification_refs, extract_global_asset_id, extract_is_case_of_values,
    extract_semantic_id, extract_specific_asset_ids, identifier_of, EntityKind,
};
use crate::persistence::blob::BlobAsset;
use crate::persistence::store::{
    decode_cursor, encode_cursor, origin_cursor, EntityStore, ListFilter, Page, PageItem,
};

#[derive(Debug, Clone)]
struct Row {
    row_id: Uuid,
    identifier_b64: String,
    doc: Value,
    doc_bytes: Vec<u8>,
    etag: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory entity store.
#[derive(Default)]
pub struct MemoryEntityStore {
    tables: RwLock<HashMap<EntityKind, HashMap<String, Row>>>,
    blob_assets: RwLock<Vec<BlobAsset>>,
}

/// Current time truncated to microseconds, matching the resolution cursors
/// are encoded with.
fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_micros(now.timestamp_micros())
        .single()
        .unwrap_or(now)
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(doc: &Value, filter: &ListFilter) -> bool {
        if let Some(id_short) = &filter.id_short {
            if doc.get("idShort").and_then(Value::as_str) != Some(id_short.as_str()) {
                return false;
            }
        }
        if let Some(semantic_id) = &filter.semantic_id {
            if extract_semantic_id(doc).as_deref() != Some(semantic_id.as_str()) {
                return false;
            }
        }
        if let Some(global_asset_id) = &filter.global_asset_id {
            if extract_global_asset_id(doc).as_deref() != Some(global_asset_id.as_str()) {
                return false;
            }
        }
        if let Some((name, value)) = &filter.specific_asset_id {
            let pairs = extract_specific_asset_ids(doc);
            if !pairs.iter().any(|(n, v)| n == name && v == value) {
                return false;
            }
        }
        if let Some(case_of) = &filter.is_case_of {
            if !extract_is_case_of_values(doc).iter().any(|v| v == case_of) {
                return false;
            }
        }
        if let Some(data_spec) = &filter.data_specification_ref {
            if !extract_data_specification_refs(doc)
                .iter()
                .any(|v| v == data_spec)
            {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get_bytes(
        &self,
        kind: EntityKind,
        identifier: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>> {
        let tables = self.tables.read();
        Ok(tables
            .get(&kind)
            .and_then(|t| t.get(identifier))
            .map(|row| (row.doc_bytes.clone(), row.etag.clone())))
    }

    async fn get_bytes_by_b64(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>> {
        let tables = self.tables.read();
        Ok(tables.get(&kind).and_then(|t| {
            t.values()
                .find(|row| row.identifier_b64 == identifier_b64)
                .map(|row| (row.doc_bytes.clone(), row.etag.clone()))
        }))
    }

    async fn get_doc(&self, kind: EntityKind, identifier: &str) -> TitanResult<Option<Value>> {
        let tables = self.tables.read();
        Ok(tables
            .get(&kind)
            .and_then(|t| t.get(identifier))
            .map(|row| row.doc.clone()))
    }

    async fn create(&self, kind: EntityKind, doc: &Value) -> TitanResult<(Vec<u8>, String)> {
        let identifier = identifier_of(doc)?.to_string();
        validate_identifier_length(&identifier)?;
        let (pruned, doc_bytes, etag) = canonical_triple(doc)?;

        let mut tables = self.tables.write();
        let table = tables.entry(kind).or_default();
        if table.contains_key(&identifier) {
            return Err(TitanError::already_exists(kind.display_name(), identifier));
        }
        let now = now_micros();
        table.insert(
            identifier.clone(),
            Row {
                row_id: Uuid::new_v4(),
                identifier_b64: encode_id(&identifier),
                doc: pruned,
                doc_bytes: doc_bytes.clone(),
                etag: etag.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok((doc_bytes, etag))
    }

    async fn update(
        &self,
        kind: EntityKind,
        identifier: &str,
        doc: &Value,
    ) -> TitanResult<Option<(Vec<u8>, String)>> {
        validate_identifier_length(identifier)?;
        let (pruned, doc_bytes, etag) = canonical_triple(doc)?;

        let mut tables = self.tables.write();
        let Some(row) = tables.get_mut(&kind).and_then(|t| t.get_mut(identifier)) else {
            return Ok(None);
        };
        row.doc = pruned;
        row.doc_bytes = doc_bytes.clone();
        row.etag = etag.clone();
        row.updated_at = now_micros();
        Ok(Some((doc_bytes, etag)))
    }

    async fn delete(&self, kind: EntityKind, identifier: &str) -> TitanResult<bool> {
        let mut tables = self.tables.write();
        Ok(tables
            .get_mut(&kind)
            .and_then(|t| t.remove(identifier))
            .is_some())
    }

    async fn exists(&self, kind: EntityKind, identifier: &str) -> TitanResult<bool> {
        let tables = self.tables.read();
        Ok(tables
            .get(&kind)
            .map(|t| t.contains_key(identifier))
            .unwrap_or(false))
    }

    async fn list_page(
        &self,
        kind: EntityKind,
        limit: usize,
        cursor: Option<&str>,
        filter: &ListFilter,
    ) -> TitanResult<Page> {
        let cursor_key = cursor.map(decode_cursor).transpose()?;

        let tables = self.tables.read();
        let mut rows: Vec<&Row> = tables
            .get(&kind)
            .map(|t| {
                t.values()
                    .filter(|row| Self::matches(&row.doc, filter))
                    .filter(|row| match cursor_key {
                        Some((ts, id)) => (row.created_at, row.row_id) > (ts, id),
                        None => true,
                    })
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|row| (row.created_at, row.row_id));

        let mut items: Vec<PageItem> = rows
            .into_iter()
            .take(limit + 1)
            .map(|row| PageItem {
                doc_bytes: row.doc_bytes.clone(),
                etag: row.etag.clone(),
                created_at: row.created_at,
                row_id: row.row_id,
            })
            .collect();

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            match items.last() {
                Some(last) => Some(encode_cursor(last.created_at, last.row_id)),
                None => Some(cursor.map(str::to_string).unwrap_or_else(origin_cursor)),
            }
        } else {
            None
        };

        Ok(Page { items, next_cursor })
    }

    async fn ping(&self) -> TitanResult<()> {
        Ok(())
    }

    async fn upsert_blob_asset(&self, asset: &BlobAsset) -> TitanResult<()> {
        let mut assets = self.blob_assets.write();
        assets.retain(|a| {
            !(a.submodel_identifier == asset.submodel_identifier
                && a.id_short_path == asset.id_short_path)
        });
        assets.push(asset.clone());
        Ok(())
    }

    async fn blob_assets_for(&self, submodel_identifier: &str) -> TitanResult<Vec<BlobAsset>> {
        let assets = self.blob_assets.read();
        Ok(assets
            .iter()
            .filter(|a| a.submodel_identifier == submodel_identifier)
            .cloned()
            .collect())
    }

    async fn delete_blob_assets(&self, submodel_identifier: &str) -> TitanResult<Vec<BlobAsset>> {
        let mut assets = self.blob_assets.write();
        let (removed, kept): (Vec<BlobAsset>, Vec<BlobAsset>) = assets
            .drain(..)
            .partition(|a| a.submodel_identifier == submodel_identifier);
        *assets = kept;
        Ok(removed)
    }

    async fn find_blob_by_sha256(&self, sha256: &str) -> TitanResult<Option<BlobAsset>> {
        let assets = self.blob_assets.read();
        Ok(assets.iter().find(|a| a.sha256 == sha256).cloned())
    }
}
