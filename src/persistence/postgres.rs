//! PostgreSQL implementation of the authoritative store.
//!
//! Row shape per entity table: internal UUID key, unique `identifier` and
//! `identifier_b64`, one extracted secondary column, JSONB `doc`, canonical
//! `doc_bytes`, `etag`, and timestamps. Writes are transactional; a unique
//! violation on the identifier maps to `AlreadyExists`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

use crate::core::canonical::canonical_triple;
use crate::core::error::{TitanError, TitanResult};
use crate::core::ids::{encode_id, validate_identifier_length};
use crate::core::model::{
    extract_global_asset_id, extract_semantic_id, identifier_of, EntityKind,
};
use crate::persistence::blob::BlobAsset;
use crate::persistence::schema::{secondary_column, table_name};
use crate::persistence::store::{
    decode_cursor, encode_cursor, EntityStore, ListFilter, Page, PageItem,
};

/// PostgreSQL-backed entity store.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn secondary_value(kind: EntityKind, doc: &Value) -> Option<String> {
        match kind {
            EntityKind::Aas | EntityKind::AasDescriptor => extract_global_asset_id(doc),
            EntityKind::Submodel | EntityKind::SubmodelDescriptor => extract_semantic_id(doc),
            EntityKind::ConceptDescription => doc
                .get("idShort")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

fn map_sqlx_error(e: sqlx::Error, kind: EntityKind, identifier: &str) -> TitanError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.code().as_deref() == Some("23505") {
            return TitanError::already_exists(kind.display_name(), identifier);
        }
    }
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            TitanError::StoreUnavailable(e.to_string())
        }
        other => TitanError::Internal(other.to_string()),
    }
}

fn store_unavailable(e: sqlx::Error) -> TitanError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            TitanError::StoreUnavailable(e.to_string())
        }
        other => TitanError::Internal(other.to_string()),
    }
}

fn push_filter_clauses<'a>(
    builder: &mut QueryBuilder<'a, sqlx::Postgres>,
    kind: EntityKind,
    filter: &'a ListFilter,
) {
    if let Some(id_short) = &filter.id_short {
        builder
            .push(" AND doc->>'idShort' = ")
            .push_bind(id_short.as_str());
    }
    if let Some(semantic_id) = &filter.semantic_id {
        builder
            .push(format!(" AND {} = ", secondary_column(kind)))
            .push_bind(semantic_id.as_str());
    }
    if let Some(global_asset_id) = &filter.global_asset_id {
        builder
            .push(format!(" AND {} = ", secondary_column(kind)))
            .push_bind(global_asset_id.as_str());
    }
    if let Some((name, value)) = &filter.specific_asset_id {
        builder
            .push(" AND doc->'assetInformation'->'specificAssetIds' @> ")
            .push_bind(json!([{"name": name, "value": value}]))
            .push("::jsonb");
    }
    if let Some(case_of) = &filter.is_case_of {
        builder
            .push(" AND doc->'isCaseOf' @> ")
            .push_bind(json!([{"keys": [{"value": case_of}]}]))
            .push("::jsonb");
    }
    if let Some(data_spec) = &filter.data_specification_ref {
        builder
            .push(" AND doc->'embeddedDataSpecifications' @> ")
            .push_bind(json!([{"dataSpecification": {"keys": [{"value": data_spec}]}}]))
            .push("::jsonb");
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get_bytes(
        &self,
        kind: EntityKind,
        identifier: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>> {
        let sql = format!(
            "SELECT doc_bytes, etag FROM {} WHERE identifier = $1",
            table_name(kind)
        );
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_unavailable)?;
        Ok(row.map(|r| (r.get::<Vec<u8>, _>("doc_bytes"), r.get::<String, _>("etag").trim().to_string())))
    }

    async fn get_bytes_by_b64(
        &self,
        kind: EntityKind,
        identifier_b64: &str,
    ) -> TitanResult<Option<(Vec<u8>, String)>> {
        let sql = format!(
            "SELECT doc_bytes, etag FROM {} WHERE identifier_b64 = $1",
            table_name(kind)
        );
        let row = sqlx::query(&sql)
            .bind(identifier_b64)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_unavailable)?;
        Ok(row.map(|r| (r.get::<Vec<u8>, _>("doc_bytes"), r.get::<String, _>("etag").trim().to_string())))
    }

    async fn get_doc(&self, kind: EntityKind, identifier: &str) -> TitanResult<Option<Value>> {
        let sql = format!("SELECT doc FROM {} WHERE identifier = $1", table_name(kind));
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_unavailable)?;
        Ok(row.map(|r| r.get::<Value, _>("doc")))
    }

    async fn create(&self, kind: EntityKind, doc: &Value) -> TitanResult<(Vec<u8>, String)> {
        let identifier = identifier_of(doc)?.to_string();
        validate_identifier_length(&identifier)?;
        let (pruned, doc_bytes, etag) = canonical_triple(doc)?;
        let secondary = Self::secondary_value(kind, &pruned);

        let sql = format!(
            "INSERT INTO {} (id, identifier, identifier_b64, {}, doc, doc_bytes, etag) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            table_name(kind),
            secondary_column(kind)
        );
        sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&identifier)
            .bind(encode_id(&identifier))
            .bind(secondary)
            .bind(&pruned)
            .bind(&doc_bytes)
            .bind(&etag)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, kind, &identifier))?;

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
        let secondary = Self::secondary_value(kind, &pruned);

        let sql = format!(
            "UPDATE {} SET {} = $1, doc = $2, doc_bytes = $3, etag = $4, updated_at = now() \
             WHERE identifier = $5",
            table_name(kind),
            secondary_column(kind)
        );
        let result = sqlx::query(&sql)
            .bind(secondary)
            .bind(&pruned)
            .bind(&doc_bytes)
            .bind(&etag)
            .bind(identifier)
            .execute(&self.pool)
            .await
            .map_err(store_unavailable)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some((doc_bytes, etag)))
    }

    async fn delete(&self, kind: EntityKind, identifier: &str) -> TitanResult<bool> {
        let sql = format!("DELETE FROM {} WHERE identifier = $1", table_name(kind));
        let result = sqlx::query(&sql)
            .bind(identifier)
            .execute(&self.pool)
            .await
            .map_err(store_unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, kind: EntityKind, identifier: &str) -> TitanResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE identifier = $1",
            table_name(kind)
        );
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_unavailable)?;
        Ok(row.is_some())
    }

    async fn list_page(
        &self,
        kind: EntityKind,
        limit: usize,
        cursor: Option<&str>,
        filter: &ListFilter,
    ) -> TitanResult<Page> {
        let cursor_key = cursor.map(decode_cursor).transpose()?;

        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT doc_bytes, etag, created_at, id FROM {} WHERE TRUE",
            table_name(kind)
        ));
        if let Some((created_at, row_id)) = cursor_key {
            builder
                .push(" AND (created_at, id) > (")
                .push_bind(created_at)
                .push(", ")
                .push_bind(row_id)
                .push(")");
        }
        push_filter_clauses(&mut builder, kind, filter);
        builder.push(" ORDER BY created_at ASC, id ASC LIMIT ");
        // Fetch one extra row to detect whether a further page exists
        builder.push_bind((limit + 1) as i64);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(store_unavailable)?;

        let mut items: Vec<PageItem> = rows
            .into_iter()
            .map(|r| PageItem {
                doc_bytes: r.get::<Vec<u8>, _>("doc_bytes"),
                etag: r.get::<String, _>("etag").trim().to_string(),
                created_at: r.get::<DateTime<Utc>, _>("created_at"),
                row_id: r.get::<Uuid, _>("id"),
            })
            .collect();

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            // The cursor points at the last returned row; with limit 0 it
            // stays at the caller's position
            match items.last() {
                Some(last) => Some(encode_cursor(last.created_at, last.row_id)),
                None => Some(
                    cursor
                        .map(str::to_string)
                        .unwrap_or_else(crate::persistence::store::origin_cursor),
                ),
            }
        } else {
            None
        };

        Ok(Page { items, next_cursor })
    }

    async fn ping(&self) -> TitanResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_unavailable)?;
        Ok(())
    }

    // -- blob asset registry -----------------------------------------------

    async fn upsert_blob_asset(&self, asset: &BlobAsset) -> TitanResult<()> {
        sqlx::query(
            "INSERT INTO blob_assets \
             (id, submodel_identifier, id_short_path, storage_uri, content_type, size_bytes, sha256) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (submodel_identifier, id_short_path) DO UPDATE SET \
             storage_uri = EXCLUDED.storage_uri, content_type = EXCLUDED.content_type, \
             size_bytes = EXCLUDED.size_bytes, sha256 = EXCLUDED.sha256, updated_at = now()",
        )
        .bind(asset.id)
        .bind(&asset.submodel_identifier)
        .bind(&asset.id_short_path)
        .bind(&asset.storage_uri)
        .bind(&asset.content_type)
        .bind(asset.size_bytes)
        .bind(&asset.sha256)
        .execute(&self.pool)
        .await
        .map_err(store_unavailable)?;
        Ok(())
    }

    async fn blob_assets_for(&self, submodel_identifier: &str) -> TitanResult<Vec<BlobAsset>> {
        let rows = sqlx::query(
            "SELECT id, submodel_identifier, id_short_path, storage_uri, content_type, \
             size_bytes, sha256, created_at FROM blob_assets WHERE submodel_identifier = $1",
        )
        .bind(submodel_identifier)
        .fetch_all(&self.pool)
        .await
        .map_err(store_unavailable)?;
        Ok(rows.into_iter().map(blob_asset_from_row).collect())
    }

    async fn delete_blob_assets(&self, submodel_identifier: &str) -> TitanResult<Vec<BlobAsset>> {
        let rows = sqlx::query(
            "DELETE FROM blob_assets WHERE submodel_identifier = $1 \
             RETURNING id, submodel_identifier, id_short_path, storage_uri, content_type, \
             size_bytes, sha256, created_at",
        )
        .bind(submodel_identifier)
        .fetch_all(&self.pool)
        .await
        .map_err(store_unavailable)?;
        Ok(rows.into_iter().map(blob_asset_from_row).collect())
    }

    async fn find_blob_by_sha256(&self, sha256: &str) -> TitanResult<Option<BlobAsset>> {
        let row = sqlx::query(
            "SELECT id, submodel_identifier, id_short_path, storage_uri, content_type, \
             size_bytes, sha256, created_at FROM blob_assets WHERE sha256 = $1 LIMIT 1",
        )
        .bind(sha256)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_unavailable)?;
        Ok(row.map(blob_asset_from_row))
    }
}

fn blob_asset_from_row(row: sqlx::postgres::PgRow) -> BlobAsset {
    BlobAsset {
        id: row.get("id"),
        submodel_identifier: row.get("submodel_identifier"),
        id_short_path: row.get("id_short_path"),
        storage_uri: row.get("storage_uri"),
        content_type: row.get("content_type"),
        size_bytes: row.get("size_bytes"),
        sha256: row.get::<String, _>("sha256").trim().to_string(),
        created_at: row.get("created_at"),
    }
}
