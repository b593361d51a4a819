//! Shared request orchestration for top-level entities.
//!
//! The read path: decode the identifier, probe the hot cache when no
//! projection is requested, fall back to the authoritative store, populate
//! the cache on miss, honor `If-None-Match` before any projection work.
//!
//! The write path: decode and validate, check `If-Match` against the
//! current ETag, persist (the store commits), then update the cache,
//! publish the event, and broadcast the invalidation, strictly in that
//! order.

use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::params::{etag_matches, ReadQuery};
use crate::api::responses::{
    bytes_response, created_response, no_content, not_modified, page_response, projected_response,
};
use crate::api::state::Core;
use crate::cache::store::ByteCache;
use crate::core::error::TitanError;
use crate::core::ids::{decode_id, encode_id};
use crate::core::model::{identifier_of, validate_entity, EntityKind};
use crate::core::projection::apply_projection;
use crate::events::schema::EventType;
use crate::persistence::store::{frame_page, EntityStore};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decode a path identifier, mapping bad encodings to 400.
pub fn decode_path_id(identifier_b64: &str) -> ApiResult<String> {
    decode_id(identifier_b64).map_err(ApiError)
}

/// Fetch the current `(bytes, etag)` for a read: hot cache first, then the
/// authoritative store with a cache refill.
pub async fn current_bytes(
    core: &Core,
    kind: EntityKind,
    identifier: &str,
    identifier_b64: &str,
) -> ApiResult<(Vec<u8>, String)> {
    match core.cache.get(kind, identifier_b64).await {
        Ok(Some(hit)) => return Ok(hit),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "cache probe failed, falling back to store"),
    }

    let (doc_bytes, etag) = core
        .store
        .get_bytes(kind, identifier)
        .await
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(TitanError::not_found(kind.display_name(), identifier)))?;

    if let Err(e) = core
        .cache
        .set(kind, identifier_b64, &doc_bytes, &etag, None)
        .await
    {
        tracing::warn!(error = %e, "cache refill failed");
    }
    Ok((doc_bytes, etag))
}

/// GET an entity by encoded identifier with fast/slow path selection.
pub async fn get_entity(
    core: &Core,
    kind: EntityKind,
    identifier_b64: &str,
    query: &ReadQuery,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let identifier = decode_path_id(identifier_b64)?;
    let modifiers = query.modifiers().map_err(ApiError)?;

    let (doc_bytes, etag) = current_bytes(core, kind, &identifier, identifier_b64).await?;

    // A matching If-None-Match short-circuits before any projection work
    if let Some(candidate) = header(headers, "if-none-match") {
        if etag_matches(candidate, &etag) {
            return Ok(not_modified());
        }
    }

    if modifiers.is_fast_path() {
        return Ok(bytes_response(doc_bytes, &etag));
    }

    let doc: Value = serde_json::from_slice(&doc_bytes)
        .map_err(|e| ApiError(TitanError::Internal(format!("stored bytes unparsable: {e}"))))?;
    let projected = apply_projection(&doc, &modifiers);
    projected_response(&projected, Some(&etag))
}

/// GET a paginated collection. Without modifiers the response is framed
/// directly from stored bytes; with modifiers each row is parsed and
/// projected.
pub async fn list_entities(
    core: &Core,
    kind: EntityKind,
    query: &ReadQuery,
) -> ApiResult<Response> {
    let limit = query.resolve_limit().map_err(ApiError)?;
    let modifiers = query.modifiers().map_err(ApiError)?;
    let filter = query.filter();

    let page = core
        .store
        .list_page(kind, limit, query.cursor.as_deref(), &filter)
        .await
        .map_err(ApiError)?;

    if modifiers.is_fast_path() {
        return Ok(page_response(frame_page(&page)));
    }

    let mut items = Vec::with_capacity(page.items.len());
    for item in &page.items {
        let doc: Value = serde_json::from_slice(&item.doc_bytes)
            .map_err(|e| ApiError(TitanError::Internal(format!("stored bytes unparsable: {e}"))))?;
        items.push(apply_projection(&doc, &modifiers));
    }
    let body = serde_json::json!({
        "result": items,
        "paging_metadata": {"cursor": page.next_cursor},
    });
    projected_response(&body, None)
}

/// POST a new entity.
pub async fn create_entity(
    core: &Core,
    kind: EntityKind,
    base_path: &str,
    doc: Value,
) -> ApiResult<Response> {
    validate_entity(kind, &doc).map_err(ApiError)?;
    let identifier = identifier_of(&doc).map_err(ApiError)?.to_string();
    let identifier_b64 = encode_id(&identifier);

    let (doc_bytes, etag) = core.store.create(kind, &doc).await.map_err(ApiError)?;

    core.after_entity_write(
        kind,
        EventType::Created,
        &identifier,
        &identifier_b64,
        &doc,
        doc_bytes.clone(),
        &etag,
    )
    .await;

    let location = format!("{base_path}/{identifier_b64}");
    Ok(created_response(doc_bytes, &etag, &location))
}

/// PUT a whole replacement.
pub async fn update_entity(
    core: &Core,
    kind: EntityKind,
    identifier_b64: &str,
    doc: Value,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let identifier = decode_path_id(identifier_b64)?;
    validate_entity(kind, &doc).map_err(ApiError)?;
    if identifier_of(&doc).map_err(ApiError)? != identifier {
        return Err(ApiError(TitanError::InvalidDocument(
            "document id does not match the path identifier".into(),
        )));
    }

    check_if_match(core, kind, &identifier, headers).await?;

    let (doc_bytes, etag) = core
        .store
        .update(kind, &identifier, &doc)
        .await
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(TitanError::not_found(kind.display_name(), &identifier)))?;

    core.after_entity_write(
        kind,
        EventType::Updated,
        &identifier,
        identifier_b64,
        &doc,
        doc_bytes.clone(),
        &etag,
    )
    .await;

    Ok(bytes_response(doc_bytes, &etag))
}

/// Enforce `If-Match` against the current ETag when the header is present.
pub async fn check_if_match(
    core: &Core,
    kind: EntityKind,
    identifier: &str,
    headers: &HeaderMap,
) -> ApiResult<()> {
    let Some(candidate) = header(headers, "if-match") else {
        return Ok(());
    };
    let current = core
        .store
        .get_bytes(kind, identifier)
        .await
        .map_err(ApiError)?;
    match current {
        Some((_, etag)) if etag_matches(candidate, &etag) => Ok(()),
        Some(_) => Err(ApiError(TitanError::PreconditionFailed)),
        // Absent rows fall through to the 404 of the write itself
        None => Ok(()),
    }
}

/// DELETE an entity.
pub async fn delete_entity(
    core: &Core,
    kind: EntityKind,
    identifier_b64: &str,
) -> ApiResult<Response> {
    let identifier = decode_path_id(identifier_b64)?;

    let deleted = core
        .store
        .delete(kind, &identifier)
        .await
        .map_err(ApiError)?;
    if !deleted {
        return Err(ApiError(TitanError::not_found(kind.display_name(), &identifier)));
    }

    core.after_entity_delete(kind, &identifier, identifier_b64).await;
    Ok(no_content())
}
