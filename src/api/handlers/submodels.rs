//! Submodel Repository endpoints (`/submodels`).
//!
//! Writes run oversized Blob payloads through the externalizer before the
//! authoritative write, so the stored document carries storage URIs instead
//! of inline payloads.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::handlers::common;
use crate::api::params::ReadQuery;
use crate::api::responses::{bytes_response, created_response, projected_response};
use crate::api::state::SharedCore;
use crate::core::error::TitanError;
use crate::core::ids::encode_id;
use crate::core::model::{identifier_of, validate_entity, EntityKind};
use crate::core::projection::{
    extract_metadata, extract_submodel_value, reference_for_submodel,
};
use crate::events::schema::EventType;
use crate::persistence::store::EntityStore;

pub async fn list_submodels(
    State(core): State<SharedCore>,
    Query(query): Query<ReadQuery>,
) -> ApiResult<Response> {
    common::list_entities(&core, EntityKind::Submodel, &query).await
}

pub async fn post_submodel(
    State(core): State<SharedCore>,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    validate_entity(EntityKind::Submodel, &doc).map_err(ApiError)?;
    let identifier = identifier_of(&doc).map_err(ApiError)?.to_string();
    let identifier_b64 = encode_id(&identifier);

    let (doc, assets) = core
        .blobs
        .externalize(core.store.as_ref(), &identifier, &doc)
        .await
        .map_err(ApiError)?;

    let (doc_bytes, etag) = core
        .store
        .create(EntityKind::Submodel, &doc)
        .await
        .map_err(ApiError)?;
    for asset in &assets {
        core.store.upsert_blob_asset(asset).await.map_err(ApiError)?;
    }

    core.after_entity_write(
        EntityKind::Submodel,
        EventType::Created,
        &identifier,
        &identifier_b64,
        &doc,
        doc_bytes.clone(),
        &etag,
    )
    .await;

    let location = format!("/submodels/{identifier_b64}");
    Ok(created_response(doc_bytes, &etag, &location))
}

pub async fn get_submodel(
    State(core): State<SharedCore>,
    Path(submodel_identifier): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    common::get_entity(&core, EntityKind::Submodel, &submodel_identifier, &query, &headers).await
}

pub async fn put_submodel(
    State(core): State<SharedCore>,
    Path(submodel_identifier): Path<String>,
    headers: HeaderMap,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    let identifier = common::decode_path_id(&submodel_identifier)?;
    validate_entity(EntityKind::Submodel, &doc).map_err(ApiError)?;
    if identifier_of(&doc).map_err(ApiError)? != identifier {
        return Err(ApiError(TitanError::InvalidDocument(
            "document id does not match the path identifier".into(),
        )));
    }

    common::check_if_match(&core, EntityKind::Submodel, &identifier, &headers).await?;

    let (doc, assets) = core
        .blobs
        .externalize(core.store.as_ref(), &identifier, &doc)
        .await
        .map_err(ApiError)?;

    let (doc_bytes, etag) = core
        .store
        .update(EntityKind::Submodel, &identifier, &doc)
        .await
        .map_err(ApiError)?
        .ok_or_else(|| {
            ApiError(TitanError::not_found(
                EntityKind::Submodel.display_name(),
                &identifier,
            ))
        })?;
    for asset in &assets {
        core.store.upsert_blob_asset(asset).await.map_err(ApiError)?;
    }

    core.after_entity_write(
        EntityKind::Submodel,
        EventType::Updated,
        &identifier,
        &submodel_identifier,
        &doc,
        doc_bytes.clone(),
        &etag,
    )
    .await;

    Ok(bytes_response(doc_bytes, &etag))
}

pub async fn delete_submodel(
    State(core): State<SharedCore>,
    Path(submodel_identifier): Path<String>,
) -> ApiResult<Response> {
    common::delete_entity(&core, EntityKind::Submodel, &submodel_identifier).await
}

async fn load_doc(
    core: &SharedCore,
    submodel_identifier: &str,
) -> ApiResult<(String, Value, String)> {
    let identifier = common::decode_path_id(submodel_identifier)?;
    let (doc_bytes, etag) =
        common::current_bytes(core, EntityKind::Submodel, &identifier, submodel_identifier).await?;
    let doc: Value = serde_json::from_slice(&doc_bytes)
        .map_err(|e| ApiError(TitanError::Internal(format!("stored bytes unparsable: {e}"))))?;
    Ok((identifier, doc, etag))
}

/// `$value` projection of a whole submodel.
pub async fn get_submodel_value(
    State(core): State<SharedCore>,
    Path(submodel_identifier): Path<String>,
) -> ApiResult<Response> {
    let (_, doc, etag) = load_doc(&core, &submodel_identifier).await?;
    projected_response(&extract_submodel_value(&doc), Some(&etag))
}

/// `$metadata` projection of a whole submodel.
pub async fn get_submodel_metadata(
    State(core): State<SharedCore>,
    Path(submodel_identifier): Path<String>,
) -> ApiResult<Response> {
    let (_, doc, etag) = load_doc(&core, &submodel_identifier).await?;
    projected_response(&extract_metadata(&doc), Some(&etag))
}

/// `$reference` projection of a whole submodel.
pub async fn get_submodel_reference(
    State(core): State<SharedCore>,
    Path(submodel_identifier): Path<String>,
) -> ApiResult<Response> {
    let (identifier, _, _) = load_doc(&core, &submodel_identifier).await?;
    projected_response(&reference_for_submodel(&identifier), None)
}
