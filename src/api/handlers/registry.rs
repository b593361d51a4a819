//! Registry endpoints (`/shell-descriptors`, `/submodel-descriptors`).
//!
//! Descriptors share the Repository invariants and lifecycle but live in
//! their own namespace. Discovery filters: `globalAssetId` and the
//! specific-asset-id pair on shell descriptors, `semanticId` on submodel
//! descriptors.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use crate::api::error::ApiResult;
use crate::api::handlers::common;
use crate::api::params::ReadQuery;
use crate::api::state::SharedCore;
use crate::core::model::EntityKind;

// -- shell descriptors ------------------------------------------------------

pub async fn list_shell_descriptors(
    State(core): State<SharedCore>,
    Query(query): Query<ReadQuery>,
) -> ApiResult<Response> {
    common::list_entities(&core, EntityKind::AasDescriptor, &query).await
}

pub async fn post_shell_descriptor(
    State(core): State<SharedCore>,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    common::create_entity(&core, EntityKind::AasDescriptor, "/shell-descriptors", doc).await
}

pub async fn get_shell_descriptor(
    State(core): State<SharedCore>,
    Path(descriptor_identifier): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    common::get_entity(
        &core,
        EntityKind::AasDescriptor,
        &descriptor_identifier,
        &query,
        &headers,
    )
    .await
}

pub async fn put_shell_descriptor(
    State(core): State<SharedCore>,
    Path(descriptor_identifier): Path<String>,
    headers: HeaderMap,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    common::update_entity(
        &core,
        EntityKind::AasDescriptor,
        &descriptor_identifier,
        doc,
        &headers,
    )
    .await
}

pub async fn delete_shell_descriptor(
    State(core): State<SharedCore>,
    Path(descriptor_identifier): Path<String>,
) -> ApiResult<Response> {
    common::delete_entity(&core, EntityKind::AasDescriptor, &descriptor_identifier).await
}

// -- submodel descriptors ---------------------------------------------------

pub async fn list_submodel_descriptors(
    State(core): State<SharedCore>,
    Query(query): Query<ReadQuery>,
) -> ApiResult<Response> {
    common::list_entities(&core, EntityKind::SubmodelDescriptor, &query).await
}

pub async fn post_submodel_descriptor(
    State(core): State<SharedCore>,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    common::create_entity(
        &core,
        EntityKind::SubmodelDescriptor,
        "/submodel-descriptors",
        doc,
    )
    .await
}

pub async fn get_submodel_descriptor(
    State(core): State<SharedCore>,
    Path(descriptor_identifier): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    common::get_entity(
        &core,
        EntityKind::SubmodelDescriptor,
        &descriptor_identifier,
        &query,
        &headers,
    )
    .await
}

pub async fn put_submodel_descriptor(
    State(core): State<SharedCore>,
    Path(descriptor_identifier): Path<String>,
    headers: HeaderMap,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    common::update_entity(
        &core,
        EntityKind::SubmodelDescriptor,
        &descriptor_identifier,
        doc,
        &headers,
    )
    .await
}

pub async fn delete_submodel_descriptor(
    State(core): State<SharedCore>,
    Path(descriptor_identifier): Path<String>,
) -> ApiResult<Response> {
    common::delete_entity(&core, EntityKind::SubmodelDescriptor, &descriptor_identifier).await
}
