//! ConceptDescription Repository endpoints (`/concept-descriptions`).
//!
//! Listing supports the `idShort`, `isCaseOf`, and `dataSpecificationRef`
//! discovery filters.

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

pub async fn list_concept_descriptions(
    State(core): State<SharedCore>,
    Query(query): Query<ReadQuery>,
) -> ApiResult<Response> {
    common::list_entities(&core, EntityKind::ConceptDescription, &query).await
}

pub async fn post_concept_description(
    State(core): State<SharedCore>,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    common::create_entity(&core, EntityKind::ConceptDescription, "/concept-descriptions", doc).await
}

pub async fn get_concept_description(
    State(core): State<SharedCore>,
    Path(cd_identifier): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    common::get_entity(&core, EntityKind::ConceptDescription, &cd_identifier, &query, &headers)
        .await
}

pub async fn put_concept_description(
    State(core): State<SharedCore>,
    Path(cd_identifier): Path<String>,
    headers: HeaderMap,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    common::update_entity(&core, EntityKind::ConceptDescription, &cd_identifier, doc, &headers)
        .await
}

pub async fn delete_concept_description(
    State(core): State<SharedCore>,
    Path(cd_identifier): Path<String>,
) -> ApiResult<Response> {
    common::delete_entity(&core, EntityKind::ConceptDescription, &cd_identifier).await
}
