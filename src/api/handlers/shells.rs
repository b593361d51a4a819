//! AAS Repository endpoints (`/shells`).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::handlers::common;
use crate::api::params::ReadQuery;
use crate::api::responses::projected_response;
use crate::api::state::SharedCore;
use crate::core::model::EntityKind;
use crate::core::projection::reference_for_aas;
use crate::persistence::store::EntityStore;

pub async fn list_shells(
    State(core): State<SharedCore>,
    Query(query): Query<ReadQuery>,
) -> ApiResult<Response> {
    common::list_entities(&core, EntityKind::Aas, &query).await
}

pub async fn post_shell(
    State(core): State<SharedCore>,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    common::create_entity(&core, EntityKind::Aas, "/shells", doc).await
}

pub async fn get_shell(
    State(core): State<SharedCore>,
    Path(aas_identifier): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    common::get_entity(&core, EntityKind::Aas, &aas_identifier, &query, &headers).await
}

pub async fn put_shell(
    State(core): State<SharedCore>,
    Path(aas_identifier): Path<String>,
    headers: HeaderMap,
    Json(doc): Json<Value>,
) -> ApiResult<Response> {
    common::update_entity(&core, EntityKind::Aas, &aas_identifier, doc, &headers).await
}

pub async fn delete_shell(
    State(core): State<SharedCore>,
    Path(aas_identifier): Path<String>,
) -> ApiResult<Response> {
    common::delete_entity(&core, EntityKind::Aas, &aas_identifier).await
}

/// `$reference` projection of a shell.
pub async fn get_shell_reference(
    State(core): State<SharedCore>,
    Path(aas_identifier): Path<String>,
) -> ApiResult<Response> {
    let identifier = common::decode_path_id(&aas_identifier)?;
    // Confirm existence before answering
    let exists = core
        .store
        .exists(EntityKind::Aas, &identifier)
        .await
        .map_err(ApiError)?;
    if !exists {
        return Err(ApiError(crate::core::error::TitanError::not_found(
            EntityKind::Aas.display_name(),
            &identifier,
        )));
    }
    projected_response(&reference_for_aas(&identifier), None)
}
