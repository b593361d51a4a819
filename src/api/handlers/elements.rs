//! SubmodelElement endpoints
//! (`/submodels/{id}/submodel-elements[/{idShortPath}]`).
//!
//! Element reads resolve idShortPaths inside the stored document and apply
//! the trailing content modifier. `$value` reads are served from the cached
//! element sub-keys when possible. Every element write persists the whole
//! parent Submodel row, so the parent's ETag and `updated_at` move with the
//! nested change.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::handlers::common;
use crate::api::params::ReadQuery;
use crate::api::responses::{
    bytes_response, created_response, no_content, page_response, projected_response,
};
use crate::api::state::{Core, SharedCore};
use crate::cache::store::ByteCache;
use crate::core::canonical::canonical_bytes;
use crate::core::elements;
use crate::core::error::TitanError;
use crate::core::model::{ElementKind, EntityKind};
use crate::core::path::resolve;
use crate::core::projection::{
    extract_value, project_element, ContentModifier, Level, ProjectionModifiers,
};
use crate::events::schema::EventType;
use crate::persistence::store::EntityStore;

async fn load_doc(core: &Core, submodel_b64: &str) -> ApiResult<(String, Value)> {
    let identifier = common::decode_path_id(submodel_b64)?;
    let doc = core
        .store
        .get_doc(EntityKind::Submodel, &identifier)
        .await
        .map_err(ApiError)?
        .ok_or_else(|| {
            ApiError(TitanError::not_found(
                EntityKind::Submodel.display_name(),
                &identifier,
            ))
        })?;
    Ok((identifier, doc))
}

/// Persist a rewritten Submodel document and fan out the element event.
async fn persist_element_change(
    core: &Core,
    identifier: &str,
    submodel_b64: &str,
    new_doc: &Value,
    event_type: EventType,
    id_short_path: &str,
    value_bytes: Option<Vec<u8>>,
) -> ApiResult<()> {
    core.store
        .update(EntityKind::Submodel, identifier, new_doc)
        .await
        .map_err(ApiError)?
        .ok_or_else(|| {
            ApiError(TitanError::not_found(
                EntityKind::Submodel.display_name(),
                identifier,
            ))
        })?;

    core.after_element_write(event_type, identifier, submodel_b64, id_short_path, value_bytes)
        .await;
    Ok(())
}

fn value_bytes_of(element: &Value) -> ApiResult<Vec<u8>> {
    canonical_bytes(&extract_value(element)).map_err(ApiError)
}

/// Strip container children for `level=core` listings.
fn strip_children(element: &Value) -> Value {
    let mut out = element.clone();
    if ElementKind::of(element).is_container() {
        if let Some(obj) = out.as_object_mut() {
            obj.remove("value");
        }
    }
    out
}

/// GET the root element collection of a submodel.
pub async fn list_elements(
    State(core): State<SharedCore>,
    Path(submodel_identifier): Path<String>,
    Query(query): Query<ReadQuery>,
) -> ApiResult<Response> {
    let modifiers = query.modifiers().map_err(ApiError)?;
    let (_, doc) = load_doc(&core, &submodel_identifier).await?;

    let elements: Vec<Value> = doc
        .get("submodelElements")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|e| {
                    let projected = crate::core::projection::apply_projection(
                        e,
                        &ProjectionModifiers {
                            extent: modifiers.extent,
                            ..Default::default()
                        },
                    );
                    if modifiers.level == Level::Core {
                        strip_children(&projected)
                    } else {
                        projected
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let body = serde_json::json!({
        "result": elements,
        "paging_metadata": {"cursor": null},
    });
    projected_response(&body, None)
}

/// POST a new element at the submodel root.
pub async fn post_root_element(
    State(core): State<SharedCore>,
    Path(submodel_identifier): Path<String>,
    Json(element): Json<Value>,
) -> ApiResult<Response> {
    let (identifier, doc) = load_doc(&core, &submodel_identifier).await?;
    let new_doc = elements::insert(&doc, None, &element).map_err(ApiError)?;

    let id_short = element
        .get("idShort")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let value_bytes = value_bytes_of(&element)?;
    persist_element_change(
        &core,
        &identifier,
        &submodel_identifier,
        &new_doc,
        EventType::Created,
        &id_short,
        Some(value_bytes),
    )
    .await?;

    let body = canonical_bytes(&element).map_err(ApiError)?;
    let location = format!("/submodels/{submodel_identifier}/submodel-elements/{id_short}");
    let etag = crate::core::canonical::etag_of(&body);
    Ok(created_response(body, &etag, &location))
}

/// GET an element (optionally with a trailing content modifier token).
pub async fn get_element(
    State(core): State<SharedCore>,
    Path((submodel_identifier, raw_path)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
) -> ApiResult<Response> {
    let (path, content) = ContentModifier::split_path(&raw_path);
    let mut modifiers = query.modifiers().map_err(ApiError)?;
    modifiers.content = content;

    // Cached element values answer `$value` reads without touching the
    // document
    if content == ContentModifier::Value {
        match core
            .cache
            .get_element_value(&submodel_identifier, path)
            .await
        {
            Ok(Some(bytes)) => return Ok(page_response(bytes)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "element cache probe failed"),
        }
    }

    let (identifier, doc) = load_doc(&core, &submodel_identifier).await?;
    let element = resolve(&doc, path).map_err(ApiError)?;
    let projected = project_element(element, &identifier, path, &modifiers);

    if content == ContentModifier::Value {
        let bytes = canonical_bytes(&projected).map_err(ApiError)?;
        if let Err(e) = core
            .cache
            .set_element_value(&submodel_identifier, path, &bytes, None)
            .await
        {
            tracing::warn!(error = %e, "element value cache write failed");
        }
        return Ok(page_response(bytes));
    }

    projected_response(&projected, None)
}

/// POST a new element into the container at the path.
pub async fn post_nested_element(
    State(core): State<SharedCore>,
    Path((submodel_identifier, parent_path)): Path<(String, String)>,
    Json(element): Json<Value>,
) -> ApiResult<Response> {
    let (identifier, doc) = load_doc(&core, &submodel_identifier).await?;
    let new_doc = elements::insert(&doc, Some(parent_path.as_str()), &element).map_err(ApiError)?;

    let id_short = element
        .get("idShort")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let full_path = if id_short.is_empty() {
        parent_path.clone()
    } else {
        format!("{parent_path}.{id_short}")
    };

    let value_bytes = value_bytes_of(&element)?;
    persist_element_change(
        &core,
        &identifier,
        &submodel_identifier,
        &new_doc,
        EventType::Created,
        &full_path,
        Some(value_bytes),
    )
    .await?;

    let body = canonical_bytes(&element).map_err(ApiError)?;
    let location = format!("/submodels/{submodel_identifier}/submodel-elements/{full_path}");
    let etag = crate::core::canonical::etag_of(&body);
    Ok(created_response(body, &etag, &location))
}

/// PUT a whole element replacement.
pub async fn put_element(
    State(core): State<SharedCore>,
    Path((submodel_identifier, raw_path)): Path<(String, String)>,
    Json(element): Json<Value>,
) -> ApiResult<Response> {
    let (path, content) = ContentModifier::split_path(&raw_path);
    if content != ContentModifier::Normal {
        return Err(ApiError(TitanError::invalid_path(
            raw_path.as_str(),
            "content modifiers are not allowed on replace",
        )));
    }

    let (identifier, doc) = load_doc(&core, &submodel_identifier).await?;
    let new_doc = elements::replace(&doc, path, &element).map_err(ApiError)?;

    let value_bytes = value_bytes_of(&element)?;
    persist_element_change(
        &core,
        &identifier,
        &submodel_identifier,
        &new_doc,
        EventType::Updated,
        path,
        Some(value_bytes),
    )
    .await?;

    let body = canonical_bytes(&element).map_err(ApiError)?;
    let etag = crate::core::canonical::etag_of(&body);
    Ok(bytes_response(body, &etag))
}

/// PATCH an element. With a trailing `$value` the body is the bare new
/// value; without it the body is a shallow field merge.
pub async fn patch_element(
    State(core): State<SharedCore>,
    Path((submodel_identifier, raw_path)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let (path, content) = ContentModifier::split_path(&raw_path);

    let (identifier, doc) = load_doc(&core, &submodel_identifier).await?;
    let new_doc = match content {
        ContentModifier::Value => elements::update_value(&doc, path, &body).map_err(ApiError)?,
        ContentModifier::Normal => elements::patch(&doc, path, &body).map_err(ApiError)?,
        _ => {
            return Err(ApiError(TitanError::invalid_path(
                raw_path.as_str(),
                "unsupported content modifier on patch",
            )))
        }
    };

    let element = resolve(&new_doc, path).map_err(ApiError)?;
    let value_bytes = value_bytes_of(element)?;
    persist_element_change(
        &core,
        &identifier,
        &submodel_identifier,
        &new_doc,
        EventType::Updated,
        path,
        Some(value_bytes),
    )
    .await?;

    Ok(no_content())
}

/// DELETE an element.
pub async fn delete_element(
    State(core): State<SharedCore>,
    Path((submodel_identifier, raw_path)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (path, content) = ContentModifier::split_path(&raw_path);
    if content != ContentModifier::Normal {
        return Err(ApiError(TitanError::invalid_path(
            raw_path.as_str(),
            "content modifiers are not allowed on delete",
        )));
    }

    let (identifier, doc) = load_doc(&core, &submodel_identifier).await?;
    let new_doc = elements::delete(&doc, path).map_err(ApiError)?;

    persist_element_change(
        &core,
        &identifier,
        &submodel_identifier,
        &new_doc,
        EventType::Deleted,
        path,
        None,
    )
    .await?;

    Ok(no_content())
}
