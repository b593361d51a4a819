//! Route table.
//!
//! Identifiers in path segments are unpadded Base64URL. Element paths are
//! matched as a trailing wildcard so dotted and indexed idShortPaths (and
//! their `$...` content suffixes) arrive as a single parameter.

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{
    concept_descriptions, elements, health, registry, shells, submodels,
};
use crate::api::state::SharedCore;
use crate::api::ws;

/// Build the complete router for a core instance.
pub fn build_router(core: SharedCore) -> Router {
    Router::new()
        // AAS Repository
        .route("/shells", get(shells::list_shells).post(shells::post_shell))
        .route(
            "/shells/:aas_identifier",
            get(shells::get_shell)
                .put(shells::put_shell)
                .delete(shells::delete_shell),
        )
        .route("/shells/:aas_identifier/$reference", get(shells::get_shell_reference))
        // Submodel Repository
        .route(
            "/submodels",
            get(submodels::list_submodels).post(submodels::post_submodel),
        )
        .route(
            "/submodels/:submodel_identifier",
            get(submodels::get_submodel)
                .put(submodels::put_submodel)
                .delete(submodels::delete_submodel),
        )
        .route(
            "/submodels/:submodel_identifier/$value",
            get(submodels::get_submodel_value),
        )
        .route(
            "/submodels/:submodel_identifier/$metadata",
            get(submodels::get_submodel_metadata),
        )
        .route(
            "/submodels/:submodel_identifier/$reference",
            get(submodels::get_submodel_reference),
        )
        // Submodel elements
        .route(
            "/submodels/:submodel_identifier/submodel-elements",
            get(elements::list_elements).post(elements::post_root_element),
        )
        .route(
            "/submodels/:submodel_identifier/submodel-elements/*id_short_path",
            get(elements::get_element)
                .post(elements::post_nested_element)
                .put(elements::put_element)
                .patch(elements::patch_element)
                .delete(elements::delete_element),
        )
        // Concept descriptions
        .route(
            "/concept-descriptions",
            get(concept_descriptions::list_concept_descriptions)
                .post(concept_descriptions::post_concept_description),
        )
        .route(
            "/concept-descriptions/:cd_identifier",
            get(concept_descriptions::get_concept_description)
                .put(concept_descriptions::put_concept_description)
                .delete(concept_descriptions::delete_concept_description),
        )
        // Registry
        .route(
            "/shell-descriptors",
            get(registry::list_shell_descriptors).post(registry::post_shell_descriptor),
        )
        .route(
            "/shell-descriptors/:descriptor_identifier",
            get(registry::get_shell_descriptor)
                .put(registry::put_shell_descriptor)
                .delete(registry::delete_shell_descriptor),
        )
        .route(
            "/submodel-descriptors",
            get(registry::list_submodel_descriptors).post(registry::post_submodel_descriptor),
        )
        .route(
            "/submodel-descriptors/:descriptor_identifier",
            get(registry::get_submodel_descriptor)
                .put(registry::put_submodel_descriptor)
                .delete(registry::delete_submodel_descriptor),
        )
        // Realtime and health
        .route("/ws/events", get(ws::ws_events))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(core)
}
