//! Health endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::api::state::SharedCore;
use crate::cache::store::ByteCache;
use crate::persistence::store::EntityStore;

/// GET `/health`: store and cache liveness plus bus backlog.
pub async fn health(State(core): State<SharedCore>) -> Response {
    let store_ok = core.store.ping().await.is_ok();
    let cache_ok = core.cache.ping().await;

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "store": store_ok,
        "cache": cache_ok,
        "pendingEvents": core.bus.pending_count(),
        "activeSubscriptions": core.subscriptions.active_count(),
        "isLeader": core.leader.as_ref().map(|l| l.is_leader()),
    });
    (status, Json(body)).into_response()
}
