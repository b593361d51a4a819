//! End-to-end tests for the Repository API over the embedded backends.
//!
//! Each test builds a standalone core, starts the background machinery,
//! and drives the axum router directly.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use titan_aas::api::{build_router, Core, SharedCore};
use titan_aas::config::TitanConfig;

async fn setup() -> (Router, SharedCore) {
    let core = Core::standalone(TitanConfig::default());
    core.start().await;
    (build_router(core.clone()), core)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn etag_of(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::ETAG)
        .unwrap()
        .to_str()
        .unwrap()
        .trim_matches('"')
        .to_string()
}

fn sample_shell() -> Value {
    json!({
        "id": "urn:x:1",
        "idShort": "A",
        "assetInformation": {"assetKind": "Instance"}
    })
}

fn sample_submodel() -> Value {
    json!({
        "id": "urn:x:sm",
        "idShort": "Machine",
        "submodelElements": [
            {
                "modelType": "SubmodelElementCollection",
                "idShort": "Outer",
                "value": [
                    {"modelType": "Property", "idShort": "P", "valueType": "xs:string", "value": "v"}
                ]
            }
        ]
    })
}

#[tokio::test]
async fn test_create_then_read_fast_path() {
    let (router, _core) = setup().await;

    let created = router
        .clone()
        .oneshot(json_request("POST", "/shells", sample_shell()))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(
        created.headers().get(header::LOCATION).unwrap(),
        "/shells/dXJuOng6MQ"
    );
    let etag = etag_of(&created);
    assert_eq!(etag.len(), 64);

    let read = router
        .clone()
        .oneshot(get_request("/shells/dXJuOng6MQ"))
        .await
        .unwrap();
    assert_eq!(read.status(), StatusCode::OK);
    assert_eq!(etag_of(&read), etag);

    let doc = body_json(read).await;
    assert_eq!(doc["id"], "urn:x:1");
    assert_eq!(doc["idShort"], "A");
}

#[tokio::test]
async fn test_conditional_read_returns_304() {
    let (router, _core) = setup().await;

    let created = router
        .clone()
        .oneshot(json_request("POST", "/shells", sample_shell()))
        .await
        .unwrap();
    let etag = etag_of(&created);

    let request = Request::builder()
        .uri("/shells/dXJuOng6MQ")
        .header("If-None-Match", format!("\"{etag}\""))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_optimistic_update_with_if_match() {
    let (router, _core) = setup().await;

    let created = router
        .clone()
        .oneshot(json_request("POST", "/shells", sample_shell()))
        .await
        .unwrap();
    let etag1 = etag_of(&created);

    let mut updated_doc = sample_shell();
    updated_doc["idShort"] = json!("B");
    let request = Request::builder()
        .method("PUT")
        .uri("/shells/dXJuOng6MQ")
        .header(header::CONTENT_TYPE, "application/json")
        .header("If-Match", format!("\"{etag1}\""))
        .body(Body::from(updated_doc.to_string()))
        .unwrap();
    let updated = router.clone().oneshot(request).await.unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let etag2 = etag_of(&updated);
    assert_ne!(etag1, etag2);

    // Replaying with the stale ETag fails the precondition
    let mut stale_doc = sample_shell();
    stale_doc["idShort"] = json!("C");
    let request = Request::builder()
        .method("PUT")
        .uri("/shells/dXJuOng6MQ")
        .header(header::CONTENT_TYPE, "application/json")
        .header("If-Match", format!("\"{etag1}\""))
        .body(Body::from(stale_doc.to_string()))
        .unwrap();
    let stale = router.clone().oneshot(request).await.unwrap();
    assert_eq!(stale.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let (router, _core) = setup().await;

    let first = router
        .clone()
        .oneshot(json_request("POST", "/shells", sample_shell()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = router
        .clone()
        .oneshot(json_request("POST", "/shells", sample_shell()))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let body = body_json(second).await;
    assert_eq!(body["messages"][0]["code"], "AlreadyExists");
    assert_eq!(body["messages"][0]["messageType"], "Error");
}

#[tokio::test]
async fn test_invalid_identifier_encoding_is_rejected() {
    let (router, _core) = setup().await;
    let response = router
        .clone()
        .oneshot(get_request("/shells/not%20base64!"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["messages"][0]["code"], "InvalidIdentifierEncoding");
}

#[tokio::test]
async fn test_missing_entity_is_404() {
    let (router, _core) = setup().await;
    // "dWdo" decodes to "ugh"
    let response = router.clone().oneshot(get_request("/shells/dWdo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_then_read_404() {
    let (router, _core) = setup().await;

    router
        .clone()
        .oneshot(json_request("POST", "/shells", sample_shell()))
        .await
        .unwrap();

    let deleted = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/shells/dXJuOng6MQ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let read = router
        .clone()
        .oneshot(get_request("/shells/dXJuOng6MQ"))
        .await
        .unwrap();
    assert_eq!(read.status(), StatusCode::NOT_FOUND);

    // A second delete is a no-op 404
    let again = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/shells/dXJuOng6MQ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_element_navigation_value_projection() {
    let (router, core) = setup().await;

    let created = router
        .clone()
        .oneshot(json_request("POST", "/submodels", sample_submodel()))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let sm_b64 = titan_aas::core::ids::encode_id("urn:x:sm");
    let response = router
        .clone()
        .oneshot(get_request(&format!(
            "/submodels/{sm_b64}/submodel-elements/Outer.P/$value"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value, json!("v"));

    core.shutdown().await;
}

#[tokio::test]
async fn test_projection_core_level_strips_elements() {
    let (router, _core) = setup().await;

    router
        .clone()
        .oneshot(json_request("POST", "/submodels", sample_submodel()))
        .await
        .unwrap();

    let sm_b64 = titan_aas::core::ids::encode_id("urn:x:sm");
    let response = router
        .clone()
        .oneshot(get_request(&format!("/submodels/{sm_b64}?level=core")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert_eq!(doc["id"], "urn:x:sm");
    assert!(doc.get("submodelElements").is_none());
}

#[tokio::test]
async fn test_element_patch_value_bumps_parent_etag() {
    let (router, core) = setup().await;

    let created = router
        .clone()
        .oneshot(json_request("POST", "/submodels", sample_submodel()))
        .await
        .unwrap();
    let etag1 = etag_of(&created);

    let sm_b64 = titan_aas::core::ids::encode_id("urn:x:sm");
    let patched = router
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/submodels/{sm_b64}/submodel-elements/Outer.P/$value"),
            json!("patched"),
        ))
        .await
        .unwrap();
    assert_eq!(patched.status(), StatusCode::NO_CONTENT);

    // Quiesce the bus so the cache reflects the last event for the entity
    core.bus.drain().await;

    let read = router
        .clone()
        .oneshot(get_request(&format!("/submodels/{sm_b64}")))
        .await
        .unwrap();
    let etag2 = etag_of(&read);
    assert_ne!(etag1, etag2);

    let doc = body_json(read).await;
    assert_eq!(doc["submodelElements"][0]["value"][0]["value"], "patched");
}

#[tokio::test]
async fn test_element_insert_and_delete() {
    let (router, _core) = setup().await;

    router
        .clone()
        .oneshot(json_request("POST", "/submodels", sample_submodel()))
        .await
        .unwrap();
    let sm_b64 = titan_aas::core::ids::encode_id("urn:x:sm");

    // Insert a new root element
    let inserted = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/submodels/{sm_b64}/submodel-elements"),
            json!({"modelType": "Property", "idShort": "Fresh", "valueType": "xs:int", "value": "7"}),
        ))
        .await
        .unwrap();
    assert_eq!(inserted.status(), StatusCode::CREATED);

    // Duplicate idShort at root conflicts
    let duplicate = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/submodels/{sm_b64}/submodel-elements"),
            json!({"modelType": "Property", "idShort": "Fresh"}),
        ))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    // Delete it again
    let deleted = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/submodels/{sm_b64}/submodel-elements/Fresh"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = router
        .clone()
        .oneshot(get_request(&format!(
            "/submodels/{sm_b64}/submodel-elements/Fresh"
        )))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_paginated_listing_with_cursor() {
    let (router, _core) = setup().await;

    for n in 0..7 {
        let shell = json!({
            "id": format!("urn:x:list:{n}"),
            "idShort": format!("S{n}"),
            "assetInformation": {"assetKind": "Instance"}
        });
        let response = router
            .clone()
            .oneshot(json_request("POST", "/shells", shell))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let uri = match &cursor {
            Some(c) => format!("/shells?limit=3&cursor={c}"),
            None => "/shells?limit=3".to_string(),
        };
        let response = router.clone().oneshot(get_request(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        for item in page["result"].as_array().unwrap() {
            seen.push(item["id"].as_str().unwrap().to_string());
        }
        match page["paging_metadata"]["cursor"].as_str() {
            Some(next) => cursor = Some(next.to_string()),
            None => break,
        }
    }

    assert_eq!(seen.len(), 7);
    let mut deduped = seen.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), 7);
}

#[tokio::test]
async fn test_limit_above_maximum_is_rejected() {
    let (router, _core) = setup().await;
    let response = router
        .clone()
        .oneshot(get_request("/shells?limit=1001"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_registry_descriptor_round_trip() {
    let (router, _core) = setup().await;

    let descriptor = json!({
        "id": "urn:x:desc:1",
        "idShort": "D1",
        "globalAssetId": "urn:asset:42"
    });
    let created = router
        .clone()
        .oneshot(json_request("POST", "/shell-descriptors", descriptor))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    // Discovery by globalAssetId
    let found = router
        .clone()
        .oneshot(get_request("/shell-descriptors?globalAssetId=urn:asset:42"))
        .await
        .unwrap();
    let page = body_json(found).await;
    assert_eq!(page["result"].as_array().unwrap().len(), 1);
    assert_eq!(page["result"][0]["id"], "urn:x:desc:1");

    let missing = router
        .clone()
        .oneshot(get_request("/shell-descriptors?globalAssetId=urn:asset:none"))
        .await
        .unwrap();
    let page = body_json(missing).await;
    assert_eq!(page["result"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_submodel_value_projection_endpoint() {
    let (router, _core) = setup().await;

    router
        .clone()
        .oneshot(json_request("POST", "/submodels", sample_submodel()))
        .await
        .unwrap();

    let sm_b64 = titan_aas::core::ids::encode_id("urn:x:sm");
    let response = router
        .clone()
        .oneshot(get_request(&format!("/submodels/{sm_b64}/$value")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value, json!([["v"]]));
}

#[tokio::test]
async fn test_health_endpoint() {
    let (router, _core) = setup().await;
    let response = router.clone().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], true);
}
