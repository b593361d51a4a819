//! Response builders.
//!
//! Fast-path responses stream stored canonical bytes untouched; slow-path
//! responses re-serialize a projected document. Every 200 carries the
//! entity's ETag, creations add a `Location` header.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::core::canonical::canonical_bytes;

fn json_headers(etag: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Some(etag) = etag {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
            headers.insert(header::ETAG, value);
        }
    }
    headers
}

/// 200 with raw canonical bytes and the ETag header.
pub fn bytes_response(doc_bytes: Vec<u8>, etag: &str) -> Response {
    (StatusCode::OK, json_headers(Some(etag)), doc_bytes).into_response()
}

/// 200 with raw JSON bytes and no ETag (paginated frames).
pub fn page_response(body: Vec<u8>) -> Response {
    (StatusCode::OK, json_headers(None), body).into_response()
}

/// 201 with the created entity's bytes, ETag, and Location.
pub fn created_response(doc_bytes: Vec<u8>, etag: &str, location: &str) -> Response {
    let mut headers = json_headers(Some(etag));
    if let Ok(value) = HeaderValue::from_str(location) {
        headers.insert(header::LOCATION, value);
    }
    (StatusCode::CREATED, headers, doc_bytes).into_response()
}

/// 200 with a re-serialized projected document.
pub fn projected_response(doc: &Value, etag: Option<&str>) -> ApiResult<Response> {
    let bytes = canonical_bytes(doc).map_err(ApiError)?;
    Ok((StatusCode::OK, json_headers(etag), bytes).into_response())
}

/// 304 with an empty body.
pub fn not_modified() -> Response {
    StatusCode::NOT_MODIFIED.into_response()
}

/// 204 with an empty body.
pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_response_carries_etag() {
        let response = bytes_response(b"{}".to_vec(), "abc");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::ETAG).unwrap(), "\"abc\"");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_created_response_carries_location() {
        let response = created_response(b"{}".to_vec(), "abc", "/shells/dXJu");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/shells/dXJu"
        );
    }

    #[test]
    fn test_projected_response_serializes() {
        let response = projected_response(&json!({"idShortPath": "A.B"}), None).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::ETAG).is_none());
    }

    #[test]
    fn test_not_modified_is_empty() {
        let response = not_modified();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }
}
