//! HTTP response building helpers

use bytes::Bytes;
use hyper::{header, Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use tracing::error;

use crate::error::StorageError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

/// Build an empty response with 204 No Content status
pub fn no_content() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": message }),
    )
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed" }),
    )
}

/// Convert a StorageError to an appropriate HTTP response
pub fn error_response(error: StorageError) -> Response<Full<Bytes>> {
    let (status, message) = match &error {
        StorageError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        StorageError::Json(e) => (StatusCode::BAD_REQUEST, format!("JSON error: {}", e)),
        StorageError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
        StorageError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
        StorageError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        StorageError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        StorageError::RateLimitExceeded { retry_after_ms, .. } => {
            // Retry-After is in whole seconds
            let retry_after_secs = retry_after_ms.div_ceil(1000).max(1);
            let mut response = json_response(
                StatusCode::TOO_MANY_REQUESTS,
                &serde_json::json!({
                    "error": error.to_string(),
                    "retryAfterMs": retry_after_ms,
                }),
            );
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from(retry_after_secs));
            return response;
        }
        _ => {
            error!(error = %error, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    };

    json_response(status, &serde_json::json!({ "error": message }))
}

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, StorageError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}

/// Wrap an optional service result into an HTTP response
/// Returns 404 if None
pub fn from_option<T: Serialize>(
    result: Result<Option<T>, StorageError>,
    not_found_msg: &str,
) -> Response<Full<Bytes>> {
    match result {
        Ok(Some(value)) => ok(&value),
        Ok(None) => not_found(not_found_msg),
        Err(e) => error_response(e),
    }
}

/// Wrap a create result into an HTTP response with 201 Created
pub fn from_create_result<T: Serialize>(result: Result<T, StorageError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response() {
        let resp = ok(&serde_json::json!({"test": true}));
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_method_not_allowed() {
        assert_eq!(method_not_allowed().status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            error_response(StorageError::Validation("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(StorageError::NotFound("gone".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(StorageError::Conflict("dup".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_response(StorageError::Forbidden("key".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            error_response(StorageError::Database("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let resp = error_response(StorageError::RateLimitExceeded {
            operation: "cast_vote".into(),
            retry_after_ms: 2500,
        });
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "3");
    }
}
