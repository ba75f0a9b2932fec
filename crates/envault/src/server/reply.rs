//! Helpers for building JSON error responses in the API error-code format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::error::ApiErrorCode;
use common::protocol::{ErrorHolder, UploadResponse};

/// Build an error response with a code and optional description.
pub fn error(status: StatusCode, code: ApiErrorCode, description: &str) -> Response {
    let mut body = UploadResponse::default();
    if description.is_empty() {
        body.errors.errors.push(common::protocol::ApiError {
            code,
            parameter_name: None,
            description: None,
        });
    } else {
        body.errors.push(code, description);
    }
    (status, Json(body)).into_response()
}

/// Build an error response naming the offending request parameter.
pub fn param_error(
    status: StatusCode,
    code: ApiErrorCode,
    parameter: &str,
    description: &str,
) -> Response {
    let mut holder = ErrorHolder::default();
    holder.push_param(code, parameter, description);
    let body = UploadResponse {
        id: None,
        file_name: None,
        errors: holder,
    };
    (status, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> Response {
    error(
        StatusCode::NOT_FOUND,
        ApiErrorCode::NotFound,
        "the requested resource does not exist",
    )
}
