use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use canopy_core::error::{INTERNAL_SERVER_ERROR, OBJECT_NOT_FOUND, OPERATION_FORBIDDEN};
use canopy_core::CanonicalError;

/// Map a canonical engine error onto the HTTP surface.
///
/// The body is always `{code, message}`; raw internals never leak past the
/// canonical message.
pub fn canonical_error_to_response(err: &CanonicalError) -> axum::response::Response {
    let status = match err.code {
        OBJECT_NOT_FOUND => StatusCode::NOT_FOUND,
        OPERATION_FORBIDDEN => StatusCode::FORBIDDEN,
        INTERNAL_SERVER_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };

    (
        status,
        axum::Json(json!({
            "code": err.code,
            "message": err.message,
        })),
    )
        .into_response()
}

/// Transport-level failures that never reach the engine (bad credentials).
pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
