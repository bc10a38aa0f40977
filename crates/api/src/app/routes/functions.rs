use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;

use canopy_dispatch::CallerContext;

use crate::app::routes::common;
use crate::app::{errors, services::AppServices};

pub fn router() -> Router {
    Router::new().route("/functions/:function_name", post(run_function))
}

/// POST /functions/:function_name
///
/// Invoke a registered cloud function. The body is the raw parameter
/// object; the response wraps the encoded result as `{"result": ...}`.
pub async fn run_function(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(function_name): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    if let Err(err) = common::claim_request_id(&services, &caller) {
        return errors::canonical_error_to_response(&err);
    }

    let body = match common::parse_body(&body) {
        Ok(value) => value,
        Err(err) => return errors::canonical_error_to_response(&err),
    };

    match services
        .dispatcher
        .run_function(&function_name, body, caller)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(json!({ "result": result }))).into_response(),
        Err(err) => errors::canonical_error_to_response(&err),
    }
}
