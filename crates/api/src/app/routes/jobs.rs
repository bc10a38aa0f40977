use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value as JsonValue};

use canopy_core::CanonicalError;
use canopy_dispatch::CallerContext;

use crate::app::routes::common;
use crate::app::{errors, services::AppServices};
use crate::middleware::HEADER_JOB_STATUS_ID;

pub fn router() -> Router {
    Router::new()
        .route("/jobs/:job_name", post(run_named_job))
        .route("/jobs", post(run_job_from_body))
}

/// POST /jobs/:job_name
///
/// Start a background job. Requires the master key. The status id comes
/// back in the `X-Canopy-Job-Status-Id` header; the body is `{}`.
pub async fn run_named_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(job_name): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let params = match job_preamble(&services, &caller, &body) {
        Ok(params) => params,
        Err(response) => return response,
    };
    start_job(&services, &caller, &job_name, params).await
}

/// POST /jobs
///
/// Same as the named route, with the job name taken from the body's
/// `jobName` field.
pub async fn run_job_from_body(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    body: Bytes,
) -> axum::response::Response {
    let params = match job_preamble(&services, &caller, &body) {
        Ok(params) => params,
        Err(response) => return response,
    };

    let Some(job_name) = params.get("jobName").and_then(JsonValue::as_str).map(String::from) else {
        return errors::canonical_error_to_response(&CanonicalError::invalid_job());
    };
    start_job(&services, &caller, &job_name, params).await
}

/// Shared gate: idempotency claim, master enforcement, body parse.
///
/// Master enforcement happens before handler resolution, so an unprivileged
/// caller cannot probe which job names exist.
fn job_preamble(
    services: &AppServices,
    caller: &CallerContext,
    body: &[u8],
) -> Result<JsonValue, axum::response::Response> {
    if let Err(err) = common::claim_request_id(services, caller) {
        return Err(errors::canonical_error_to_response(&err));
    }

    if !caller.master {
        return Err(errors::canonical_error_to_response(
            &CanonicalError::forbidden("unauthorized: master key is required"),
        ));
    }

    common::parse_body(body).map_err(|err| errors::canonical_error_to_response(&err))
}

async fn start_job(
    services: &AppServices,
    caller: &CallerContext,
    job_name: &str,
    params: JsonValue,
) -> axum::response::Response {
    match services.dispatcher.trigger_job(job_name, params, caller).await {
        Ok(job_id) => (
            StatusCode::OK,
            [(HEADER_JOB_STATUS_ID, job_id.as_str().to_string())],
            Json(json!({})),
        )
            .into_response(),
        Err(err) => errors::canonical_error_to_response(&err),
    }
}
