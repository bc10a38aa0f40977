use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::{Map as JsonMap, Value as JsonValue};

use canopy_core::{CanonicalError, InstallationId, UserRef};
use canopy_dispatch::{CallerContext, DispatchConfig};

use crate::app::errors;

pub const HEADER_APPLICATION_ID: &str = "x-canopy-application-id";
pub const HEADER_MASTER_KEY: &str = "x-canopy-master-key";
pub const HEADER_USER_ID: &str = "x-canopy-user-id";
pub const HEADER_INSTALLATION_ID: &str = "x-canopy-installation-id";
pub const HEADER_CLOUD_CONTEXT: &str = "x-canopy-cloud-context";
pub const HEADER_REQUEST_ID: &str = "x-canopy-request-id";
pub const HEADER_JOB_STATUS_ID: &str = "x-canopy-job-status-id";

#[derive(Clone)]
pub struct AuthState {
    pub config: Arc<DispatchConfig>,
}

/// Gate requests on the application id and attach the resolved
/// [`CallerContext`] for downstream handlers.
///
/// User identity arrives pre-resolved in gateway headers; the master key
/// header elevates the caller when it matches the configured key.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let app_id = header_str(req.headers(), HEADER_APPLICATION_ID);
    if app_id != Some(state.config.application_id.as_str()) {
        return Err(errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "unauthorized",
        ));
    }

    let caller = caller_from_headers(req.headers(), &state.config)
        .map_err(|err| errors::canonical_error_to_response(&err))?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Resolve the caller's identity and free-form context from request headers.
pub fn caller_from_headers(
    headers: &HeaderMap,
    config: &DispatchConfig,
) -> Result<CallerContext, CanonicalError> {
    let master = header_str(headers, HEADER_MASTER_KEY) == Some(config.master_key.as_str());
    let user = header_str(headers, HEADER_USER_ID).map(UserRef::from);
    let installation_id = header_str(headers, HEADER_INSTALLATION_ID).map(InstallationId::from);

    let context = match header_str(headers, HEADER_CLOUD_CONTEXT) {
        None => JsonMap::new(),
        Some(raw) => match serde_json::from_str::<JsonValue>(raw) {
            Ok(JsonValue::Object(map)) => map,
            _ => return Err(CanonicalError::invalid_json("Invalid object for context.")),
        },
    };

    // Non-UTF-8 header values are dropped from the snapshot.
    let header_snapshot: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let ip = header_str(headers, "x-forwarded-for")
        .and_then(|raw| raw.split(',').next())
        .map(|first| first.trim().to_string());

    Ok(CallerContext {
        master,
        user,
        installation_id,
        ip,
        headers: header_snapshot,
        context,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
