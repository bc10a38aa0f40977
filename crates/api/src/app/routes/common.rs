//! Helpers shared across invocation routes.

use serde_json::Value as JsonValue;

use canopy_core::CanonicalError;
use canopy_dispatch::CallerContext;

use crate::app::services::AppServices;
use crate::middleware::HEADER_REQUEST_ID;

/// Claim the caller-supplied idempotency token, when one was sent.
///
/// A replayed token fails the request before any handler runs.
pub fn claim_request_id(
    services: &AppServices,
    caller: &CallerContext,
) -> Result<(), CanonicalError> {
    match caller.headers.get(HEADER_REQUEST_ID) {
        Some(token) => services.dispatcher.idempotency().claim(token),
        None => Ok(()),
    }
}

/// Parse an invocation body. An empty body counts as `{}`.
pub fn parse_body(bytes: &[u8]) -> Result<JsonValue, CanonicalError> {
    if bytes.is_empty() {
        return Ok(JsonValue::Object(Default::default()));
    }
    serde_json::from_slice(bytes).map_err(CanonicalError::from)
}
