//! Canonical error model.
//!
//! Every failure surfaced to a caller or persisted in telemetry is reduced to
//! a `{code, message}` pair using the platform's fixed wire codes. Keep this
//! focused on the wire shape; infrastructure errors live next to the code
//! that produces them and are normalized at the dispatch boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resource lookup failed.
pub const OBJECT_NOT_FOUND: i32 = 101;
/// Malformed JSON in a request payload or header.
pub const INVALID_JSON: i32 = 107;
/// Caller lacks the privilege required for the operation.
pub const OPERATION_FORBIDDEN: i32 = 119;
/// Cloud code failed: unregistered name, handler fault, or timeout.
pub const SCRIPT_FAILED: i32 = 141;
/// A registered input validator rejected the request.
pub const VALIDATION_ERROR: i32 = 142;
/// An idempotency token was replayed.
pub const DUPLICATE_REQUEST: i32 = 159;
/// Catch-all for internal faults that must not leak details.
pub const INTERNAL_SERVER_ERROR: i32 = 1;

/// Fixed message for deadline expiry (part of the wire contract).
pub const SCRIPT_TIMED_OUT: &str = "Script timed out.";

/// The normalized `{code, message}` failure shape.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct CanonicalError {
    pub code: i32,
    pub message: String,
}

impl CanonicalError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Handler-level failure (`SCRIPT_FAILED`).
    pub fn script_failed(message: impl Into<String>) -> Self {
        Self::new(SCRIPT_FAILED, message)
    }

    /// Deadline expiry with the fixed wire message.
    pub fn timeout() -> Self {
        Self::new(SCRIPT_FAILED, SCRIPT_TIMED_OUT)
    }

    /// No function registered under `name`.
    pub fn invalid_function(name: &str) -> Self {
        Self::new(SCRIPT_FAILED, format!("Invalid function: \"{name}\""))
    }

    /// No job registered under the requested name.
    pub fn invalid_job() -> Self {
        Self::new(SCRIPT_FAILED, "Invalid job.")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(VALIDATION_ERROR, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(OPERATION_FORBIDDEN, message)
    }

    pub fn duplicate_request() -> Self {
        Self::new(DUPLICATE_REQUEST, "Duplicate request")
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(INVALID_JSON, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_SERVER_ERROR, message)
    }

    /// Total normalization of an arbitrary failure value.
    ///
    /// Already-canonical errors pass through untouched; anything else is
    /// wrapped as `SCRIPT_FAILED` with a best-effort string coercion of the
    /// failure (see the `From` impls below). This never fails.
    pub fn resolve(err: impl Into<CanonicalError>) -> Self {
        err.into()
    }
}

impl From<String> for CanonicalError {
    fn from(value: String) -> Self {
        Self::script_failed(value)
    }
}

impl From<&str> for CanonicalError {
    fn from(value: &str) -> Self {
        Self::script_failed(value)
    }
}

impl From<serde_json::Error> for CanonicalError {
    fn from(value: serde_json::Error) -> Self {
        Self::invalid_json(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_has_fixed_code_and_message() {
        let err = CanonicalError::timeout();
        assert_eq!(err.code, SCRIPT_FAILED);
        assert_eq!(err.message, "Script timed out.");
    }

    #[test]
    fn invalid_function_quotes_the_name() {
        let err = CanonicalError::invalid_function("sendEmail");
        assert_eq!(err.code, 141);
        assert_eq!(err.message, "Invalid function: \"sendEmail\"");
    }

    #[test]
    fn resolve_wraps_arbitrary_failures() {
        let err = CanonicalError::resolve("boom");
        assert_eq!(err.code, SCRIPT_FAILED);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn resolve_passes_canonical_errors_through() {
        let original = CanonicalError::validation("bad input");
        let resolved = CanonicalError::resolve(original.clone());
        assert_eq!(resolved, original);
    }

    #[test]
    fn serializes_to_wire_shape() {
        let err = CanonicalError::duplicate_request();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"code": 159, "message": "Duplicate request"}));
    }
}
