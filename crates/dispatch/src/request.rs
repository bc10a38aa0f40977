//! Invocation request types.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use canopy_core::{InstallationId, UserRef, Value};

use crate::job_status::JobStatusHandle;
use crate::store::ObjectStoreError;

/// Caller identity and transport details, resolved before dispatch.
///
/// Built by the transport layer (auth headers, connection info); the engine
/// treats it as read-only input.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Privileged (master-key) caller.
    pub master: bool,
    /// Authenticated-user reference, when the gateway resolved one.
    pub user: Option<UserRef>,
    pub installation_id: Option<InstallationId>,
    pub ip: Option<String>,
    /// Request headers snapshot (lossy for non-UTF-8 values).
    pub headers: BTreeMap<String, String>,
    /// Free-form context mapping supplied by the caller.
    pub context: JsonMap<String, JsonValue>,
}

/// One function invocation. Immutable once the handler runs; discarded after
/// the response.
#[derive(Debug, Clone)]
pub struct FunctionRequest {
    pub function_name: String,
    pub params: BTreeMap<String, Value>,
    pub master: bool,
    pub user: Option<UserRef>,
    pub installation_id: Option<InstallationId>,
    pub ip: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub context: JsonMap<String, JsonValue>,
}

impl FunctionRequest {
    pub fn new(
        function_name: impl Into<String>,
        params: BTreeMap<String, Value>,
        caller: CallerContext,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            params,
            master: caller.master,
            user: caller.user,
            installation_id: caller.installation_id,
            ip: caller.ip,
            headers: caller.headers,
            context: caller.context,
        }
    }
}

/// One job invocation, handed to the detached job task.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_name: String,
    pub params: BTreeMap<String, Value>,
    pub ip: Option<String>,
    pub headers: BTreeMap<String, String>,
    status: JobStatusHandle,
}

impl JobRequest {
    pub fn new(
        params: BTreeMap<String, Value>,
        caller: &CallerContext,
        status: JobStatusHandle,
    ) -> Self {
        Self {
            job_name: status.job_name().to_string(),
            params,
            ip: caller.ip.clone(),
            headers: caller.headers.clone(),
            status,
        }
    }

    /// Identifier of this job's status record (also surfaced to the caller).
    pub fn job_id(&self) -> &canopy_core::ObjectId {
        self.status.id()
    }

    /// Update the job's progress message mid-run.
    pub fn set_message(&self, message: &str) -> Result<(), ObjectStoreError> {
        self.status.set_message(message)
    }
}
