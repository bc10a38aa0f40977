//! Job lifecycle status tracking.
//!
//! A job status is created in `running` state before the caller is released;
//! the detached job task later moves it to `succeeded` or `failed` exactly
//! once. Statuses are persisted master-read-only and never deleted here
//! (retention is an external concern).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map as JsonMap};

use canopy_core::{encode_params, CanonicalError, ObjectId, Value};

use crate::store::{Acl, ObjectStore, ObjectStoreError, StoredObject, JOB_STATUS_COLLECTION};

/// Lifecycle state of a job, as persisted in the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunState {
    Running,
    Succeeded,
    Failed,
}

impl JobRunState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobRunState::Running => "running",
            JobRunState::Succeeded => "succeeded",
            JobRunState::Failed => "failed",
        }
    }
}

/// Creates job status records and hands out update handles.
#[derive(Clone)]
pub struct JobStatusTracker {
    store: Arc<dyn ObjectStore>,
}

impl JobStatusTracker {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Persist a fresh status in `running` state and return its handle.
    ///
    /// Returns immediately; the caller is never blocked on job completion.
    pub fn set_running(
        &self,
        job_name: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<JobStatusHandle, ObjectStoreError> {
        let id = ObjectId::generate();

        let mut fields = JsonMap::new();
        fields.insert("jobName".to_string(), json!(job_name));
        fields.insert("status".to_string(), json!(JobRunState::Running.as_str()));
        fields.insert("source".to_string(), json!("api"));
        fields.insert("params".to_string(), encode_params(params));
        fields.insert("startedAt".to_string(), json!(Utc::now().to_rfc3339()));

        self.store.create(StoredObject::new(
            id.clone(),
            JOB_STATUS_COLLECTION,
            fields,
            Acl::MasterOnly,
        ))?;

        Ok(JobStatusHandle {
            store: self.store.clone(),
            id,
            job_name: job_name.to_string(),
        })
    }
}

impl fmt::Debug for JobStatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStatusTracker").finish_non_exhaustive()
    }
}

/// Handle to one job's status record.
///
/// All writes go through the store's atomic upsert, so updates to a given
/// status id are serialized.
#[derive(Clone)]
pub struct JobStatusHandle {
    store: Arc<dyn ObjectStore>,
    id: ObjectId,
    job_name: String,
}

impl JobStatusHandle {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Update the progress message. Allowed at any point in the lifecycle.
    pub fn set_message(&self, message: &str) -> Result<(), ObjectStoreError> {
        self.store
            .upsert_with(JOB_STATUS_COLLECTION, &self.id, Acl::MasterOnly, &mut |fields| {
                fields.insert("message".to_string(), json!(message));
            })?;
        Ok(())
    }

    /// Terminal transition: `succeeded`, with the job's encoded result as the
    /// final message.
    pub fn set_succeeded(&self, result: &Value) -> Result<(), ObjectStoreError> {
        self.finish(JobRunState::Succeeded, result.encode())
    }

    /// Terminal transition: `failed`, with the normalized error.
    pub fn set_failed(&self, error: &CanonicalError) -> Result<(), ObjectStoreError> {
        self.finish(JobRunState::Failed, json!(error))
    }

    fn finish(
        &self,
        state: JobRunState,
        message: serde_json::Value,
    ) -> Result<(), ObjectStoreError> {
        self.store
            .upsert_with(JOB_STATUS_COLLECTION, &self.id, Acl::MasterOnly, &mut |fields| {
                // A status settles exactly once; a late second terminal write
                // (e.g. from a racing cleanup path) is dropped.
                if fields.contains_key("finishedAt") {
                    return;
                }
                fields.insert("status".to_string(), json!(state.as_str()));
                fields.insert("message".to_string(), message.clone());
                fields.insert("finishedAt".to_string(), json!(Utc::now().to_rfc3339()));
            })?;
        Ok(())
    }
}

impl fmt::Debug for JobStatusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStatusHandle")
            .field("id", &self.id)
            .field("job_name", &self.job_name)
            .finish_non_exhaustive()
    }
}
