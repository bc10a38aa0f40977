//! Function/job dispatch orchestration.
//!
//! The dispatcher implements the invocation pipeline:
//!
//! 1. resolve the handler from the registry (unknown name is a canonical
//!    error)
//! 2. normalize parameters and build the invocation request
//! 3. run the per-name validator, then the handler, under the deadline
//! 4. encode the result (or normalize the failure)
//! 5. trigger slow-execution analysis without blocking the response
//!
//! Stage boundaries are marked on the invocation's timeline throughout; a
//! failure keeps the markers it reached. Jobs take a shorter path: status
//! record first, id back to the caller, body detached onto the runtime.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use canopy_core::{decode_params, CanonicalError, ObjectId};
use canopy_observability::truncate_log_message;

use crate::analytics::{AnalysisInput, AnalyticsController, InvocationSnapshot};
use crate::config::DispatchConfig;
use crate::deadline::with_deadline;
use crate::idempotency::IdempotencyGuard;
use crate::job_status::JobStatusTracker;
use crate::registry::CloudRegistry;
use crate::request::{CallerContext, FunctionRequest, JobRequest};
use crate::store::ObjectStore;
use crate::timeline::Timeline;

/// Stage markers appended to every function invocation's timeline, in order.
pub const EVT_CALLED: &str = "function called";
pub const EVT_DECODING: &str = "params decoding";
pub const EVT_VALIDATOR: &str = "cloud validator";
pub const EVT_HANDLER: &str = "cloud handler";
pub const EVT_ENCODING: &str = "response encoding";

/// The orchestrating component: resolves handlers, supervises execution,
/// shapes outcomes.
pub struct Dispatcher {
    config: DispatchConfig,
    registry: Arc<CloudRegistry>,
    analytics: Arc<AnalyticsController>,
    job_status: JobStatusTracker,
    idempotency: IdempotencyGuard,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        registry: Arc<CloudRegistry>,
        store: Arc<dyn ObjectStore>,
        analytics: Arc<AnalyticsController>,
    ) -> Self {
        Self {
            config,
            registry,
            analytics,
            job_status: JobStatusTracker::new(store),
            idempotency: IdempotencyGuard::default(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn analytics(&self) -> &AnalyticsController {
        &self.analytics
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    /// Invoke a registered cloud function and return its encoded result.
    ///
    /// Both the success and the failure path trigger slow-execution analysis
    /// without blocking the response. The two paths share one invocation id:
    /// when the deadline fires and the handler later completes anyway, its
    /// late analysis extends the record the failure path created instead of
    /// producing a second one.
    pub async fn run_function(
        &self,
        function_name: &str,
        body: JsonValue,
        caller: CallerContext,
    ) -> Result<JsonValue, CanonicalError> {
        let start = Instant::now();
        let invocation_id = ObjectId::generate();
        let timeline = Timeline::new();
        timeline.push(EVT_CALLED);

        // Shared with the supervised pipeline so a timed-out caller can
        // still snapshot what was known when the deadline fired.
        let snapshot_slot: Arc<OnceLock<InvocationSnapshot>> = Arc::new(OnceLock::new());

        let name = function_name.to_string();
        let work = {
            let registry = self.registry.clone();
            let analytics = self.analytics.clone();
            let timeline = timeline.clone();
            let snapshot_slot = snapshot_slot.clone();
            let invocation_id = invocation_id.clone();
            let name = name.clone();
            let caller = caller.clone();
            async move {
                let handler = registry
                    .get_function(&name)
                    .ok_or_else(|| CanonicalError::invalid_function(&name))?;

                let params = decode_params(body);
                let request = FunctionRequest::new(name.clone(), params, caller);
                timeline.push(EVT_DECODING);

                let snapshot = InvocationSnapshot::from(&request);
                let _ = snapshot_slot.set(snapshot.clone());
                let user = request.user.clone();
                let clean_input = truncate_log_message(&snapshot.params.to_string());

                if let Some(validator) = registry.get_validator(&name) {
                    // A validator rejection propagates verbatim and
                    // short-circuits before the handler runs.
                    validator(&request)?;
                }
                timeline.push(EVT_VALIDATOR);

                let result = handler(request).await?;
                timeline.push(EVT_HANDLER);

                let encoded = result.encode();
                timeline.push(EVT_ENCODING);

                let clean_result = truncate_log_message(&encoded.to_string());
                info!(
                    function_name = %name,
                    user = user.as_ref().map(|u| u.as_str()).unwrap_or("anonymous"),
                    input = %clean_input,
                    result = %clean_result,
                    "ran cloud function"
                );

                spawn_analysis(
                    analytics,
                    AnalysisInput {
                        invocation_id,
                        snapshot,
                        events: timeline.snapshot(),
                        start,
                        end: Instant::now(),
                        success: true,
                        error: None,
                    },
                );

                Ok(encoded)
            }
        };

        match with_deadline(work, self.config.function_deadline()).await {
            Ok(encoded) => Ok(encoded),
            Err(error) => {
                // The pipeline may have faulted before the request was
                // built; fall back to what the transport gave us.
                let snapshot = snapshot_slot.get().cloned().unwrap_or_else(|| {
                    InvocationSnapshot {
                        function_name: Some(name.clone()),
                        params: JsonValue::Object(Default::default()),
                        user: caller.user.clone(),
                        master: caller.master,
                        installation_id: caller.installation_id.clone(),
                        context: caller.context.clone(),
                    }
                });

                error!(
                    function_name = %name,
                    user = snapshot.user.as_ref().map(|u| u.as_str()).unwrap_or("anonymous"),
                    code = error.code,
                    message = %error.message,
                    "failed running cloud function"
                );

                spawn_analysis(
                    self.analytics.clone(),
                    AnalysisInput {
                        invocation_id,
                        snapshot,
                        events: timeline.snapshot(),
                        start,
                        end: Instant::now(),
                        success: false,
                        error: Some(error.clone()),
                    },
                );

                Err(error)
            }
        }
    }

    /// Start a registered background job and return its status id.
    ///
    /// The status is created in `running` state before returning; the job
    /// body runs as a detached task and settles the status on its own.
    /// Jobs have no deadline and no slow tracking.
    pub async fn trigger_job(
        &self,
        job_name: &str,
        body: JsonValue,
        caller: &CallerContext,
    ) -> Result<ObjectId, CanonicalError> {
        let handler = self
            .registry
            .get_job(job_name)
            .ok_or_else(CanonicalError::invalid_job)?;

        let params = decode_params(body);
        let status = self
            .job_status
            .set_running(job_name, &params)
            .map_err(|err| CanonicalError::internal(format!("failed to create job status: {err}")))?;
        let job_id = status.id().clone();
        let request = JobRequest::new(params, caller, status.clone());
        let name = job_name.to_string();

        tokio::spawn(async move {
            match handler(request).await {
                Ok(result) => {
                    if let Err(err) = status.set_succeeded(&result) {
                        warn!(job_name = %name, error = %err, "failed to record job success");
                    }
                    info!(job_name = %name, job_id = %status.id(), "job succeeded");
                }
                Err(err) => {
                    let resolved = CanonicalError::resolve(err);
                    if let Err(err) = status.set_failed(&resolved) {
                        warn!(job_name = %name, error = %err, "failed to record job failure");
                    }
                    error!(
                        job_name = %name,
                        job_id = %status.id(),
                        code = resolved.code,
                        message = %resolved.message,
                        "job failed"
                    );
                }
            }
        });

        Ok(job_id)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn spawn_analysis(analytics: Arc<AnalyticsController>, input: AnalysisInput) {
    tokio::spawn(async move {
        if let Err(err) = analytics.analyse_event(&input) {
            warn!(error = %err, "slow-tracking analysis failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::NullAnalyticsAdapter;
    use crate::store::{InMemoryObjectStore, ReadAccess, JOB_STATUS_COLLECTION, SLOW_TRACKING_COLLECTION};
    use canopy_core::Value;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn dispatcher_with(
        registry: CloudRegistry,
        slow_timeout: Option<Duration>,
    ) -> (Dispatcher, Arc<InMemoryObjectStore>) {
        let store = InMemoryObjectStore::arc();
        let mut config = DispatchConfig::new("test-app", "master-secret");
        if let Some(timeout) = slow_timeout {
            config = config.with_slow_tracking(timeout);
        }
        let analytics = Arc::new(AnalyticsController::new(
            Arc::new(NullAnalyticsAdapter),
            store.clone(),
            config.slow_tracking,
        ));
        let dispatcher = Dispatcher::new(config, Arc::new(registry), store.clone(), analytics);
        (dispatcher, store)
    }

    #[tokio::test]
    async fn unregistered_function_is_rejected() {
        let (dispatcher, _) = dispatcher_with(CloudRegistry::new(), None);
        let err = dispatcher
            .run_function("nope", json!({}), CallerContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, 141);
        assert_eq!(err.message, "Invalid function: \"nope\"");
    }

    #[tokio::test]
    async fn handler_sees_normalized_params_and_result_is_encoded() {
        let mut registry = CloudRegistry::new();
        registry.define_function("echoDate", |req: FunctionRequest| async move {
            // The tagged wire date arrives rehydrated.
            match req.params.get("when") {
                Some(date @ Value::Date { .. }) => Ok(date.clone()),
                other => Err(CanonicalError::script_failed(format!("bad param: {other:?}"))),
            }
        });
        let (dispatcher, _) = dispatcher_with(registry, None);

        let result = dispatcher
            .run_function(
                "echoDate",
                json!({"when": {"__type": "Date", "iso": "2024-05-01T12:30:00.000Z"}}),
                CallerContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"__type": "Date", "iso": "2024-05-01T12:30:00.000Z"}));
    }

    #[tokio::test]
    async fn validator_rejection_short_circuits_the_handler() {
        static RUNS: AtomicUsize = AtomicUsize::new(0);

        let mut registry = CloudRegistry::new();
        registry.define_function("guarded", |_| async {
            RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Bool(true))
        });
        registry.define_validator("guarded", |_: &FunctionRequest| {
            Err(CanonicalError::validation("missing permission"))
        });
        let (dispatcher, _) = dispatcher_with(registry, None);

        let err = dispatcher
            .run_function("guarded", json!({}), CallerContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, 142);
        assert_eq!(err.message, "missing permission");
        assert_eq!(RUNS.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timed_out_function_still_produces_one_full_record() {
        let mut registry = CloudRegistry::new();
        registry.define_function("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::Bool(true))
        });
        let (dispatcher, store) = dispatcher_with(registry, Some(Duration::from_millis(50)));

        let caller = CallerContext {
            installation_id: Some("install-9".into()),
            ..Default::default()
        };
        let err = dispatcher
            .run_function("slow", json!({}), caller)
            .await
            .unwrap_err();
        assert_eq!(err.code, 141);
        assert_eq!(err.message, "Script timed out.");

        // Let the detached handler finish and both analyses land.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let records = store
            .query(SLOW_TRACKING_COLLECTION, ReadAccess::Master)
            .unwrap();
        assert_eq!(records.len(), 1);

        let fields = &records[0].fields;
        assert_eq!(fields["functionName"], json!("slow"));
        assert_eq!(fields["params"], json!({}));
        assert_eq!(fields["error"], json!({"code": 141, "message": "Script timed out."}));
        assert!(!fields.contains_key("result"));
        assert_eq!(fields["master"], json!(false));
        assert_eq!(fields["installationId"], json!("install-9"));
        assert_eq!(fields["events"].as_array().unwrap().len(), 5);
        assert!(fields["timeTaken"].as_f64().unwrap() >= 150.0);

        // Unprivileged readers see nothing.
        assert!(store
            .query(SLOW_TRACKING_COLLECTION, ReadAccess::Public)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn fast_function_leaves_no_record() {
        let mut registry = CloudRegistry::new();
        registry.define_function("fast", |_| async { Ok(Value::Bool(true)) });
        let (dispatcher, store) = dispatcher_with(registry, Some(Duration::from_secs(5)));

        dispatcher
            .run_function("fast", json!({}), CallerContext::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store
            .query(SLOW_TRACKING_COLLECTION, ReadAccess::Master)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn job_returns_id_immediately_and_settles_once() {
        let mut registry = CloudRegistry::new();
        registry.define_job("nightly", |req: JobRequest| async move {
            req.set_message("working").ok();
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Value::String("done".to_string()))
        });
        let (dispatcher, store) = dispatcher_with(registry, None);

        let job_id = dispatcher
            .trigger_job("nightly", json!({"batch": 3}), &CallerContext::default())
            .await
            .unwrap();

        // Observable before the job body finishes.
        let status = store
            .get(JOB_STATUS_COLLECTION, &job_id, ReadAccess::Master)
            .unwrap()
            .unwrap();
        assert_eq!(status.fields["status"], json!("running"));

        // Poll until the detached task settles it.
        for _ in 0..50 {
            let status = store
                .get(JOB_STATUS_COLLECTION, &job_id, ReadAccess::Master)
                .unwrap()
                .unwrap();
            if status.fields["status"] == json!("succeeded") {
                assert_eq!(status.fields["message"], json!("done"));
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not settle within timeout");
    }

    #[tokio::test]
    async fn failing_job_records_the_normalized_error() {
        let mut registry = CloudRegistry::new();
        registry.define_job("broken", |_| async {
            Err(CanonicalError::script_failed("no such table"))
        });
        let (dispatcher, store) = dispatcher_with(registry, None);

        let job_id = dispatcher
            .trigger_job("broken", json!({}), &CallerContext::default())
            .await
            .unwrap();

        for _ in 0..50 {
            let status = store
                .get(JOB_STATUS_COLLECTION, &job_id, ReadAccess::Master)
                .unwrap()
                .unwrap();
            if status.fields["status"] == json!("failed") {
                assert_eq!(
                    status.fields["message"],
                    json!({"code": 141, "message": "no such table"})
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not settle within timeout");
    }

    #[tokio::test]
    async fn unregistered_job_is_rejected() {
        let (dispatcher, _) = dispatcher_with(CloudRegistry::new(), None);
        let err = dispatcher
            .trigger_job("ghost", json!({}), &CallerContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, 141);
        assert_eq!(err.message, "Invalid job.");
    }
}
