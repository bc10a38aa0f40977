//! Analytics: event tracking adapter and slow-execution analysis.
//!
//! Two concerns share this controller, as they share one config surface:
//! passthrough of client analytics events to a pluggable adapter, and the
//! decision, after an invocation completes, of whether to persist a
//! forensic `_SlowTracking` record describing where the time went.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use canopy_core::{encode_params, CanonicalError, InstallationId, ObjectId, UserRef};

use crate::config::SlowTrackingConfig;
use crate::request::FunctionRequest;
use crate::store::{Acl, ObjectStore, ObjectStoreError, SLOW_TRACKING_COLLECTION};
use crate::timeline::EventRecord;

/// Pluggable analytics backend.
///
/// Implementations forward events to whatever analytics product the
/// deployment uses. Both hooks default to no-ops so an adapter only
/// implements what it cares about.
#[async_trait]
pub trait AnalyticsAdapter: Send + Sync {
    /// An app-opened event from a client.
    async fn app_opened(&self, _body: JsonValue) -> Result<JsonValue, CanonicalError> {
        Ok(json!({}))
    }

    /// A named custom event with its payload (`{"dimensions": {...}}`).
    async fn track_event(
        &self,
        _event_name: &str,
        _body: JsonValue,
    ) -> Result<JsonValue, CanonicalError> {
        Ok(json!({}))
    }
}

/// Adapter that drops everything (the default).
#[derive(Debug, Default)]
pub struct NullAnalyticsAdapter;

#[async_trait]
impl AnalyticsAdapter for NullAnalyticsAdapter {}

/// Caller-identity snapshot captured for a slow-tracking record.
#[derive(Debug, Clone)]
pub struct InvocationSnapshot {
    /// Present only for function/job-name-bearing invocations.
    pub function_name: Option<String>,
    /// Encoded params, meaningful only alongside `function_name`.
    pub params: JsonValue,
    pub user: Option<UserRef>,
    pub master: bool,
    pub installation_id: Option<InstallationId>,
    pub context: JsonMap<String, JsonValue>,
}

impl From<&FunctionRequest> for InvocationSnapshot {
    fn from(request: &FunctionRequest) -> Self {
        Self {
            function_name: Some(request.function_name.clone()),
            params: encode_params(&request.params),
            user: request.user.clone(),
            master: request.master,
            installation_id: request.installation_id.clone(),
            context: request.context.clone(),
        }
    }
}

/// Completed-invocation data handed to the analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    /// Upsert key: one record per invocation no matter how many paths
    /// (failure, late success) analyze it.
    pub invocation_id: ObjectId,
    pub snapshot: InvocationSnapshot,
    pub events: Vec<EventRecord>,
    pub start: Instant,
    pub end: Instant,
    pub success: bool,
    pub error: Option<CanonicalError>,
}

pub struct AnalyticsController {
    adapter: Arc<dyn AnalyticsAdapter>,
    store: Arc<dyn ObjectStore>,
    slow_tracking: Option<SlowTrackingConfig>,
}

impl AnalyticsController {
    pub fn new(
        adapter: Arc<dyn AnalyticsAdapter>,
        store: Arc<dyn ObjectStore>,
        slow_tracking: Option<SlowTrackingConfig>,
    ) -> Self {
        Self {
            adapter,
            store,
            slow_tracking,
        }
    }

    /// Forward an app-opened event. Adapter failures are swallowed; event
    /// tracking never fails a client request.
    pub async fn app_opened(&self, body: JsonValue) -> JsonValue {
        self.adapter
            .app_opened(body)
            .await
            .unwrap_or_else(|_| json!({}))
    }

    /// Forward a named event. Adapter failures are swallowed.
    pub async fn track_event(&self, event_name: &str, body: JsonValue) -> JsonValue {
        self.adapter
            .track_event(event_name, body)
            .await
            .unwrap_or_else(|_| json!({}))
    }

    /// Decide whether this invocation deserves a forensic record, and build
    /// or extend it.
    ///
    /// The record is keyed by invocation id, so the failure path and a late
    /// success path of the same invocation converge on one upsert. Within
    /// the upsert the outcome fields are first-writer-wins: once `error` or
    /// `result` is set, a later analysis never overwrites it. Everything
    /// else (timings, timeline, caller snapshot, context) always reflects
    /// the latest analysis.
    pub fn analyse_event(
        &self,
        input: &AnalysisInput,
    ) -> Result<Option<ObjectId>, ObjectStoreError> {
        let Some(config) = self.slow_tracking else {
            return Ok(None);
        };

        let time_taken = input.end.duration_since(input.start);
        if time_taken < config.timeout {
            return Ok(None);
        }

        let events = rewrite_as_deltas(&input.events);
        let time_taken_ms = time_taken.as_secs_f64() * 1000.0;
        let snapshot = &input.snapshot;

        let object = self.store.upsert_with(
            SLOW_TRACKING_COLLECTION,
            &input.invocation_id,
            Acl::MasterOnly,
            &mut |fields| {
                if let Some(name) = &snapshot.function_name {
                    fields.insert("functionName".to_string(), json!(name));
                    fields.insert("params".to_string(), snapshot.params.clone());
                }

                if let Some(error) = &input.error {
                    fields.insert("error".to_string(), json!(error));
                } else if !fields.contains_key("result") && !fields.contains_key("error") {
                    fields.insert("result".to_string(), json!(input.success));
                }

                fields.insert("timeTaken".to_string(), json!(time_taken_ms));
                fields.insert("events".to_string(), json!(events));
                match &snapshot.user {
                    Some(user) => fields.insert("user".to_string(), json!(user)),
                    None => fields.remove("user"),
                };
                fields.insert("master".to_string(), json!(snapshot.master));
                match &snapshot.installation_id {
                    Some(id) => fields.insert("installationId".to_string(), json!(id)),
                    None => fields.remove("installationId"),
                };
                fields.insert(
                    "context".to_string(),
                    JsonValue::Object(snapshot.context.clone()),
                );
            },
        )?;

        Ok(Some(object.id))
    }
}

impl std::fmt::Debug for AnalyticsController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsController")
            .field("slow_tracking", &self.slow_tracking)
            .finish_non_exhaustive()
    }
}

/// Rewrite raw timeline timestamps into per-stage deltas.
///
/// The first event is measured against itself (zero); each subsequent delta
/// is the gap to the immediately preceding event. This highlights the
/// slowest stage rather than cumulative time.
fn rewrite_as_deltas(events: &[EventRecord]) -> Vec<JsonValue> {
    let mut last: Option<Instant> = None;
    events
        .iter()
        .map(|event| {
            let previous = last.unwrap_or(event.at);
            last = Some(event.at);
            let delta_ms = event.at.duration_since(previous).as_secs_f64() * 1000.0;
            json!({"name": event.name, "time": delta_ms.round()})
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryObjectStore, ReadAccess};
    use std::time::Duration;

    fn controller(
        store: Arc<InMemoryObjectStore>,
        threshold: Option<Duration>,
    ) -> AnalyticsController {
        AnalyticsController::new(
            Arc::new(NullAnalyticsAdapter),
            store,
            threshold.map(|timeout| SlowTrackingConfig { timeout }),
        )
    }

    fn snapshot() -> InvocationSnapshot {
        InvocationSnapshot {
            function_name: Some("slowpoke".to_string()),
            params: json!({"n": 1}),
            user: None,
            master: false,
            installation_id: Some(InstallationId::new("install-1")),
            context: JsonMap::new(),
        }
    }

    fn input(start: Instant, end: Instant, error: Option<CanonicalError>) -> AnalysisInput {
        AnalysisInput {
            invocation_id: ObjectId::new("inv-1"),
            snapshot: snapshot(),
            events: vec![],
            start,
            end,
            success: error.is_none(),
            error,
        }
    }

    #[test]
    fn no_threshold_means_no_record() {
        let store = InMemoryObjectStore::arc();
        let controller = controller(store.clone(), None);
        let now = Instant::now();

        let id = controller.analyse_event(&input(now, now, None)).unwrap();
        assert!(id.is_none());
        assert!(store
            .query(SLOW_TRACKING_COLLECTION, ReadAccess::Master)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn fast_invocations_are_not_recorded() {
        let store = InMemoryObjectStore::arc();
        let controller = controller(store.clone(), Some(Duration::from_secs(5)));
        let start = Instant::now();
        let end = start + Duration::from_millis(10);

        assert!(controller.analyse_event(&input(start, end, None)).unwrap().is_none());
    }

    #[test]
    fn slow_invocations_get_a_master_only_record() {
        let store = InMemoryObjectStore::arc();
        let controller = controller(store.clone(), Some(Duration::from_millis(100)));
        let start = Instant::now();
        let end = start + Duration::from_millis(250);

        let id = controller
            .analyse_event(&input(start, end, None))
            .unwrap()
            .expect("record persisted");

        assert!(store
            .get(SLOW_TRACKING_COLLECTION, &id, ReadAccess::Public)
            .unwrap()
            .is_none());

        let object = store
            .get(SLOW_TRACKING_COLLECTION, &id, ReadAccess::Master)
            .unwrap()
            .unwrap();
        assert_eq!(object.fields["functionName"], json!("slowpoke"));
        assert_eq!(object.fields["params"], json!({"n": 1}));
        assert_eq!(object.fields["result"], json!(true));
        assert_eq!(object.fields["master"], json!(false));
        assert_eq!(object.fields["installationId"], json!("install-1"));
        assert_eq!(object.fields["context"], json!({}));
        assert!(object.fields["timeTaken"].as_f64().unwrap() >= 250.0);
        assert!(!object.fields.contains_key("error"));
    }

    #[test]
    fn error_and_result_are_mutually_exclusive() {
        let store = InMemoryObjectStore::arc();
        let controller = controller(store.clone(), Some(Duration::from_millis(10)));
        let start = Instant::now();

        // Failure path analyzes first.
        let failed = input(
            start,
            start + Duration::from_millis(100),
            Some(CanonicalError::timeout()),
        );
        let id = controller.analyse_event(&failed).unwrap().unwrap();

        // Late success path of the same invocation analyzes second.
        let late = input(start, start + Duration::from_millis(900), None);
        let same = controller.analyse_event(&late).unwrap().unwrap();
        assert_eq!(same, id);

        let records = store.query(SLOW_TRACKING_COLLECTION, ReadAccess::Master).unwrap();
        assert_eq!(records.len(), 1);

        let fields = &records[0].fields;
        assert_eq!(
            fields["error"],
            json!({"code": 141, "message": "Script timed out."})
        );
        assert!(!fields.contains_key("result"));
        // Later analysis still refreshes the timing.
        assert!(fields["timeTaken"].as_f64().unwrap() >= 900.0);
    }

    #[test]
    fn first_committed_result_wins() {
        let store = InMemoryObjectStore::arc();
        let controller = controller(store.clone(), Some(Duration::from_millis(10)));
        let start = Instant::now();

        let first = input(start, start + Duration::from_millis(50), None);
        controller.analyse_event(&first).unwrap().unwrap();

        // A redundant second success analysis must not flip the outcome.
        let mut second = input(start, start + Duration::from_millis(60), None);
        second.success = false;
        controller.analyse_event(&second).unwrap().unwrap();

        let records = store.query(SLOW_TRACKING_COLLECTION, ReadAccess::Master).unwrap();
        assert_eq!(records[0].fields["result"], json!(true));
    }

    #[test]
    fn nameless_invocations_omit_function_fields() {
        let store = InMemoryObjectStore::arc();
        let controller = controller(store.clone(), Some(Duration::from_millis(10)));
        let start = Instant::now();

        let mut anonymous = input(start, start + Duration::from_millis(50), None);
        anonymous.snapshot.function_name = None;
        controller.analyse_event(&anonymous).unwrap().unwrap();

        let fields = &store.query(SLOW_TRACKING_COLLECTION, ReadAccess::Master).unwrap()[0].fields;
        assert!(!fields.contains_key("functionName"));
        assert!(!fields.contains_key("params"));
    }

    #[test]
    fn deltas_measure_stage_gaps_not_cumulative_time() {
        let t0 = Instant::now();
        let events = vec![
            EventRecord { name: "a".to_string(), at: t0 },
            EventRecord { name: "b".to_string(), at: t0 + Duration::from_millis(40) },
            EventRecord { name: "c".to_string(), at: t0 + Duration::from_millis(100) },
        ];

        let deltas = rewrite_as_deltas(&events);
        assert_eq!(deltas[0], json!({"name": "a", "time": 0.0}));
        assert_eq!(deltas[1], json!({"name": "b", "time": 40.0}));
        assert_eq!(deltas[2], json!({"name": "c", "time": 60.0}));
    }
}
