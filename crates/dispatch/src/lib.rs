//! `canopy-dispatch`: the function/job dispatch engine.
//!
//! Turns an inbound invocation request into a supervised, timed, trackable
//! execution: handler resolution through the [`registry`], deadline-enforced
//! execution ([`deadline`]), an append-only stage [`timeline`], detached job
//! execution with lifecycle tracking ([`job_status`]), and conditional
//! persistence of slow-execution forensics ([`analytics`]). The [`Dispatcher`]
//! orchestrates all of it.

pub mod analytics;
pub mod config;
pub mod deadline;
pub mod dispatcher;
pub mod idempotency;
pub mod job_status;
pub mod registry;
pub mod request;
pub mod store;
pub mod timeline;

pub use analytics::{AnalyticsAdapter, AnalyticsController, NullAnalyticsAdapter};
pub use config::{DispatchConfig, SlowTrackingConfig};
pub use dispatcher::Dispatcher;
pub use idempotency::IdempotencyGuard;
pub use job_status::{JobStatusHandle, JobStatusTracker};
pub use registry::CloudRegistry;
pub use request::{CallerContext, FunctionRequest, JobRequest};
pub use store::{Acl, InMemoryObjectStore, ObjectStore, ReadAccess, StoredObject};
