//! Cloud code registry: name → handler maps for one application.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use canopy_core::{CanonicalError, Value};

use crate::request::{FunctionRequest, JobRequest};

/// Boxed future returned by a registered handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, CanonicalError>> + Send>>;

/// Registered cloud function body.
pub type FunctionHandler = Arc<dyn Fn(FunctionRequest) -> HandlerFuture + Send + Sync>;

/// Registered background job body.
pub type JobHandler = Arc<dyn Fn(JobRequest) -> HandlerFuture + Send + Sync>;

/// Optional per-name input validator, run before the function handler.
pub type ValidatorHandler = Arc<dyn Fn(&FunctionRequest) -> Result<(), CanonicalError> + Send + Sync>;

/// Registration map for functions, jobs, and validators.
///
/// Populated at startup by the embedding application and read-only after
/// that; dispatch resolves names against it but never mutates it. Tests
/// build a fresh registry per case instead of reconfiguring a live one.
#[derive(Default)]
pub struct CloudRegistry {
    functions: HashMap<String, FunctionHandler>,
    jobs: HashMap<String, JobHandler>,
    validators: HashMap<String, ValidatorHandler>,
}

impl CloudRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function handler under `name`. Re-registering replaces.
    pub fn define_function<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(FunctionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CanonicalError>> + Send + 'static,
    {
        self.functions
            .insert(name.into(), Arc::new(move |req| Box::pin(handler(req))));
    }

    /// Register a job handler under `name`.
    pub fn define_job<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(JobRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CanonicalError>> + Send + 'static,
    {
        self.jobs
            .insert(name.into(), Arc::new(move |req| Box::pin(handler(req))));
    }

    /// Attach an input validator to the function registered under `name`.
    pub fn define_validator<V>(&mut self, name: impl Into<String>, validator: V)
    where
        V: Fn(&FunctionRequest) -> Result<(), CanonicalError> + Send + Sync + 'static,
    {
        self.validators.insert(name.into(), Arc::new(validator));
    }

    pub fn get_function(&self, name: &str) -> Option<FunctionHandler> {
        self.functions.get(name).cloned()
    }

    pub fn get_job(&self, name: &str) -> Option<JobHandler> {
        self.jobs.get(name).cloned()
    }

    pub fn get_validator(&self, name: &str) -> Option<ValidatorHandler> {
        self.validators.get(name).cloned()
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for CloudRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudRegistry")
            .field("functions", &self.functions.len())
            .field("jobs", &self.jobs.len())
            .field("validators", &self.validators.len())
            .finish()
    }
}
