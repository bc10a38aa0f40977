//! Dispatch engine configuration.

use std::time::Duration;

use canopy_core::ApplicationId;

/// Configuration owned by one server instance (one application/tenant).
///
/// Built once at startup; the dispatcher reads it, never writes it. Tests
/// construct it directly.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub application_id: ApplicationId,
    pub master_key: String,
    pub slow_tracking: Option<SlowTrackingConfig>,
}

/// Slow-execution tracking knobs.
///
/// The timeout serves double duty: it is both the analyzer's persistence
/// threshold and the function deadline. A function that would qualify as
/// slow is cut off at exactly that point and finishes in the background.
/// Jobs are never deadline-enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowTrackingConfig {
    pub timeout: Duration,
}

impl DispatchConfig {
    pub fn new(application_id: impl Into<ApplicationId>, master_key: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            master_key: master_key.into(),
            slow_tracking: None,
        }
    }

    pub fn with_slow_tracking(mut self, timeout: Duration) -> Self {
        self.slow_tracking = Some(SlowTrackingConfig { timeout });
        self
    }

    /// Deadline applied to function invocations, if any.
    pub fn function_deadline(&self) -> Option<Duration> {
        self.slow_tracking.map(|cfg| cfg.timeout)
    }

    /// Duration at or above which an invocation gets a forensic record.
    pub fn slow_threshold(&self) -> Option<Duration> {
        self.slow_tracking.map(|cfg| cfg.timeout)
    }
}
