//! Idempotency guard for retried requests.
//!
//! Keyed by a caller-supplied request token. A token can be claimed once per
//! TTL window; replays fail with the fixed `DUPLICATE_REQUEST` error before
//! any handler resolution happens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use canopy_core::CanonicalError;

/// Default window during which a token counts as a replay.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct IdempotencyGuard {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a token. `Ok` exactly once per TTL window; replays get
    /// `{159, "Duplicate request"}`.
    ///
    /// Expired claims are reaped on the way in, so the map stays bounded by
    /// the request rate within one window.
    pub fn claim(&self, token: &str) -> Result<(), CanonicalError> {
        let now = Instant::now();
        let mut seen = self.seen.lock().expect("idempotency lock poisoned");
        seen.retain(|_, claimed_at| now.duration_since(*claimed_at) < self.ttl);

        if seen.contains_key(token) {
            return Err(CanonicalError::duplicate_request());
        }
        seen.insert(token.to_string(), now);
        Ok(())
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
