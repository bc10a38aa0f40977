//! Per-invocation event timeline.
//!
//! An ordered, append-only list of labeled monotonic timestamps marking
//! pipeline stage boundaries. One timeline per invocation; the handler task
//! racing a deadline and the dispatcher both hold the same timeline, so the
//! sequence lives behind a lock.

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One labeled point on the timeline.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub name: String,
    pub at: Instant,
}

/// Shared append-only timeline.
///
/// `Instant` is monotonic, so timestamps are strictly non-decreasing in call
/// order regardless of wall-clock adjustments.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Arc<Mutex<Vec<EventRecord>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `(name, now)` to the timeline.
    pub fn push(&self, name: impl Into<String>) {
        let record = EventRecord {
            name: name.into(),
            at: Instant::now(),
        };
        self.events
            .lock()
            .expect("timeline lock poisoned")
            .push(record);
    }

    /// Copy of the events appended so far.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.events.lock().expect("timeline lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("timeline lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_preserves_call_order() {
        let timeline = Timeline::new();
        timeline.push("a");
        timeline.push("b");
        timeline.push("c");

        let events = timeline.snapshot();
        let names: Vec<_> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn timestamps_never_decrease() {
        let timeline = Timeline::new();
        for i in 0..10 {
            timeline.push(format!("stage-{i}"));
        }
        let events = timeline.snapshot();
        for pair in events.windows(2) {
            assert!(pair[1].at >= pair[0].at);
        }
    }

    #[test]
    fn clones_share_the_same_sequence() {
        let timeline = Timeline::new();
        let shared = timeline.clone();
        shared.push("from-clone");
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn snapshot_is_detached() {
        let timeline = Timeline::new();
        timeline.push("a");
        let snap = timeline.snapshot();
        timeline.push("b");
        assert_eq!(snap.len(), 1);
        assert_eq!(timeline.len(), 2);
    }
}
