// Run Observer
// Per-run event handle passed to every component instead of a global logger

use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info, warn};

/// Receives lifecycle events of one report run. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn connect_attempt(&self, _attempt: u32, _max_attempts: u32) {}
    fn connect_failed(&self, _attempt: u32, _error: &str) {}
    fn retry_scheduled(&self, _attempt: u32, _delay: Duration) {}
    fn connected(&self, _session_id: &str, _attempts: u32) {}
    fn session_closed(&self, _session_id: &str) {}
    fn close_failed(&self, _session_id: &str, _error: &str) {}

    fn query_started(&self, _query: &str) {}
    fn query_finished(&self, _query: &str, _rows: usize, _elapsed: Duration) {}
    fn query_failed(&self, _query: &str, _error: &str) {}

    fn target_skipped(&self, _target: &str, _reason: &str) {}
    fn target_succeeded(&self, _target: &str, _path: &Path) {}
    fn target_failed(&self, _target: &str, _reason: &str) {}
}

/// Forwards run events to `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn connect_attempt(&self, attempt: u32, max_attempts: u32) {
        info!(attempt, max_attempts, "attempting to connect");
    }

    fn connect_failed(&self, attempt: u32, error: &str) {
        warn!(attempt, error, "connection attempt failed");
    }

    fn retry_scheduled(&self, attempt: u32, delay: Duration) {
        info!(attempt, delay_ms = delay.as_millis() as u64, "retrying after delay");
    }

    fn connected(&self, session_id: &str, attempts: u32) {
        info!(session_id, attempts, "connected and validated");
    }

    fn session_closed(&self, session_id: &str) {
        debug!(session_id, "session closed");
    }

    fn close_failed(&self, session_id: &str, error: &str) {
        warn!(session_id, error, "error while releasing session (ignored)");
    }

    fn query_started(&self, query: &str) {
        debug!(query, "executing query");
    }

    fn query_finished(&self, query: &str, rows: usize, elapsed: Duration) {
        info!(query, rows, elapsed_ms = elapsed.as_millis() as u64, "query finished");
    }

    fn query_failed(&self, query: &str, error: &str) {
        error!(query, error, "query failed, skipping");
    }

    fn target_skipped(&self, target: &str, reason: &str) {
        warn!(target, reason, "render target skipped");
    }

    fn target_succeeded(&self, target: &str, path: &Path) {
        info!(target, path = %path.display(), "render target written");
    }

    fn target_failed(&self, target: &str, reason: &str) {
        error!(target, reason, "render target failed");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Event {
        Attempt(u32),
        AttemptFailed(u32),
        Wait(u32, Duration),
        Connected(u32),
        Closed(String),
        CloseFailed(String),
        QueryStarted(String),
        QueryFinished(String, usize),
        QueryFailed(String),
        TargetSkipped(String),
        TargetSucceeded(String),
        TargetFailed(String),
    }

    /// Records every event for assertions
    #[derive(Debug, Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn waits(&self) -> usize {
            self.events().iter().filter(|e| matches!(e, Event::Wait(..))).count()
        }

        pub fn attempts(&self) -> usize {
            self.events().iter().filter(|e| matches!(e, Event::Attempt(_))).count()
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl RunObserver for RecordingObserver {
        fn connect_attempt(&self, attempt: u32, _max_attempts: u32) {
            self.push(Event::Attempt(attempt));
        }
        fn connect_failed(&self, attempt: u32, _error: &str) {
            self.push(Event::AttemptFailed(attempt));
        }
        fn retry_scheduled(&self, attempt: u32, delay: Duration) {
            self.push(Event::Wait(attempt, delay));
        }
        fn connected(&self, _session_id: &str, attempts: u32) {
            self.push(Event::Connected(attempts));
        }
        fn session_closed(&self, session_id: &str) {
            self.push(Event::Closed(session_id.to_string()));
        }
        fn close_failed(&self, session_id: &str, _error: &str) {
            self.push(Event::CloseFailed(session_id.to_string()));
        }
        fn query_started(&self, query: &str) {
            self.push(Event::QueryStarted(query.to_string()));
        }
        fn query_finished(&self, query: &str, rows: usize, _elapsed: Duration) {
            self.push(Event::QueryFinished(query.to_string(), rows));
        }
        fn query_failed(&self, query: &str, _error: &str) {
            self.push(Event::QueryFailed(query.to_string()));
        }
        fn target_skipped(&self, target: &str, _reason: &str) {
            self.push(Event::TargetSkipped(target.to_string()));
        }
        fn target_succeeded(&self, target: &str, _path: &Path) {
            self.push(Event::TargetSucceeded(target.to_string()));
        }
        fn target_failed(&self, target: &str, _reason: &str) {
            self.push(Event::TargetFailed(target.to_string()));
        }
    }
}
