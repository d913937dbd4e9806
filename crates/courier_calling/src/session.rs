//! Shared record of the last call session.

use parking_lot::Mutex;
use std::time::SystemTime;
use tracing::debug;

/// The last call session seen by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    /// Session identifier, if one was recorded.
    pub identifier: Option<String>,
    /// When the session started, if known.
    pub started_at: Option<SystemTime>,
}

/// Thread-safe registry of the last call session identifier and its start
/// date.
///
/// A single instance is shared behind an `Arc` by every voice channel of a
/// user session. Reads and writes are serialized by one lock, so a reader
/// never observes a torn value.
///
/// # Example
///
/// ```rust
/// use courier_calling::CallSessionRegistry;
/// use std::sync::Arc;
///
/// let registry = Arc::new(CallSessionRegistry::new());
/// registry.set_last_session_identifier("session-1");
/// assert_eq!(registry.last_session_identifier().as_deref(), Some("session-1"));
/// ```
#[derive(Debug)]
pub struct CallSessionRegistry {
    inner: Mutex<CallSession>,
}

impl CallSessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CallSession {
                identifier: None,
                started_at: None,
            }),
        }
    }

    /// Returns the last session identifier.
    pub fn last_session_identifier(&self) -> Option<String> {
        self.inner.lock().identifier.clone()
    }

    /// Replaces the last session identifier.
    pub fn set_last_session_identifier(&self, identifier: impl Into<String>) {
        self.inner.lock().identifier = Some(identifier.into());
    }

    /// Returns the last session start date.
    pub fn last_session_start_date(&self) -> Option<SystemTime> {
        self.inner.lock().started_at
    }

    /// Replaces the last session start date.
    pub fn set_last_session_start_date(&self, started_at: SystemTime) {
        self.inner.lock().started_at = Some(started_at);
    }

    /// Records identifier and start date together.
    pub fn record_start(&self, identifier: impl Into<String>, started_at: SystemTime) {
        let identifier = identifier.into();
        debug!(session = %identifier, "call session started");
        let mut inner = self.inner.lock();
        inner.identifier = Some(identifier);
        inner.started_at = Some(started_at);
    }

    /// Returns a consistent copy of both values.
    pub fn last_session(&self) -> CallSession {
        self.inner.lock().clone()
    }

    /// Forgets the last session.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.identifier = None;
        inner.started_at = None;
    }
}

impl Default for CallSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_empty() {
        let registry = CallSessionRegistry::new();
        assert_eq!(registry.last_session_identifier(), None);
        assert_eq!(registry.last_session_start_date(), None);
    }

    #[test]
    fn record_start_sets_both() {
        let registry = CallSessionRegistry::new();
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        registry.record_start("abc", at);
        let session = registry.last_session();
        assert_eq!(session.identifier.as_deref(), Some("abc"));
        assert_eq!(session.started_at, Some(at));

        registry.clear();
        assert_eq!(registry.last_session().identifier, None);
    }

    #[test]
    fn concurrent_writers_leave_a_written_value() {
        let registry = Arc::new(CallSessionRegistry::new());
        let written: Vec<String> = (0..8).map(|i| format!("session-{i}")).collect();

        let handles: Vec<_> = written
            .iter()
            .cloned()
            .map(|id| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..200 {
                        registry.set_last_session_identifier(id.clone());
                        let seen = registry.last_session_identifier();
                        assert!(seen.is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let last = registry.last_session_identifier().unwrap();
        assert!(written.contains(&last));
    }
}
