//! Outgoing call timeouts.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Timeouts for unanswered outgoing calls.
#[derive(Debug, Clone)]
pub struct CallTimerConfig {
    /// Timeout for group conversations.
    pub group_timeout: Duration,
    /// Timeout for one-to-one conversations.
    pub one_to_one_timeout: Duration,
    /// When set, replaces both timeouts.
    pub test_timeout: Option<Duration>,
}

impl CallTimerConfig {
    /// Creates the default configuration: 30 s for groups, 60 s otherwise.
    pub fn new() -> Self {
        Self {
            group_timeout: Duration::from_secs(30),
            one_to_one_timeout: Duration::from_secs(60),
            test_timeout: None,
        }
    }

    /// Sets the group timeout.
    pub fn with_group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = timeout;
        self
    }

    /// Sets the one-to-one timeout.
    pub fn with_one_to_one_timeout(mut self, timeout: Duration) -> Self {
        self.one_to_one_timeout = timeout;
        self
    }

    /// Overrides every timeout.
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = Some(timeout);
        self
    }

    /// Returns the timeout for a conversation kind.
    pub fn timeout_for(&self, is_group: bool) -> Duration {
        match (self.test_timeout, is_group) {
            (Some(timeout), _) => timeout,
            (None, true) => self.group_timeout,
            (None, false) => self.one_to_one_timeout,
        }
    }
}

impl Default for CallTimerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One deadline per conversation for unanswered outgoing calls.
///
/// The timer does not run a clock of its own; callers pass `now` and poll
/// [`CallTimer::expired`].
#[derive(Debug)]
pub struct CallTimer {
    config: CallTimerConfig,
    deadlines: Mutex<HashMap<Uuid, Instant>>,
}

impl CallTimer {
    /// Creates a timer.
    pub fn new(config: CallTimerConfig) -> Self {
        Self {
            config,
            deadlines: Mutex::new(HashMap::new()),
        }
    }

    /// Starts or restarts the timer for a conversation.
    pub fn start(&self, conversation: Uuid, is_group: bool, now: Instant) {
        let deadline = now + self.config.timeout_for(is_group);
        debug!(%conversation, is_group, "call timer started");
        self.deadlines.lock().insert(conversation, deadline);
    }

    /// Stops the timer for a conversation. Returns true if one was running.
    pub fn stop(&self, conversation: Uuid) -> bool {
        self.deadlines.lock().remove(&conversation).is_some()
    }

    /// Returns true if a timer runs for the conversation.
    pub fn is_running(&self, conversation: Uuid) -> bool {
        self.deadlines.lock().contains_key(&conversation)
    }

    /// Removes and returns every conversation whose deadline has passed.
    pub fn expired(&self, now: Instant) -> Vec<Uuid> {
        let mut deadlines = self.deadlines.lock();
        let mut fired: Vec<(Uuid, Instant)> = deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*id, *deadline))
            .collect();
        fired.sort_by_key(|(_, deadline)| *deadline);

        for (id, _) in &fired {
            deadlines.remove(id);
        }
        fired.into_iter().map(|(id, _)| id).collect()
    }
}
