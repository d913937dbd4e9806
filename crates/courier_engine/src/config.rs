//! Configuration for the sync engine.

use courier_calling::CallTimerConfig;
use std::time::Duration;

/// Environment variable that disables every hotfix when set to `1`, `true`
/// or `yes`.
pub const SKIP_HOTFIX_ENV: &str = "COURIER_SKIP_HOTFIX";

/// Configuration for a user session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Version of the running client, used for hotfix markers.
    pub client_version: String,
    /// Backend id of this client, sent with notification requests.
    pub client_id: Option<String>,
    /// Page size for the notification stream.
    pub missing_events_page_size: usize,
    /// Maximum number of events handed to consumers at once.
    pub event_batch_size: usize,
    /// Page size for connection and conversation downloads.
    pub slow_sync_page_size: usize,
    /// Disables hotfixes.
    pub skip_hotfix: bool,
    /// Timeout for background fetches and tasks.
    pub background_timeout: Duration,
    /// Number of push event ids remembered for de-duplication.
    pub previously_received_limit: usize,
    /// Outgoing call timeouts.
    pub call_timer: CallTimerConfig,
}

impl SyncConfig {
    /// Creates a configuration for a client version.
    pub fn new(client_version: impl Into<String>) -> Self {
        Self {
            client_version: client_version.into(),
            client_id: None,
            missing_events_page_size: 500,
            event_batch_size: 500,
            slow_sync_page_size: 100,
            skip_hotfix: false,
            background_timeout: Duration::from_secs(30),
            previously_received_limit: 1_000,
            call_timer: CallTimerConfig::default(),
        }
    }

    /// Creates a configuration and applies environment overrides.
    pub fn from_env(client_version: impl Into<String>) -> Self {
        let skip = std::env::var(SKIP_HOTFIX_ENV).ok();
        let mut config = Self::new(client_version);
        config.skip_hotfix = is_truthy(skip.as_deref());
        config
    }

    /// Sets the client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the notification page size.
    pub fn with_missing_events_page_size(mut self, size: usize) -> Self {
        self.missing_events_page_size = size.max(1);
        self
    }

    /// Sets the event batch size.
    pub fn with_event_batch_size(mut self, size: usize) -> Self {
        self.event_batch_size = size.max(1);
        self
    }

    /// Sets the slow sync page size.
    pub fn with_slow_sync_page_size(mut self, size: usize) -> Self {
        self.slow_sync_page_size = size.max(1);
        self
    }

    /// Disables or enables hotfixes.
    pub fn with_skip_hotfix(mut self, skip: bool) -> Self {
        self.skip_hotfix = skip;
        self
    }

    /// Sets the background timeout.
    pub fn with_background_timeout(mut self, timeout: Duration) -> Self {
        self.background_timeout = timeout;
        self
    }

    /// Sets how many push event ids are remembered.
    pub fn with_previously_received_limit(mut self, limit: usize) -> Self {
        self.previously_received_limit = limit;
        self
    }

    /// Sets the call timer configuration.
    pub fn with_call_timer(mut self, call_timer: CallTimerConfig) -> Self {
        self.call_timer = call_timer;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

/// Interprets an environment flag.
pub(crate) fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("2.4.1")
            .with_client_id("abc123")
            .with_missing_events_page_size(50)
            .with_event_batch_size(0)
            .with_skip_hotfix(true)
            .with_background_timeout(Duration::from_secs(5));

        assert_eq!(config.client_version, "2.4.1");
        assert_eq!(config.client_id.as_deref(), Some("abc123"));
        assert_eq!(config.missing_events_page_size, 50);
        assert_eq!(config.event_batch_size, 1);
        assert!(config.skip_hotfix);
        assert_eq!(config.background_timeout, Duration::from_secs(5));
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::new("1.0");
        assert_eq!(config.missing_events_page_size, 500);
        assert_eq!(config.event_batch_size, 500);
        assert_eq!(config.background_timeout, Duration::from_secs(30));
        assert!(!config.skip_hotfix);
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy(Some("1")));
        assert!(is_truthy(Some("TRUE")));
        assert!(is_truthy(Some(" yes ")));
        assert!(!is_truthy(Some("0")));
        assert!(!is_truthy(Some("")));
        assert!(!is_truthy(None));
    }
}
