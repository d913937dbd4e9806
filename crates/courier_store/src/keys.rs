//! Well-known metadata keys used by the sync engine.

/// UUID of the last update event that was fully processed.
pub const LAST_UPDATE_EVENT_ID: &str = "sync.last_update_event_id";

/// Last version for which startup hotfixes were applied.
pub const HOTFIX_STARTUP_VERSION: &str = "hotfix.startup.version";

/// Last version for which after-sync hotfixes were applied.
pub const HOTFIX_AFTER_SYNC_VERSION: &str = "hotfix.after_sync.version";

/// Startup patches applied above the startup marker, as `version/name`.
pub const HOTFIX_STARTUP_PARTIAL: &str = "hotfix.startup.partial";

/// After-sync patches applied above the after-sync marker, as `version/name`.
pub const HOTFIX_AFTER_SYNC_PARTIAL: &str = "hotfix.after_sync.partial";

/// When `true`, no hotfix is applied at all.
pub const SKIP_HOTFIX: &str = "hotfix.skip";

/// Hex-encoded push token registered with the OS.
pub const PUSH_TOKEN: &str = "push.token";

/// Whether the push token was registered with the backend.
pub const PUSH_TOKEN_REGISTERED: &str = "push.token_registered";

/// Event ids already received through push notifications.
pub const PREVIOUSLY_RECEIVED_EVENT_IDS: &str = "events.previously_received_ids";
