//! Push token registration.

use super::{RequestGate, Transcoder, TranscoderKind};
use crate::auth::AuthenticationStatus;
use crate::error::{SyncError, SyncResult};
use courier_protocol::{Request, Response};
use courier_store::{keys, MetaValue, MetadataStore};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Uploads the device push token once per token.
pub struct PushTokenTranscoder {
    store: Arc<dyn MetadataStore>,
    auth: Arc<AuthenticationStatus>,
    gate: RequestGate,
}

impl PushTokenTranscoder {
    /// Creates the transcoder.
    pub fn new(store: Arc<dyn MetadataStore>, auth: Arc<AuthenticationStatus>) -> Self {
        Self {
            store,
            auth,
            gate: RequestGate::default(),
        }
    }

    /// Stores a new device token. A changed token is registered again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set_token(&self, token: &str) -> SyncResult<()> {
        if self.store.get_text(keys::PUSH_TOKEN)?.as_deref() == Some(token) {
            return Ok(());
        }
        self.store
            .set(keys::PUSH_TOKEN, MetaValue::Text(token.to_string()))?;
        self.store
            .set(keys::PUSH_TOKEN_REGISTERED, MetaValue::Bool(false))?;
        Ok(())
    }

    /// Returns true if the stored token was registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_registered(&self) -> SyncResult<bool> {
        Ok(self
            .store
            .get_bool(keys::PUSH_TOKEN_REGISTERED)?
            .unwrap_or(false))
    }
}

impl Transcoder for PushTokenTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::PushToken
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if !self.auth.is_authenticated() || self.is_registered()? {
            return Ok(None);
        }
        let Some(token) = self.store.get_text(keys::PUSH_TOKEN)? else {
            return Ok(None);
        };
        if !self.gate.try_begin() {
            return Ok(None);
        }
        Ok(Some(Request::post(
            "/push/tokens",
            json!({ "token": token, "transport": "APNS" }),
        )))
    }

    fn handle_response(&self, _request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if response.is_success() {
            info!("push token registered");
            self.store
                .set(keys::PUSH_TOKEN_REGISTERED, MetaValue::Bool(true))?;
        } else if response.is_permanent_error() {
            warn!(status = response.status, "push token rejected");
            self.store.remove(keys::PUSH_TOKEN)?;
        }
        Ok(())
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.gate.end();
    }
}

impl std::fmt::Debug for PushTokenTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushTokenTranscoder")
            .field("in_flight", &self.gate.is_busy())
            .finish_non_exhaustive()
    }
}
