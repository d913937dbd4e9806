//! Login, login code and registration requests.

use super::{uuid_at, RequestGate, Transcoder, TranscoderKind};
use crate::auth::{AuthError, AuthPhase, AuthenticationStatus};
use crate::error::{SyncError, SyncResult};
use courier_protocol::{Request, Response};
use serde_json::json;
use std::sync::Arc;

/// Sends `POST /login` for pending credentials.
#[derive(Debug)]
pub struct LoginTranscoder {
    status: Arc<AuthenticationStatus>,
    gate: RequestGate,
}

impl LoginTranscoder {
    /// Creates the transcoder.
    pub fn new(status: Arc<AuthenticationStatus>) -> Self {
        Self {
            status,
            gate: RequestGate::default(),
        }
    }
}

impl Transcoder for LoginTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::Login
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        let AuthPhase::LoginPending(credentials) = self.status.phase() else {
            return Ok(None);
        };
        if !self.gate.try_begin() {
            return Ok(None);
        }
        Ok(Some(Request::post("/login", credentials.payload())))
    }

    fn handle_response(&self, _request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if !response.is_success() {
            self.status
                .did_fail_authentication(AuthError::from_response(response));
            return Ok(());
        }

        let payload = response.payload.clone().unwrap_or_default();
        match uuid_at(&payload, "user") {
            Ok(user) => {
                self.status.did_authenticate(user);
                Ok(())
            }
            Err(err) => {
                self.status.did_fail_authentication(AuthError::Unknown {
                    status: response.status,
                });
                Err(err)
            }
        }
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.gate.end();
        self.status.did_fail_authentication(AuthError::NetworkError);
    }
}

/// Sends `POST /login/send` to request a login code by SMS.
#[derive(Debug)]
pub struct LoginCodeTranscoder {
    status: Arc<AuthenticationStatus>,
    gate: RequestGate,
}

impl LoginCodeTranscoder {
    /// Creates the transcoder.
    pub fn new(status: Arc<AuthenticationStatus>) -> Self {
        Self {
            status,
            gate: RequestGate::default(),
        }
    }
}

impl Transcoder for LoginCodeTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::LoginCode
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        let AuthPhase::LoginCodePending(phone) = self.status.phase() else {
            return Ok(None);
        };
        if !self.gate.try_begin() {
            return Ok(None);
        }
        Ok(Some(Request::post("/login/send", json!({ "phone": phone }))))
    }

    fn handle_response(&self, _request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if response.is_success() {
            self.status.did_send_login_code();
        } else {
            self.status
                .did_fail_login_code(AuthError::from_response(response));
        }
        Ok(())
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.gate.end();
        self.status.did_fail_login_code(AuthError::NetworkError);
    }
}

/// Sends `POST /register`; a new account logs in with the same email and
/// password.
#[derive(Debug)]
pub struct RegistrationTranscoder {
    status: Arc<AuthenticationStatus>,
    gate: RequestGate,
}

impl RegistrationTranscoder {
    /// Creates the transcoder.
    pub fn new(status: Arc<AuthenticationStatus>) -> Self {
        Self {
            status,
            gate: RequestGate::default(),
        }
    }
}

impl Transcoder for RegistrationTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::Registration
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        let AuthPhase::RegistrationPending(data) = self.status.phase() else {
            return Ok(None);
        };
        if !self.gate.try_begin() {
            return Ok(None);
        }
        Ok(Some(Request::post("/register", data.payload())))
    }

    fn handle_response(&self, _request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        let AuthPhase::RegistrationPending(data) = self.status.phase() else {
            return Ok(());
        };
        if response.is_success() {
            self.status.did_register(&data);
        } else {
            self.status
                .did_fail_authentication(AuthError::from_response(response));
        }
        Ok(())
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.gate.end();
        self.status.did_fail_authentication(AuthError::NetworkError);
    }
}
