//! Authentication state and events.
//!
//! Observers subscribe to an [`AuthEventHub`] and receive every
//! [`AuthenticationEvent`] synchronously, in subscription order. A
//! subscription lasts as long as its [`ObserverToken`].

use crate::model::ObjectGraph;
use courier_protocol::Response;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why authentication failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong email, phone, password or code.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// The account was not activated yet.
    #[error("account pending activation")]
    PendingActivation,
    /// The account is suspended.
    #[error("account suspended")]
    AccountSuspended,
    /// A login code was already sent and is still valid.
    #[error("login code pending")]
    PendingLogin,
    /// The account has too many clients.
    #[error("client limit reached")]
    ClientLimitReached,
    /// The backend could not be reached.
    #[error("network error")]
    NetworkError,
    /// Any other failure.
    #[error("unknown authentication error (status {status})")]
    Unknown {
        /// Response status.
        status: u16,
    },
}

impl AuthError {
    /// Derives the error from a failed response.
    pub fn from_response(response: &Response) -> Self {
        if response.status == 0 || response.status >= 500 {
            return AuthError::NetworkError;
        }
        match response.label() {
            Some("invalid-credentials") | Some("invalid-phone") | Some("invalid-code") => {
                AuthError::InvalidCredentials
            }
            Some("pending-activation") => AuthError::PendingActivation,
            Some("suspended") => AuthError::AccountSuspended,
            Some("pending-login") => AuthError::PendingLogin,
            Some("client-limit") | Some("too-many-clients") => AuthError::ClientLimitReached,
            _ => AuthError::Unknown {
                status: response.status,
            },
        }
    }

    /// Returns the label of the error.
    pub fn label(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid-credentials",
            AuthError::PendingActivation => "pending-activation",
            AuthError::AccountSuspended => "suspended",
            AuthError::PendingLogin => "pending-login",
            AuthError::ClientLimitReached => "client-limit",
            AuthError::NetworkError => "network",
            AuthError::Unknown { .. } => "unknown",
        }
    }
}

/// An authentication outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationEvent {
    /// Login succeeded.
    AuthenticationDidSucceed,
    /// Login or registration failed.
    AuthenticationDidFail(AuthError),
    /// A login code was sent.
    LoginCodeRequestDidSucceed,
    /// A login code could not be sent.
    LoginCodeRequestDidFail(AuthError),
}

type Observer = Arc<dyn Fn(&AuthenticationEvent) + Send + Sync>;

struct HubInner {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Observer)>>,
}

/// Delivers authentication events to subscribed observers.
#[derive(Clone)]
pub struct AuthEventHub {
    inner: Arc<HubInner>,
}

impl AuthEventHub {
    /// Creates a hub without observers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_id: AtomicU64::new(1),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribes an observer. The subscription ends when the returned
    /// token is dropped.
    pub fn subscribe(
        &self,
        observer: impl Fn(&AuthenticationEvent) + Send + Sync + 'static,
    ) -> ObserverToken {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.lock().push((id, Arc::new(observer)));
        ObserverToken {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers an event to every observer in subscription order.
    pub fn notify(&self, event: &AuthenticationEvent) {
        let observers: Vec<Observer> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        debug!(?event, observers = observers.len(), "authentication event");
        for observer in observers {
            observer(event);
        }
    }

    /// Returns the number of observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }
}

impl Default for AuthEventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthEventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEventHub")
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Keeps an observer subscribed.
#[must_use = "dropping the token unsubscribes the observer"]
#[derive(Debug)]
pub struct ObserverToken {
    id: u64,
    hub: Weak<HubInner>,
}

impl ObserverToken {
    /// Unsubscribes now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ObserverToken {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.observers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Login credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Email and password.
    Email {
        /// Email address.
        email: String,
        /// Password.
        password: String,
    },
    /// Phone number and login code.
    Phone {
        /// Phone number.
        phone: String,
        /// Code received by SMS.
        code: String,
    },
}

impl Credentials {
    /// Returns the login request body.
    pub fn payload(&self) -> Value {
        match self {
            Credentials::Email { email, password } => {
                json!({ "email": email, "password": password })
            }
            Credentials::Phone { phone, code } => json!({ "phone": phone, "code": code }),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Email { email, .. } => f
                .debug_struct("Email")
                .field("email", email)
                .finish_non_exhaustive(),
            Credentials::Phone { phone, .. } => f
                .debug_struct("Phone")
                .field("phone", phone)
                .finish_non_exhaustive(),
        }
    }
}

/// A new account.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationData {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Password.
    pub password: String,
}

impl RegistrationData {
    /// Returns the registration request body.
    pub fn payload(&self) -> Value {
        json!({ "name": self.name, "email": self.email, "password": self.password })
    }
}

impl fmt::Debug for RegistrationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationData")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// What the authentication flow is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    /// Nothing to do.
    Unauthenticated,
    /// A login request must be sent.
    LoginPending(Credentials),
    /// A login code request must be sent.
    LoginCodePending(String),
    /// A registration request must be sent.
    RegistrationPending(RegistrationData),
    /// Logged in as the given user.
    Authenticated(Uuid),
}

/// Authentication state shared by the login transcoders.
pub struct AuthenticationStatus {
    phase: Mutex<AuthPhase>,
    hub: AuthEventHub,
    graph: Arc<ObjectGraph>,
}

impl AuthenticationStatus {
    /// Creates an unauthenticated status.
    pub fn new(hub: AuthEventHub, graph: Arc<ObjectGraph>) -> Self {
        Self {
            phase: Mutex::new(AuthPhase::Unauthenticated),
            hub,
            graph,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> AuthPhase {
        self.phase.lock().clone()
    }

    /// Returns the event hub.
    pub fn hub(&self) -> &AuthEventHub {
        &self.hub
    }

    /// Returns true once logged in.
    pub fn is_authenticated(&self) -> bool {
        matches!(*self.phase.lock(), AuthPhase::Authenticated(_))
    }

    /// Returns the self user id once logged in.
    pub fn self_user_id(&self) -> Option<Uuid> {
        match *self.phase.lock() {
            AuthPhase::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    /// Starts a login.
    pub fn login(&self, credentials: Credentials) {
        info!(?credentials, "login requested");
        *self.phase.lock() = AuthPhase::LoginPending(credentials);
    }

    /// Requests a login code for a phone number.
    pub fn request_login_code(&self, phone: impl Into<String>) {
        *self.phase.lock() = AuthPhase::LoginCodePending(phone.into());
    }

    /// Starts a registration.
    pub fn register(&self, data: RegistrationData) {
        info!(?data, "registration requested");
        *self.phase.lock() = AuthPhase::RegistrationPending(data);
    }

    /// Marks the session as authenticated without a login round trip.
    pub fn restore(&self, user_id: Uuid) {
        self.graph.set_self_user_id(user_id);
        *self.phase.lock() = AuthPhase::Authenticated(user_id);
    }

    /// Logs out.
    pub fn logout(&self) {
        *self.phase.lock() = AuthPhase::Unauthenticated;
    }

    pub(crate) fn did_authenticate(&self, user_id: Uuid) {
        info!(user = %user_id, "authenticated");
        self.restore(user_id);
        self.hub.notify(&AuthenticationEvent::AuthenticationDidSucceed);
    }

    pub(crate) fn did_fail_authentication(&self, error: AuthError) {
        warn!(label = error.label(), "authentication failed");
        *self.phase.lock() = AuthPhase::Unauthenticated;
        self.hub
            .notify(&AuthenticationEvent::AuthenticationDidFail(error));
    }

    pub(crate) fn did_send_login_code(&self) {
        *self.phase.lock() = AuthPhase::Unauthenticated;
        self.hub.notify(&AuthenticationEvent::LoginCodeRequestDidSucceed);
    }

    pub(crate) fn did_fail_login_code(&self, error: AuthError) {
        warn!(label = error.label(), "login code request failed");
        *self.phase.lock() = AuthPhase::Unauthenticated;
        self.hub
            .notify(&AuthenticationEvent::LoginCodeRequestDidFail(error));
    }

    pub(crate) fn did_register(&self, data: &RegistrationData) {
        info!(email = %data.email, "registered, logging in");
        *self.phase.lock() = AuthPhase::LoginPending(Credentials::Email {
            email: data.email.clone(),
            password: data.password.clone(),
        });
    }
}

impl fmt::Debug for AuthenticationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationStatus")
            .field("phase", &*self.phase.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder(
        hub: &AuthEventHub,
        tag: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> ObserverToken {
        let log = Arc::clone(log);
        hub.subscribe(move |event| log.lock().push(format!("{tag}:{event:?}")))
    }

    #[test]
    fn delivery_in_subscription_order() {
        let hub = AuthEventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = recorder(&hub, "a", &log);
        let _b = recorder(&hub, "b", &log);

        hub.notify(&AuthenticationEvent::AuthenticationDidSucceed);
        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("a:"));
        assert!(log[1].starts_with("b:"));
    }

    #[test]
    fn dropping_token_unsubscribes() {
        let hub = AuthEventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&hub, "a", &log);
        let b = recorder(&hub, "b", &log);
        assert_eq!(hub.observer_count(), 2);

        drop(a);
        b.unsubscribe();
        assert_eq!(hub.observer_count(), 0);

        hub.notify(&AuthenticationEvent::LoginCodeRequestDidSucceed);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn token_outliving_hub() {
        let hub = AuthEventHub::new();
        let token = hub.subscribe(|_| {});
        drop(hub);
        drop(token);
    }

    #[test]
    fn errors_from_responses() {
        let response = |status, label: &str| Response::new(status, Some(json!({ "label": label })));

        assert_eq!(
            AuthError::from_response(&response(403, "invalid-credentials")),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            AuthError::from_response(&response(403, "pending-activation")),
            AuthError::PendingActivation
        );
        assert_eq!(
            AuthError::from_response(&response(403, "suspended")),
            AuthError::AccountSuspended
        );
        assert_eq!(
            AuthError::from_response(&response(403, "too-many-clients")),
            AuthError::ClientLimitReached
        );
        assert_eq!(
            AuthError::from_response(&Response::network_error()),
            AuthError::NetworkError
        );
        assert_eq!(
            AuthError::from_response(&Response::status(418)),
            AuthError::Unknown { status: 418 }
        );
        assert_eq!(AuthError::PendingLogin.label(), "pending-login");
    }

    #[test]
    fn status_transitions_notify() {
        let hub = AuthEventHub::new();
        let graph = Arc::new(ObjectGraph::new());
        let status = AuthenticationStatus::new(hub.clone(), graph.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        let _token = recorder(&hub, "x", &log);

        status.login(Credentials::Email {
            email: "a@example.com".into(),
            password: "secret".into(),
        });
        assert!(matches!(status.phase(), AuthPhase::LoginPending(_)));

        let user = Uuid::new_v4();
        status.did_authenticate(user);
        assert_eq!(status.self_user_id(), Some(user));
        assert_eq!(graph.self_user_id(), Some(user));

        status.did_fail_authentication(AuthError::InvalidCredentials);
        assert!(!status.is_authenticated());
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let credentials = Credentials::Email {
            email: "a@example.com".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
