//! The user session.
//!
//! [`UserSession`] wires the sync machinery together and is the single
//! entry point for application lifecycle callbacks: launch, background and
//! foreground transitions, remote and local notifications, notification
//! actions, background fetches and user activities.
//!
//! ## Request flow
//!
//! The session never sends on its own thread. Callbacks that produce work
//! end with [`UserSession::perform_requests`], which drains the strategy
//! through the transport until no transcoder has anything left to send.
//! Sync transcoders stay silent until the session is authenticated.

use crate::auth::{AuthEventHub, AuthenticationStatus, Credentials, RegistrationData};
use crate::calls::VoiceChannels;
use crate::config::SyncConfig;
use crate::decoder::EventDecoder;
use crate::error::{SyncError, SyncResult};
use crate::hotfix::{HotFix, HotFixDirectory, HotFixReport, Version};
use crate::model::{ConnectionStatus, ConversationKind, ObjectGraph};
use crate::notifications::{LocalNotification, LocalNotificationDispatcher, NotificationAction};
use crate::operation_loop::{LoopStats, OperationLoop};
use crate::operation_status::{FetchHandler, FetchResult, OperationStatus};
use crate::strategy::SyncStrategy;
use crate::sync_status::{SyncStateDelegate, SyncStatus};
use crate::transcoder::{
    CallingTranscoder, ConnectionTranscoder, ConversationTranscoder, LastUpdateEventIdTranscoder,
    LoginCodeTranscoder, LoginTranscoder, MessageTranscoder, MissingUpdateEventsTranscoder,
    PushTokenTranscoder, RegistrationTranscoder, Transcoder, TranscoderDirectory, TranscoderKind,
    UserTranscoder,
};
use crate::transport::Transport;
use courier_calling::{CallClosedReason, CallSessionRegistry, VoiceChannelState};
use courier_protocol::{
    EventSource, Notification, ProtocolError, Request, Response, UpdateEvent,
};
use courier_store::MetadataStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound of requests sent by one [`UserSession::perform_requests`].
const MAX_REQUESTS_PER_RUN: u64 = 1_000;

/// Completion handler of a background URL session.
pub type UrlSessionHandler = Box<dyn FnOnce() + Send>;

/// What the application was launched with.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Remote notification payload that launched the application.
    pub remote_notification: Option<Value>,
    /// Local notification the user tapped to launch the application.
    pub local_notification: Option<LocalNotification>,
}

/// An activity handed over by the system, such as a call started from the
/// contacts list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserActivity {
    /// Start an audio call with the given users.
    StartAudioCall {
        /// Users to call.
        contacts: Vec<Uuid>,
    },
    /// Start a video call with the given users.
    StartVideoCall {
        /// Users to call.
        contacts: Vec<Uuid>,
    },
    /// Any other activity type.
    Other(String),
}

/// Hides a sync transcoder until the session is logged in.
struct RequiresLogin {
    inner: Arc<dyn Transcoder>,
    auth: Arc<AuthenticationStatus>,
}

impl Transcoder for RequiresLogin {
    fn kind(&self) -> TranscoderKind {
        self.inner.kind()
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if !self.auth.is_authenticated() {
            return Ok(None);
        }
        self.inner.next_request()
    }

    fn handle_response(&self, request: &Request, response: &Response) -> SyncResult<()> {
        self.inner.handle_response(request, response)
    }

    fn handle_failure(&self, request: &Request, error: &SyncError) {
        self.inner.handle_failure(request, error);
    }

    fn is_event_consumer(&self) -> bool {
        self.inner.is_event_consumer()
    }

    fn consume_events(&self, events: &[UpdateEvent]) -> SyncResult<()> {
        self.inner.consume_events(events)
    }

    fn take_downloaded_events(&self) -> Vec<UpdateEvent> {
        self.inner.take_downloaded_events()
    }

    fn on_stream_interrupted(&self) {
        self.inner.on_stream_interrupted();
    }

    fn on_stream_established(&self) {
        self.inner.on_stream_established();
    }
}

/// A logged-in (or logging-in) user and everything syncing on its behalf.
pub struct UserSession {
    config: SyncConfig,
    version: Version,
    store: Arc<dyn MetadataStore>,
    graph: Arc<ObjectGraph>,
    auth: Arc<AuthenticationStatus>,
    strategy: Arc<SyncStrategy>,
    operation_loop: OperationLoop,
    hotfix: Arc<HotFix>,
    operation: Arc<OperationStatus>,
    channels: Arc<VoiceChannels>,
    dispatcher: Arc<LocalNotificationDispatcher>,
    push_token: Arc<PushTokenTranscoder>,
    url_sessions: Mutex<HashMap<String, UrlSessionHandler>>,
}

impl UserSession {
    /// Creates a session with the built-in hotfix patches and a fresh call
    /// session registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the client version does not parse or the
    /// persisted sync state cannot be read.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
    ) -> SyncResult<Self> {
        Self::with_parts(
            config,
            store,
            transport,
            HotFixDirectory::built_in(),
            Arc::new(CallSessionRegistry::new()),
        )
    }

    /// Creates a session with an explicit hotfix directory and call session
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the client version does not parse or the
    /// persisted sync state cannot be read.
    pub fn with_parts(
        config: SyncConfig,
        store: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
        hotfixes: HotFixDirectory,
        registry: Arc<CallSessionRegistry>,
    ) -> SyncResult<Self> {
        let version = Version::parse(&config.client_version)?;
        let graph = Arc::new(ObjectGraph::new());
        let auth = Arc::new(AuthenticationStatus::new(AuthEventHub::new(), graph.clone()));
        let status = Arc::new(SyncStatus::new(store.clone())?);
        let operation = Arc::new(OperationStatus::new(config.background_timeout));
        let channels = Arc::new(VoiceChannels::new(registry, config.call_timer.clone()));
        let hotfix = Arc::new(
            HotFix::new(hotfixes, store.clone(), graph.clone()).with_skip(config.skip_hotfix),
        );
        let push_token = Arc::new(PushTokenTranscoder::new(store.clone(), auth.clone()));

        let mut directory = TranscoderDirectory::new();
        directory.register(Arc::new(LoginTranscoder::new(auth.clone())));
        directory.register(Arc::new(LoginCodeTranscoder::new(auth.clone())));
        directory.register(Arc::new(RegistrationTranscoder::new(auth.clone())));
        directory.register(push_token.clone());
        let page_size = config.slow_sync_page_size;
        let sync: [Arc<dyn Transcoder>; 7] = [
            Arc::new(LastUpdateEventIdTranscoder::new(
                status.clone(),
                config.client_id.clone(),
            )),
            Arc::new(ConnectionTranscoder::new(graph.clone(), status.clone(), page_size)),
            Arc::new(ConversationTranscoder::new(graph.clone(), status.clone(), page_size)),
            Arc::new(UserTranscoder::new(graph.clone(), status.clone(), page_size)),
            Arc::new(MessageTranscoder::new(graph.clone())),
            Arc::new(CallingTranscoder::new(channels.clone(), graph.clone())),
            Arc::new(MissingUpdateEventsTranscoder::new(
                store.clone(),
                status.clone(),
                config.client_id.clone(),
                config.missing_events_page_size,
            )),
        ];
        for inner in sync {
            directory.register(Arc::new(RequiresLogin {
                inner,
                auth: auth.clone(),
            }));
        }

        let decoder = EventDecoder::new(store.clone(), config.previously_received_limit);
        let strategy = Arc::new(SyncStrategy::new(
            directory,
            status,
            decoder,
            hotfix.clone(),
            version.clone(),
            config.event_batch_size,
        ));
        let dispatcher = Arc::new(LocalNotificationDispatcher::new(
            graph.clone(),
            operation.clone(),
        ));
        strategy.add_event_consumer(dispatcher.clone());

        info!(version = %version, "user session created");
        Ok(Self {
            config,
            version,
            store,
            graph,
            auth,
            operation_loop: OperationLoop::new(strategy.clone(), transport),
            strategy,
            hotfix,
            operation,
            channels,
            dispatcher,
            push_token,
            url_sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the running client version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Returns the metadata store.
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Returns the object graph.
    pub fn graph(&self) -> &Arc<ObjectGraph> {
        &self.graph
    }

    /// Returns the authentication status.
    pub fn authentication(&self) -> &Arc<AuthenticationStatus> {
        &self.auth
    }

    /// Returns the authentication event hub.
    pub fn auth_events(&self) -> &AuthEventHub {
        self.auth.hub()
    }

    /// Returns the sync strategy.
    pub fn strategy(&self) -> &Arc<SyncStrategy> {
        &self.strategy
    }

    /// Returns the sync status.
    pub fn sync_status(&self) -> &Arc<SyncStatus> {
        self.strategy.status()
    }

    /// Returns the hotfix runner.
    pub fn hotfix(&self) -> &Arc<HotFix> {
        &self.hotfix
    }

    /// Returns the operation status.
    pub fn operation_status(&self) -> &Arc<OperationStatus> {
        &self.operation
    }

    /// Returns the voice channels.
    pub fn voice_channels(&self) -> &Arc<VoiceChannels> {
        &self.channels
    }

    /// Returns the call session registry.
    pub fn call_sessions(&self) -> &Arc<CallSessionRegistry> {
        self.channels.registry()
    }

    /// Returns the local notification dispatcher.
    pub fn notifications(&self) -> &Arc<LocalNotificationDispatcher> {
        &self.dispatcher
    }

    /// Sets the receiver of sync start and finish notifications.
    pub fn set_sync_delegate(&self, delegate: Arc<dyn SyncStateDelegate>) {
        self.strategy.set_delegate(delegate);
    }

    /// Sends requests until the strategy is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot schedule a request.
    pub fn perform_requests(&self) -> SyncResult<LoopStats> {
        self.operation_loop.run_until_idle(MAX_REQUESTS_PER_RUN)
    }

    // Lifecycle

    /// The application finished launching. Runs the startup hotfixes, then
    /// handles the notification the application was launched with, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the hotfix markers cannot be read or written.
    pub fn did_finish_launching(&self, options: LaunchOptions) -> SyncResult<HotFixReport> {
        let report = self.hotfix.apply_patches_at_startup(&self.version)?;
        if !report.applied.is_empty() {
            info!(applied = ?report.applied, "startup hotfixes applied");
        }
        if let Some(payload) = options.remote_notification {
            self.did_receive_remote_notification(&payload);
        }
        if let Some(note) = options.local_notification {
            self.did_receive_local_notification(&note);
        }
        Ok(report)
    }

    /// The application moved to the background.
    pub fn did_enter_background(&self) {
        debug!("did enter background");
        self.operation.set_in_background(true);
    }

    /// The application is about to move to the foreground.
    pub fn will_enter_foreground(&self) {
        debug!("will enter foreground");
        self.operation.set_in_background(false);
    }

    /// The platform issued a push token. The token is registered with the
    /// backend once logged in.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be stored.
    pub fn did_register_for_remote_notifications(&self, token: &[u8]) -> SyncResult<()> {
        let mut hex = String::with_capacity(token.len() * 2);
        for byte in token {
            let _ = write!(hex, "{byte:02x}");
        }
        self.push_token.set_token(&hex)?;
        self.perform_requests()?;
        Ok(())
    }

    /// A remote notification arrived. Its `data` member carries a backend
    /// notification whose events are applied right away.
    pub fn did_receive_remote_notification(&self, payload: &Value) -> FetchResult {
        if !self.auth.is_authenticated() {
            debug!("remote notification ignored, not logged in");
            return FetchResult::NoData;
        }
        let Some(data) = payload.get("data") else {
            debug!("remote notification without data");
            return FetchResult::NoData;
        };
        let notification = match Notification::from_json(data) {
            Ok(notification) => notification,
            Err(err) => {
                warn!(error = %err, "bad remote notification");
                return FetchResult::Failed;
            }
        };

        let events = notification.events(EventSource::PushNotification);
        let received = events.len();
        if let Err(err) = self.strategy.process_events(events) {
            warn!(error = %err, "failed to process pushed events");
            return FetchResult::Failed;
        }
        self.refresh_call_state();
        if let Err(err) = self.perform_requests() {
            warn!(error = %err, "requests after remote notification failed");
        }
        debug!(id = %notification.id, received, "remote notification processed");
        if received == 0 {
            FetchResult::NoData
        } else {
            FetchResult::NewData
        }
    }

    /// The user tapped a local notification. Returns the conversation to
    /// open; its notifications are cancelled.
    pub fn did_receive_local_notification(&self, note: &LocalNotification) -> Option<Uuid> {
        let conversation = note.conversation?;
        self.dispatcher.cancel_notifications(conversation);
        Some(conversation)
    }

    /// The user picked an action of a local notification. `response_text`
    /// is the typed reply for actions that take text.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification's conversation is unknown or the
    /// resulting requests cannot be scheduled.
    pub fn handle_action(
        &self,
        action: NotificationAction,
        note: &LocalNotification,
        response_text: Option<&str>,
    ) -> SyncResult<()> {
        if !note.offers(action) {
            warn!(action = %action, category = %note.category, "action not offered");
            return Ok(());
        }
        info!(action = %action, notification = %note.id, "notification action");

        match action {
            NotificationAction::Open => {}
            NotificationAction::Reply | NotificationAction::CallMessage => {
                let text = response_text.unwrap_or_default().trim();
                if text.is_empty() {
                    debug!("empty reply dropped");
                } else {
                    self.send_message(Self::conversation_of(note)?, text)?;
                }
            }
            NotificationAction::Like => {
                self.send_message(Self::conversation_of(note)?, "\u{2764}\u{fe0f}")?;
            }
            NotificationAction::Mute => {
                let conversation = Self::conversation_of(note)?;
                self.graph
                    .update_conversation(conversation, |c| c.muted = true)
                    .ok_or(SyncError::UnknownConversation(conversation))?;
            }
            NotificationAction::CallAccept | NotificationAction::CallBack => {
                self.join_call(Self::conversation_of(note)?, Instant::now())?;
            }
            NotificationAction::CallIgnore => {
                self.channels.ignore(Self::conversation_of(note)?)?;
            }
            NotificationAction::ConnectAccept => {
                let accepted = note.sender.is_some_and(|user| {
                    self.graph
                        .set_connection_status_locally(user, ConnectionStatus::Accepted)
                });
                if !accepted {
                    warn!(notification = %note.id, "no connection to accept");
                }
            }
        }

        if let Some(conversation) = note.conversation {
            self.dispatcher.cancel_notifications(conversation);
        }
        self.perform_requests()?;
        Ok(())
    }

    /// The system granted a background fetch. `handler` is called once the
    /// pending requests were sent, or with [`FetchResult::Failed`] when the
    /// fetch times out in [`tick`](Self::tick).
    ///
    /// A fetch already pending keeps its handler; the new one fails at once.
    pub fn perform_fetch(&self, now: Instant, handler: FetchHandler) {
        if !self.operation.start_background_fetch(now, handler) {
            return;
        }
        let before = self.graph.counts();
        let result = match self.perform_requests() {
            Ok(stats) if stats.transport_failed => FetchResult::Failed,
            Ok(_) if self.graph.counts() != before => FetchResult::NewData,
            Ok(_) => FetchResult::NoData,
            Err(err) => {
                warn!(error = %err, "background fetch failed");
                FetchResult::Failed
            }
        };
        self.operation.finish_background_fetch(result);
    }

    /// The system relaunched the application for a background URL session.
    /// `handler` runs when [`background_url_session_did_finish`] is called
    /// with the same identifier.
    ///
    /// [`background_url_session_did_finish`]: Self::background_url_session_did_finish
    pub fn handle_events_for_background_url_session(
        &self,
        identifier: impl Into<String>,
        handler: UrlSessionHandler,
    ) {
        let identifier = identifier.into();
        debug!(identifier = %identifier, "background url session events");
        let previous = self.url_sessions.lock().insert(identifier, handler);
        if let Some(previous) = previous {
            previous();
        }
    }

    /// The background URL session delivered all its events. Returns false
    /// if no handler waited for it.
    pub fn background_url_session_did_finish(&self, identifier: &str) -> bool {
        let handler = self.url_sessions.lock().remove(identifier);
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    /// Continues an activity handed over by the system. A call activity
    /// joins the call of the conversation with exactly the given contacts.
    /// Returns true if a call was started.
    pub fn continue_user_activity(&self, activity: &UserActivity) -> bool {
        let contacts = match activity {
            UserActivity::StartAudioCall { contacts }
            | UserActivity::StartVideoCall { contacts } => contacts,
            UserActivity::Other(kind) => {
                debug!(kind = %kind, "unsupported user activity");
                return false;
            }
        };
        if contacts.is_empty() {
            return false;
        }
        let Some(conversation) = self.conversation_with(contacts) else {
            warn!(contacts = contacts.len(), "no conversation for call activity");
            return false;
        };
        match self.join_call(conversation, Instant::now()) {
            Ok(_) => true,
            Err(err) => {
                warn!(conversation = %conversation, error = %err, "call activity failed");
                false
            }
        }
    }

    // Account

    /// Starts a login. The request is sent right away.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot schedule a request.
    pub fn login(&self, credentials: Credentials) -> SyncResult<LoopStats> {
        self.auth.login(credentials);
        self.perform_requests()
    }

    /// Requests a login code for a phone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot schedule a request.
    pub fn request_login_code(&self, phone: impl Into<String>) -> SyncResult<LoopStats> {
        self.auth.request_login_code(phone);
        self.perform_requests()
    }

    /// Registers a new account and logs in.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot schedule a request.
    pub fn register(&self, data: RegistrationData) -> SyncResult<LoopStats> {
        self.auth.register(data);
        self.perform_requests()
    }

    /// Logs out and stops syncing. Notifications are withdrawn.
    pub fn logout(&self) {
        info!("logging out");
        self.auth.logout();
        self.dispatcher.cancel_all();
        self.strategy.tear_down();
        self.dispatcher.tear_down();
    }

    // Conversations and calls

    /// Appends a message from the self user and sends it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthenticated`] before login,
    /// [`SyncError::UnknownConversation`] for an unknown conversation.
    pub fn send_message(&self, conversation: Uuid, text: &str) -> SyncResult<Uuid> {
        if !self.auth.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }
        let nonce = self
            .graph
            .append_outgoing_message(conversation, text)
            .ok_or(SyncError::UnknownConversation(conversation))?;
        self.perform_requests()?;
        Ok(nonce)
    }

    /// Joins the call of a conversation and uploads the join.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthenticated`] before login,
    /// [`SyncError::UnknownConversation`] for an unknown conversation.
    pub fn join_call(&self, conversation: Uuid, now: Instant) -> SyncResult<VoiceChannelState> {
        if !self.auth.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }
        let is_group = self
            .graph
            .conversation(conversation)
            .ok_or(SyncError::UnknownConversation(conversation))?
            .is_group();
        let state = self.channels.join(conversation, is_group, now);
        self.dispatcher.cancel_notifications(conversation);
        self.refresh_call_state();
        self.perform_requests()?;
        Ok(state)
    }

    /// Leaves the call of a conversation and uploads the leave.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversation has no voice channel.
    pub fn leave_call(&self, conversation: Uuid) -> SyncResult<VoiceChannelState> {
        let state = self.channels.leave(conversation)?;
        self.refresh_call_state();
        self.perform_requests()?;
        Ok(state)
    }

    // Push channel

    /// The push channel opened.
    pub fn push_channel_did_open(&self) {
        self.strategy.on_stream_established();
    }

    /// The push channel closed.
    pub fn push_channel_did_close(&self) {
        self.strategy.on_stream_interrupted();
    }

    /// A notification arrived over the push channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a notification.
    pub fn did_receive_push_channel_data(&self, payload: &Value) -> SyncResult<()> {
        let notification = Notification::from_json(payload)?;
        self.strategy
            .process_events(notification.events(EventSource::WebSocket))?;
        self.refresh_call_state();
        Ok(())
    }

    /// Runs timers: background handlers and unanswered outgoing calls that
    /// ran out of time. Returns the calls closed since the last tick.
    pub fn tick(&self, now: Instant) -> Vec<(Uuid, CallClosedReason)> {
        let expired = self.operation.expire(now);
        if expired > 0 {
            debug!(expired, "background handlers expired");
        }
        self.channels.expire(now);
        self.refresh_call_state();
        if let Err(err) = self.perform_requests() {
            warn!(error = %err, "requests after tick failed");
        }
        self.channels.take_closed_calls()
    }

    fn refresh_call_state(&self) {
        self.operation
            .set_has_ongoing_call(self.channels.has_active_call());
    }

    fn conversation_of(note: &LocalNotification) -> SyncResult<Uuid> {
        note.conversation
            .ok_or_else(|| ProtocolError::MissingField("conversation").into())
    }

    /// Finds the conversation whose other participants are exactly
    /// `contacts`. A single contact matches the one-on-one conversation.
    fn conversation_with(&self, contacts: &[Uuid]) -> Option<Uuid> {
        let wanted: BTreeSet<Uuid> = contacts.iter().copied().collect();
        let conversations = self.graph.conversations();
        let matches = |kind: ConversationKind| {
            conversations
                .iter()
                .find(|c| c.kind == kind && c.participants == wanted)
                .map(|c| c.id)
        };
        if wanted.len() == 1 {
            matches(ConversationKind::OneOnOne).or_else(|| matches(ConversationKind::Group))
        } else {
            matches(ConversationKind::Group)
        }
    }
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSession")
            .field("version", &self.version)
            .field("auth", &self.auth)
            .field("operation", &self.operation.state())
            .finish_non_exhaustive()
    }
}
