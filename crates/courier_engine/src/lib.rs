//! # Courier Sync Engine
//!
//! Event-driven sync engine for the Courier messaging client.
//!
//! This crate provides:
//! - Update event buffering while a sync is in progress
//! - Sync phases (slow sync, quick sync, 404 fallback)
//! - Per-entity transcoders behind a request strategy
//! - Versioned hotfix patches at startup and after sync
//! - Voice channels and call state uploads
//! - Local notifications and background operation tracking
//! - A user session facade for application lifecycle callbacks
//!
//! ## Architecture
//!
//! The engine is pull-based and synchronous:
//! 1. The owner asks the [`SyncStrategy`] for the next request
//! 2. The [`Transport`] sends it and the response is handed back
//! 3. Downloaded and pushed events flow through the strategy to every
//!    event-consuming transcoder and observer
//!
//! [`OperationLoop`] drives steps 1 and 2 until the strategy is idle;
//! [`UserSession`] wires everything together.
//!
//! ## Key Invariants
//!
//! - Live events received while syncing are buffered and delivered once,
//!   in receipt order, when the sync finishes
//! - A hotfix patch runs at most once per persisted marker
//! - The last update event id only moves forward after a processed page
//! - No lock is held while consumers, delegates or handlers run

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod buffer;
pub mod calls;
pub mod config;
pub mod decoder;
pub mod error;
pub mod hotfix;
pub mod model;
pub mod notifications;
pub mod operation_loop;
pub mod operation_status;
pub mod paginator;
pub mod session;
pub mod strategy;
pub mod sync_status;
pub mod transcoder;
pub mod transport;

pub use auth::{
    AuthError, AuthEventHub, AuthPhase, AuthenticationEvent, AuthenticationStatus, Credentials,
    ObserverToken, RegistrationData,
};
pub use buffer::{FlushableCollection, UpdateEventConsumer, UpdateEventsBuffer};
pub use calls::{CallStateUpdate, VoiceChannels};
pub use config::{SyncConfig, SKIP_HOTFIX_ENV};
pub use decoder::EventDecoder;
pub use error::{SyncError, SyncResult, VersionError};
pub use hotfix::{HotFix, HotFixDirectory, HotFixPhase, HotFixReport, Version};
pub use model::{
    Connection, ConnectionStatus, Conversation, ConversationKind, DeliveryState, GraphCounts,
    Message, ObjectGraph, SystemMessageKind, User,
};
pub use notifications::{
    LocalNotification, LocalNotificationDispatcher, NotificationAction, NotificationCategory,
};
pub use operation_loop::{LoopStats, OperationLoop};
pub use operation_status::{
    BackgroundTaskHandler, BackgroundTaskResult, FetchHandler, FetchResult, OperationState,
    OperationStatus, OperationStatusDelegate,
};
pub use paginator::{ListPaginator, PageOutcome};
pub use session::{LaunchOptions, UrlSessionHandler, UserActivity, UserSession};
pub use strategy::{ScheduledRequest, SyncStrategy};
pub use sync_status::{SyncPhase, SyncStateDelegate, SyncStatus, SyncStatusEvent};
pub use transcoder::{Transcoder, TranscoderDirectory, TranscoderKind};
pub use transport::{MockTransport, Transport};
