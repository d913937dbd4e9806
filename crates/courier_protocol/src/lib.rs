//! # Courier Protocol
//!
//! Wire types shared by the Courier sync engine and its tools.
//!
//! This crate provides:
//! - [`UpdateEvent`] for the backend event stream
//! - [`Notification`] and [`NotificationPage`] for the notification stream
//! - [`Request`] and [`Response`] for the transport boundary
//!
//! Backend payloads are JSON; this is a pure protocol crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod notification;
mod request;

pub use error::{ProtocolError, ProtocolResult};
pub use event::{EventSource, UpdateEvent, UpdateEventType};
pub use notification::{Notification, NotificationPage};
pub use request::{Method, Request, Response};
