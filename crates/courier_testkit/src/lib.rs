//! # Courier Testkit
//!
//! Test utilities for the Courier sync engine.
//!
//! This crate provides:
//! - Session fixtures over a scripted transport
//! - Notification payload builders
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_session() {
//!     let fixture = TestSession::logged_in();
//!     fixture
//!         .did_receive_push_channel_data(&payloads::notification(vec![]))
//!         .unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
