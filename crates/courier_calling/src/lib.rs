//! # Courier Calling
//!
//! Call state for the Courier sync engine.
//!
//! This crate provides:
//! - [`state_for`], the total derivation of a [`VoiceChannelState`] from
//!   the five call signals
//! - [`participant_state_for`] for per-participant connection state
//! - [`VoiceChannel`], which tracks the signals of one conversation
//! - [`CallTimer`] for outgoing call timeouts
//! - [`CallSessionRegistry`], the shared record of the last call session
//!
//! ## Signals
//!
//! | signal          | meaning                                          |
//! |-----------------|--------------------------------------------------|
//! | `self_joined`   | the self user joined the call (on any device)     |
//! | `other_joined`  | at least one other participant joined            |
//! | `device_active` | the call is active on this device                |
//! | `flow_active`   | media is flowing on this device                  |
//! | `ignoring_call` | the user chose to ignore the incoming call       |

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod error;
mod participant;
mod reason;
mod session;
mod state;
mod timer;

pub use channel::VoiceChannel;
pub use error::{CallingError, CallingResult};
pub use participant::{participant_state_for, ConnectionState, VoiceChannelParticipantState};
pub use reason::CallClosedReason;
pub use session::{CallSession, CallSessionRegistry};
pub use state::{state_for, CallSignals, VoiceChannelState};
pub use timer::{CallTimer, CallTimerConfig};
