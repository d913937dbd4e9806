//! CLI command implementations.

pub mod call_states;
pub mod hotfix;
pub mod inspect;
pub mod replay;
pub mod version_compare;
