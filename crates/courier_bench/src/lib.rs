//! Benchmarks for the Courier sync engine.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
