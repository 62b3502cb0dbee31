#![forbid(unsafe_code)]

//! Inter-context coordination core for agent hosts.
//!
//! - [`channel`]: duplex message channels (in-process, NDJSON stream, local socket).
//! - [`rpc`]: request/response correlation and events over one channel.
//! - [`share`]: debounced, coalescing sync of session state to a share endpoint.
//! - [`process`]: shell resolution and process-tree supervision.
//! - [`persistence`]: key-path record store backed by `SQLite`.

pub mod channel;
pub mod config;
pub mod errors;
pub mod persistence;
pub mod process;
pub mod rpc;
pub mod share;

pub use config::TetherConfig;
pub use errors::{AppError, Result};
