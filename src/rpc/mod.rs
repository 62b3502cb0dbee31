//! Typed call/event semantics over a single [`MessageChannel`](crate::channel::MessageChannel).
//!
//! One side serves named methods ([`RpcServer`]), the other issues calls
//! and receives pushed events ([`RpcClient`]). Events may flow either way.

pub mod client;
pub mod envelope;
pub mod listeners;
pub mod server;

pub use client::RpcClient;
pub use envelope::Envelope;
pub use listeners::{Listeners, Subscription};
pub use server::{Emitter, MethodTable, RpcServer};
