//! Sync gateway: the authoritative element store behind an HTTP API and a
//! WebSocket channel.
//!
//! Every mutation, whether it arrives over HTTP, from a viewer's socket, or
//! as an AI action batch, is checked for binding integrity, committed, and
//! fanned out to all connected viewers in commit order.

pub mod connection;
pub mod handlers;
pub mod hub;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;
pub mod sync;

pub use hub::BroadcastHub;
pub use server::{router, start_gateway};
pub use state::GatewayState;
pub use sync::{AiOutcome, SyncGateway};
