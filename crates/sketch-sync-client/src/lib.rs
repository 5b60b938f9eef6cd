//! Viewer side of the sync protocol.
//!
//! A [`Reconciler`] applies server events to a local scene and turns local
//! edits into outbound frames; [`SyncClient`] runs it over a WebSocket and
//! reconnects with a fixed delay, starting from a fresh snapshot each time.

pub mod client;
pub mod error;
pub mod reconcile;
pub mod scene;

pub use client::SyncClient;
pub use error::ClientError;
pub use reconcile::{LocalEdit, Origin, Reconciler, RendererRequest, SceneChange, SceneEvent};
pub use scene::{LocalScene, SceneElement};
