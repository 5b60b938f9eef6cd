//! Core element model, store, binding integrity, config and wire protocol for sketch-sync.

pub mod bindings;
pub mod config;
pub mod element;
pub mod error;
pub mod protocol;
pub mod store;
