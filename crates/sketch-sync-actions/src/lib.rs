//! Semantic action translation.
//!
//! External agents describe diagram changes as an ordered list of
//! `{action, element}` objects. This crate validates them into typed
//! [`Action`]s, applies a batch to an element store as one logical
//! transaction, and defines the [`ActionSource`] seam that produces batches.

pub mod action;
pub mod error;
pub mod source;
pub mod translator;

pub use action::{Action, ActionKind, RawAction};
pub use error::ActionError;
pub use source::{ActionPlan, ActionSource, HttpActionSource, ProposeRequest};
pub use translator::{ActionFailure, ActionTranslator, BatchOutcome, BatchSummary};
