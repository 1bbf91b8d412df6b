//! Transport-agnostic primitives for the paircam session link
//!
//! This crate holds everything the link shares with its embedders without
//! dragging in a transport: the error taxonomy, the retry executor, the
//! session data model, the connection event union, and the collaborator
//! trait boundary to the surrounding application.
//!
//! The link itself (signaling, ICE, peer negotiation, lifecycle) lives in
//! `paircam-session`.

#![warn(clippy::all)]

pub mod collaborators;
pub mod error;
pub mod events;
pub mod retry;
pub mod session;

pub use collaborators::{
    CommandHistorySink, CommandRecord, PairingDirectory, PairingStore, PresenceApi,
};
pub use error::{Error, MediaError, Result};
pub use events::ConnectionEvent;
pub use retry::{Retrier, RetryPolicy};
pub use session::{Role, Session};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
