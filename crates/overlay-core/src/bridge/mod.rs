//! # Bridge Module
//!
//! The host-facing protocol. Hosts send [`protocol::Command`]s and observe
//! [`protocol::Event`]s; [`handler::BridgeHandler`] turns one into calls on the
//! [`crate::engine::lifecycle::Viewer`] and reports the outcome as the other.
//! A failing command produces an `error` event and never stops later commands.

pub mod handler;
pub mod protocol;

pub use handler::{BridgeError, BridgeHandler, EventEmitter};
pub use protocol::{Command, Event, ItemView};
