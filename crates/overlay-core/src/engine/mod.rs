//! # Engine Module
//!
//! The stateful half of the library. Everything here is owned by one
//! [`lifecycle::Viewer`] and mutated only through it.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - palette, threshold defaults, alignment tolerances, source templates
//! - **Color Assignment** ([`colors`]) - the cyclic palette cursor
//! - **Thresholds** ([`threshold`]) - relative/absolute isosurface conversion and inversion detection
//! - **Registry** ([`registry`]) - the authoritative item table, in insertion order
//! - **Alignment** ([`alignment`]) - the reference state machine and per-item transforms
//! - **Sources** ([`source`]) - the retrieval seam used by loads
//! - **Notification** ([`notify`]) - the change bus registry snapshots are published on
//! - **Lifecycle** ([`lifecycle`]) - load, mutate, delete and clear
//! - **Error Handling** ([`error`]) - engine-level error types

pub mod alignment;
pub mod colors;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod registry;
pub mod source;
pub mod threshold;
