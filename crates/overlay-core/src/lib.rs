//! # overlay Core Library
//!
//! State management for a viewer that progressively loads molecular structures and
//! density maps, superposes them onto one shared spatial frame, and lets a host
//! mutate their visual state through a command/event protocol.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (items, colors, structure
//!   models, volume grids), file readers, rigid-body geometry, and the headless
//!   scene arena that stands in for a rendering engine.
//!
//! - **[`engine`]: The Logic Core.** The stateful components: color assignment,
//!   threshold conversion, the item registry, the reference & alignment engine, and
//!   the [`engine::lifecycle::Viewer`] that orchestrates load, mutate, delete, and
//!   clear operations.
//!
//! - **[`bridge`]: The Public Protocol.** A closed set of typed commands and events
//!   and a dispatcher that isolates failures per command.

pub mod bridge;
pub mod core;
pub mod engine;
