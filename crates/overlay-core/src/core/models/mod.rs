//! # Core Models Module
//!
//! Data structures describing everything the viewer can hold.
//!
//! - [`ids`] - item identifiers and scene node keys
//! - [`color`] - packed 24-bit RGB colors and the default palette
//! - [`item`] - the structure/map item union stored in the registry
//! - [`structure`] - atomic coordinate models parsed from structure files
//! - [`volume`] - density grids, their geometry and summary statistics

pub mod color;
pub mod ids;
pub mod item;
pub mod structure;
pub mod volume;
