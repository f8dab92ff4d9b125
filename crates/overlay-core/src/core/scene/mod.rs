//! # Scene Module
//!
//! The boundary to the rendering collaborator. [`backend::SceneBackend`] is what the
//! viewer drives; [`graph::SceneGraph`] is the headless arena implementation used
//! by the CLI host and the tests.

pub mod backend;
pub mod graph;

pub use backend::{
    Representation, RepresentationStyle, SceneBackend, SceneError, StructureHandles,
    VolumeHandles,
};
pub use graph::{NodeKind, SceneGraph, SceneNode};
