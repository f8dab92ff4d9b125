use crate::core::models::color::Color;
use crate::core::models::ids::NodeId;
use crate::core::models::structure::StructureModel;
use crate::core::models::volume::VolumeData;
use nalgebra::Matrix4;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("Scene node {0:?} does not exist")]
    NodeNotFound(NodeId),
    #[error("Scene node {0:?} is not a representation")]
    NotARepresentation(NodeId),
    #[error("The scene root cannot be removed")]
    RootRemoval,
    #[error("Cannot build representations for an empty model '{0}'")]
    EmptyModel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepresentationStyle {
    Cartoon,
    BallAndStick,
    Isosurface,
}

/// Visual state of one representation node.
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub style: RepresentationStyle,
    pub color: Color,
    pub visible: bool,
    /// Absolute contour level; only set for isosurfaces.
    pub iso_level: Option<f64>,
}

/// Nodes created for one structure.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureHandles {
    pub model: NodeId,
    pub representations: Vec<NodeId>,
}

/// Nodes created for one density map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeHandles {
    pub data: NodeId,
    pub surface: NodeId,
}

/// Operations the viewer needs from a rendering engine.
///
/// All node handles are owned by the backend; the viewer only stores the keys it
/// was given and hands them back.
pub trait SceneBackend {
    /// Adds a structure model and its default representations.
    fn add_structure(
        &mut self,
        label: &str,
        model: &StructureModel,
        color: Color,
    ) -> Result<StructureHandles, SceneError>;

    /// Adds a density grid and its isosurface at the absolute `iso_level`.
    fn add_volume(
        &mut self,
        label: &str,
        volume: &VolumeData,
        color: Color,
        iso_level: f64,
    ) -> Result<VolumeHandles, SceneError>;

    /// Inserts a transform above `node` and returns the transform node.
    fn apply_transform(
        &mut self,
        node: NodeId,
        transform: &Matrix4<f64>,
    ) -> Result<NodeId, SceneError>;

    fn set_visibility(&mut self, representation: NodeId, visible: bool) -> Result<(), SceneError>;

    fn set_color(&mut self, representation: NodeId, color: Color) -> Result<(), SceneError>;

    fn set_iso_level(&mut self, representation: NodeId, level: f64) -> Result<(), SceneError>;

    /// Removes `node`, every ancestor that existed only to host it, and all
    /// descendants of the topmost removed node.
    fn remove(&mut self, node: NodeId) -> Result<(), SceneError>;

    /// Drops everything below the root.
    fn clear(&mut self);
}
