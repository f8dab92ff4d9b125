use super::backend::{
    Representation, RepresentationStyle, SceneBackend, SceneError, StructureHandles,
    VolumeHandles,
};
use crate::core::models::color::Color;
use crate::core::models::ids::NodeId;
use crate::core::models::structure::StructureModel;
use crate::core::models::volume::VolumeData;
use nalgebra::Matrix4;
use slotmap::SlotMap;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Transform(Matrix4<f64>),
    Model { label: String, atom_count: usize },
    Volume { label: String, dimensions: [usize; 3] },
    Representation(Representation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// A headless scene: an arena of nodes with parent back-references.
///
/// Transforms are nodes of their own, inserted as the new parent of whatever they
/// move, so a node's world placement is the product of its transform ancestors.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: SlotMap<NodeId, SceneNode>,
    root: NodeId,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(SceneNode {
            kind: NodeKind::Root,
            parent: None,
            children: Vec::new(),
        });
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` when only the root is left.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn representation(&self, id: NodeId) -> Option<&Representation> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Representation(rep) => Some(rep),
            _ => None,
        }
    }

    /// Composes every transform between `id` and the root.
    pub fn world_transform(&self, id: NodeId) -> Option<Matrix4<f64>> {
        let mut current = self.nodes.get(id)?;
        let mut world = Matrix4::identity();
        for _ in 0..self.nodes.len() {
            if let NodeKind::Transform(local) = &current.kind {
                world = local * world;
            }
            match current.parent.and_then(|p| self.nodes.get(p)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Some(world)
    }

    fn insert(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.nodes.insert(SceneNode {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    fn representation_mut(&mut self, id: NodeId) -> Result<&mut Representation, SceneError> {
        match &mut self.nodes.get_mut(id).ok_or(SceneError::NodeNotFound(id))?.kind {
            NodeKind::Representation(rep) => Ok(rep),
            _ => Err(SceneError::NotARepresentation(id)),
        }
    }

    /// Walks up from `id` while the parent hosts nothing else, stopping below the root.
    fn removal_root(&self, id: NodeId) -> NodeId {
        let mut top = id;
        for _ in 0..self.nodes.len() {
            let Some(parent_id) = self.nodes.get(top).and_then(|n| n.parent) else {
                break;
            };
            if parent_id == self.root {
                break;
            }
            match self.nodes.get(parent_id) {
                Some(parent) if parent.children.len() == 1 => top = parent_id,
                _ => break,
            }
        }
        top
    }

    fn remove_subtree(&mut self, id: NodeId) -> usize {
        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(next) {
                removed += 1;
                stack.extend(node.children);
            }
        }
        removed
    }
}

impl SceneBackend for SceneGraph {
    fn add_structure(
        &mut self,
        label: &str,
        model: &StructureModel,
        color: Color,
    ) -> Result<StructureHandles, SceneError> {
        if model.is_empty() {
            return Err(SceneError::EmptyModel(label.to_string()));
        }
        let model_node = self.insert(
            self.root,
            NodeKind::Model {
                label: label.to_string(),
                atom_count: model.len(),
            },
        );

        let mut styles = Vec::with_capacity(2);
        if model.has_polymer_atoms() {
            styles.push(RepresentationStyle::Cartoon);
        }
        if model.has_hetero_atoms() {
            styles.push(RepresentationStyle::BallAndStick);
        }
        let representations = styles
            .into_iter()
            .map(|style| {
                self.insert(
                    model_node,
                    NodeKind::Representation(Representation {
                        style,
                        color,
                        visible: true,
                        iso_level: None,
                    }),
                )
            })
            .collect();

        Ok(StructureHandles {
            model: model_node,
            representations,
        })
    }

    fn add_volume(
        &mut self,
        label: &str,
        volume: &VolumeData,
        color: Color,
        iso_level: f64,
    ) -> Result<VolumeHandles, SceneError> {
        let data = self.insert(
            self.root,
            NodeKind::Volume {
                label: label.to_string(),
                dimensions: volume.geometry().dimensions,
            },
        );
        let surface = self.insert(
            data,
            NodeKind::Representation(Representation {
                style: RepresentationStyle::Isosurface,
                color,
                visible: true,
                iso_level: Some(iso_level),
            }),
        );
        Ok(VolumeHandles { data, surface })
    }

    fn apply_transform(
        &mut self,
        node: NodeId,
        transform: &Matrix4<f64>,
    ) -> Result<NodeId, SceneError> {
        if node == self.root {
            return Err(SceneError::RootRemoval);
        }
        let parent = self
            .nodes
            .get(node)
            .ok_or(SceneError::NodeNotFound(node))?
            .parent;

        let transform_node = self.nodes.insert(SceneNode {
            kind: NodeKind::Transform(*transform),
            parent,
            children: vec![node],
        });
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(p)) {
            for child in p.children.iter_mut().filter(|c| **c == node) {
                *child = transform_node;
            }
        }
        if let Some(n) = self.nodes.get_mut(node) {
            n.parent = Some(transform_node);
        }
        Ok(transform_node)
    }

    fn set_visibility(&mut self, representation: NodeId, visible: bool) -> Result<(), SceneError> {
        self.representation_mut(representation)?.visible = visible;
        Ok(())
    }

    fn set_color(&mut self, representation: NodeId, color: Color) -> Result<(), SceneError> {
        self.representation_mut(representation)?.color = color;
        Ok(())
    }

    fn set_iso_level(&mut self, representation: NodeId, level: f64) -> Result<(), SceneError> {
        let rep = self.representation_mut(representation)?;
        if rep.style != RepresentationStyle::Isosurface {
            return Err(SceneError::NotARepresentation(representation));
        }
        rep.iso_level = Some(level);
        Ok(())
    }

    fn remove(&mut self, node: NodeId) -> Result<(), SceneError> {
        if node == self.root {
            return Err(SceneError::RootRemoval);
        }
        if !self.nodes.contains_key(node) {
            return Err(SceneError::NodeNotFound(node));
        }

        let top = self.removal_root(node);
        let parent = self.nodes.get(top).and_then(|n| n.parent);
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(p)) {
            p.children.retain(|c| *c != top);
        }
        let removed = self.remove_subtree(top);
        trace!(removed, "Removed scene subtree");
        Ok(())
    }

    fn clear(&mut self) {
        let root = self.root;
        self.nodes.retain(|id, _| id == root);
        if let Some(r) = self.nodes.get_mut(root) {
            r.children.clear();
        }
    }
}
