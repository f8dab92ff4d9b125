use super::color::Color;
use super::ids::{ItemId, NodeId};
use super::volume::VolumeStats;
use crate::core::io::formats::StructureFormat;

/// A loaded atomic structure and the scene nodes that display it.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureItem {
    pub id: ItemId,
    /// Scene node holding the structure's coordinates.
    pub model_node: NodeId,
    /// Representation nodes (cartoon, ball-and-stick) in creation order.
    pub representations: Vec<NodeId>,
    pub visible: bool,
    pub color: Color,
    /// Format the structure was parsed from.
    pub format: StructureFormat,
    /// `true` for the single structure every later structure is superposed onto.
    pub is_reference: bool,
}

/// A loaded density map and its isosurface.
#[derive(Debug, Clone, PartialEq)]
pub struct MapItem {
    pub id: ItemId,
    /// Scene node holding the volume data.
    pub data_node: NodeId,
    /// Isosurface representation node.
    pub surface_node: NodeId,
    pub visible: bool,
    pub color: Color,
    /// Isosurface threshold in sigma units, as requested by the caller.
    pub iso_value: f64,
    pub stats: VolumeStats,
    /// `true` when the grid uses a reversed sign convention for density.
    pub is_inverted: bool,
}

/// An entry of the item registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Structure(StructureItem),
    Map(MapItem),
}

impl Item {
    pub fn id(&self) -> &ItemId {
        match self {
            Item::Structure(s) => &s.id,
            Item::Map(m) => &m.id,
        }
    }

    pub fn visible(&self) -> bool {
        match self {
            Item::Structure(s) => s.visible,
            Item::Map(m) => m.visible,
        }
    }

    pub fn color(&self) -> Color {
        match self {
            Item::Structure(s) => s.color,
            Item::Map(m) => m.color,
        }
    }

    /// Maps never carry the reference flag.
    pub fn is_reference(&self) -> bool {
        matches!(self, Item::Structure(s) if s.is_reference)
    }

    pub fn is_structure(&self) -> bool {
        matches!(self, Item::Structure(_))
    }

    pub fn as_structure(&self) -> Option<&StructureItem> {
        match self {
            Item::Structure(s) => Some(s),
            Item::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapItem> {
        match self {
            Item::Map(m) => Some(m),
            Item::Structure(_) => None,
        }
    }
}

impl From<StructureItem> for Item {
    fn from(item: StructureItem) -> Self {
        Item::Structure(item)
    }
}

impl From<MapItem> for Item {
    fn from(item: MapItem) -> Self {
        Item::Map(item)
    }
}
