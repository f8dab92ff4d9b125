use crate::core::io::formats::StructureFormat;
use crate::core::models::color::Color;
use crate::core::models::ids::ItemId;
use crate::core::models::item::Item;
use crate::core::models::volume::VolumeStats;
use crate::engine::threshold::contour_level;
use serde::{Deserialize, Serialize};

/// Every action tag a host may send.
pub const ACTIONS: [&str; 10] = [
    "loadStructure",
    "loadEmdbMap",
    "loadStructureFromSource",
    "loadVolumeFromSource",
    "setVisibility",
    "setColor",
    "setIsoValue",
    "deleteItem",
    "clear",
    "getItems",
];

/// Host to viewer. Thresholds are in sigma units; colors are packed `0xRRGGBB`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    LoadStructure {
        pdb_id: String,
    },
    LoadEmdbMap {
        emdb_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iso_value: Option<f64>,
    },
    LoadStructureFromSource {
        url: String,
        format: StructureFormat,
    },
    LoadVolumeFromSource {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iso_value: Option<f64>,
    },
    SetVisibility {
        item_id: ItemId,
        visible: bool,
    },
    SetColor {
        item_id: ItemId,
        color: Color,
    },
    SetIsoValue {
        item_id: ItemId,
        iso_value: f64,
    },
    DeleteItem {
        item_id: ItemId,
    },
    Clear,
    GetItems,
}

impl Command {
    /// The wire tag of this command.
    pub fn action(&self) -> &'static str {
        match self {
            Command::LoadStructure { .. } => ACTIONS[0],
            Command::LoadEmdbMap { .. } => ACTIONS[1],
            Command::LoadStructureFromSource { .. } => ACTIONS[2],
            Command::LoadVolumeFromSource { .. } => ACTIONS[3],
            Command::SetVisibility { .. } => ACTIONS[4],
            Command::SetColor { .. } => ACTIONS[5],
            Command::SetIsoValue { .. } => ACTIONS[6],
            Command::DeleteItem { .. } => ACTIONS[7],
            Command::Clear => ACTIONS[8],
            Command::GetItems => ACTIONS[9],
        }
    }
}

/// Wire view of a registry item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ItemView {
    Structure {
        id: ItemId,
        visible: bool,
        color: Color,
        format: StructureFormat,
        is_reference: bool,
    },
    Map {
        id: ItemId,
        visible: bool,
        color: Color,
        iso_value: f64,
        /// Display-only; derived from `iso_value` and `stats`.
        absolute_iso_value: f64,
        stats: VolumeStats,
        is_inverted: bool,
    },
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        match item {
            Item::Structure(s) => ItemView::Structure {
                id: s.id.clone(),
                visible: s.visible,
                color: s.color,
                format: s.format,
                is_reference: s.is_reference,
            },
            Item::Map(m) => ItemView::Map {
                id: m.id.clone(),
                visible: m.visible,
                color: m.color,
                iso_value: m.iso_value,
                absolute_iso_value: contour_level(m.iso_value, m.is_inverted, &m.stats),
                stats: m.stats,
                is_inverted: m.is_inverted,
            },
        }
    }
}

pub fn item_views(items: &[Item]) -> Vec<ItemView> {
    items.iter().map(ItemView::from).collect()
}

/// Viewer to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    Ready,
    ItemsChanged { items: Vec<ItemView> },
    StructureLoaded { item: ItemView },
    MapLoaded { item: ItemView },
    Error { action: String, message: String },
}
