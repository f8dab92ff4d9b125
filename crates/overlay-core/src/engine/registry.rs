use crate::core::models::ids::ItemId;
use crate::core::models::item::Item;
use std::collections::HashMap;

/// The authoritative table of loaded items.
///
/// Iteration follows insertion order; replacing an existing entry keeps its
/// position.
#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    order: Vec<ItemId>,
    items: HashMap<ItemId, Item>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an item, returning the previous entry under the same id.
    pub fn upsert(&mut self, item: Item) -> Option<Item> {
        let id = item.id().clone();
        let previous = self.items.insert(id.clone(), item);
        if previous.is_none() {
            self.order.push(id);
        }
        previous
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &ItemId) -> Option<&mut Item> {
        self.items.get_mut(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<Item> {
        let removed = self.items.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// All items in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &Item> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn snapshot(&self) -> Vec<Item> {
        self.all().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.items.clear();
    }

    /// The earliest inserted structure still present.
    pub fn first_structure_id(&self) -> Option<ItemId> {
        self.all()
            .find(|item| item.is_structure())
            .map(|item| item.id().clone())
    }

    /// Makes `id` the only structure flagged as reference. Returns `false` when
    /// `id` is not a registered structure, in which case nothing changes.
    pub fn mark_reference(&mut self, id: &ItemId) -> bool {
        if !matches!(self.items.get(id), Some(Item::Structure(_))) {
            return false;
        }
        for item in self.items.values_mut() {
            if let Item::Structure(structure) = item {
                structure.is_reference = structure.id == *id;
            }
        }
        true
    }

    pub fn reference_id(&self) -> Option<&ItemId> {
        self.all().find(|item| item.is_reference()).map(Item::id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::io::formats::StructureFormat;
    use crate::core::models::color::DEFAULT_PALETTE;
    use crate::core::models::ids::NodeId;
    use crate::core::models::item::{MapItem, StructureItem};
    use crate::core::models::volume::VolumeStats;

    pub(crate) fn structure(id: &str, is_reference: bool) -> Item {
        Item::Structure(StructureItem {
            id: ItemId::from(id),
            model_node: NodeId::default(),
            representations: Vec::new(),
            visible: true,
            color: DEFAULT_PALETTE[0],
            format: StructureFormat::Mmcif,
            is_reference,
        })
    }

    pub(crate) fn map(id: &str) -> Item {
        Item::Map(MapItem {
            id: ItemId::from(id),
            data_node: NodeId::default(),
            surface_node: NodeId::default(),
            visible: true,
            color: DEFAULT_PALETTE[1],
            iso_value: 1.5,
            stats: VolumeStats {
                min: -2.0,
                max: 10.0,
                mean: 0.0,
                sigma: 2.0,
            },
            is_inverted: false,
        })
    }

    fn ids(registry: &ItemRegistry) -> Vec<&str> {
        registry.all().map(|item| item.id().as_str()).collect()
    }

    #[test]
    fn all_follows_insertion_order() {
        let mut registry = ItemRegistry::new();
        registry.upsert(map("EMD-1"));
        registry.upsert(structure("B", false));
        registry.upsert(structure("A", false));

        assert_eq!(ids(&registry), vec!["EMD-1", "B", "A"]);
        assert_eq!(registry.first_structure_id(), Some(ItemId::from("B")));
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut registry = ItemRegistry::new();
        registry.upsert(structure("A", false));
        registry.upsert(structure("B", false));

        let previous = registry.upsert(structure("A", true));

        assert!(previous.is_some_and(|item| !item.is_reference()));
        assert_eq!(ids(&registry), vec!["A", "B"]);
        assert!(registry.get(&ItemId::from("A")).unwrap().is_reference());
    }

    #[test]
    fn remove_and_clear() {
        let mut registry = ItemRegistry::new();
        registry.upsert(structure("A", true));
        registry.upsert(map("EMD-1"));

        assert!(registry.remove(&ItemId::from("missing")).is_none());
        assert!(registry.remove(&ItemId::from("A")).is_some());
        assert_eq!(ids(&registry), vec!["EMD-1"]);
        assert_eq!(registry.first_structure_id(), None);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.all().count(), 0);
    }

    #[test]
    fn mark_reference_keeps_a_single_flag() {
        let mut registry = ItemRegistry::new();
        registry.upsert(structure("A", true));
        registry.upsert(structure("B", false));
        registry.upsert(map("EMD-1"));

        assert!(registry.mark_reference(&ItemId::from("B")));
        assert_eq!(registry.all().filter(|item| item.is_reference()).count(), 1);
        assert_eq!(registry.reference_id(), Some(&ItemId::from("B")));

        assert!(!registry.mark_reference(&ItemId::from("EMD-1")));
        assert_eq!(registry.reference_id(), Some(&ItemId::from("B")));
    }
}
