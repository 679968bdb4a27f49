//! Ordered snapshot of one collection.

use crate::model::item::{CollectionId, ItemId, PositionKey, SequenceItem};
use std::collections::HashSet;

/// Items of one collection in canonical sequence order.
///
/// Positioned items come first in `(position, created_at, item_id)` order,
/// unpositioned items trail in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSnapshot {
    collection_id: CollectionId,
    items: Vec<SequenceItem>,
}

impl SequenceSnapshot {
    /// Builds a snapshot, sorting items canonically.
    ///
    /// Items belonging to another collection are dropped.
    pub fn from_items(collection_id: CollectionId, items: Vec<SequenceItem>) -> Self {
        let mut items: Vec<SequenceItem> = items
            .into_iter()
            .filter(|item| item.collection_id == collection_id)
            .collect();
        items.sort_by(SequenceItem::sequence_cmp);
        Self {
            collection_id,
            items,
        }
    }

    /// Empty snapshot for a collection with no items.
    pub fn empty(collection_id: CollectionId) -> Self {
        Self {
            collection_id,
            items: Vec::new(),
        }
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    /// All items, positioned first.
    pub fn items(&self) -> &[SequenceItem] {
        &self.items
    }

    /// Positioned items in sequence order.
    pub fn positioned(&self) -> impl Iterator<Item = &SequenceItem> {
        self.items.iter().filter(|item| item.is_positioned())
    }

    /// Unpositioned items in creation order.
    pub fn unpositioned(&self) -> impl Iterator<Item = &SequenceItem> {
        self.items.iter().filter(|item| !item.is_positioned())
    }

    /// Ids of positioned items in sequence order.
    pub fn ordered_ids(&self) -> Vec<ItemId> {
        self.positioned().map(|item| item.item_id).collect()
    }

    /// Keys of positioned items in sequence order.
    pub fn ordered_keys(&self) -> Vec<PositionKey> {
        self.positioned().filter_map(|item| item.position).collect()
    }

    pub fn find(&self, item_id: ItemId) -> Option<&SequenceItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    /// Returns `Some(position)` for known items, `None` for unknown ones.
    pub fn position_of(&self, item_id: ItemId) -> Option<Option<PositionKey>> {
        self.find(item_id).map(|item| item.position)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns whether two positioned items share one key.
    pub fn has_duplicate_keys(&self) -> bool {
        let mut seen = HashSet::new();
        self.ordered_keys()
            .into_iter()
            .any(|key| !seen.insert(key.value().to_bits()))
    }

    /// Exchanges the keys of two items in place and re-sorts.
    ///
    /// Returns `false` when either item is unknown.
    pub(crate) fn swap_positions(&mut self, item_a: ItemId, item_b: ItemId) -> bool {
        let index_a = self.items.iter().position(|item| item.item_id == item_a);
        let index_b = self.items.iter().position(|item| item.item_id == item_b);
        let (Some(index_a), Some(index_b)) = (index_a, index_b) else {
            return false;
        };
        let key_a = self.items[index_a].position;
        self.items[index_a].position = self.items[index_b].position;
        self.items[index_b].position = key_a;
        self.items.sort_by(SequenceItem::sequence_cmp);
        true
    }

    /// Writes one key in place and re-sorts.
    ///
    /// Returns `false` when the item is unknown.
    pub(crate) fn set_position(&mut self, item_id: ItemId, key: PositionKey) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.item_id == item_id) else {
            return false;
        };
        item.position = Some(key);
        self.items.sort_by(SequenceItem::sequence_cmp);
        true
    }
}
