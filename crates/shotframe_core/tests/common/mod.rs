#![allow(dead_code)]

use async_trait::async_trait;
use shotframe_core::{
    CollectionId, FrameAssignment, ItemId, PositionKey, SequenceItem, SequenceStore, StoreError,
    StoreResult, SwapOutcome,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory store that counts every call and can inject failures.
#[derive(Default)]
pub struct RecordingStore {
    items: Mutex<HashMap<ItemId, SequenceItem>>,
    next_created_at: AtomicUsize,
    pub swap_calls: AtomicUsize,
    pub swap_writes: AtomicUsize,
    pub assign_calls: AtomicUsize,
    pub assigned_items: AtomicUsize,
    pub loads: AtomicUsize,
    pub refreshes: AtomicUsize,
    fail_swaps_after: Mutex<Option<usize>>,
    fail_assign_for: Mutex<HashSet<ItemId>>,
    fail_refresh: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds items in creation order, returning their ids.
    pub fn seed(&self, collection_id: CollectionId, frames: &[Option<f64>]) -> Vec<ItemId> {
        frames
            .iter()
            .map(|frame| {
                let created_at = self.next_created_at.fetch_add(1, Ordering::SeqCst) as i64;
                let item = SequenceItem::new(
                    collection_id,
                    frame.and_then(PositionKey::new),
                    created_at,
                );
                let item_id = item.item_id;
                self.items.lock().unwrap().insert(item_id, item);
                item_id
            })
            .collect()
    }

    /// Positioned frames of a collection.
    pub fn frame_of(&self, item_id: ItemId) -> Option<f64> {
        self.items
            .lock()
            .unwrap()
            .get(&item_id)
            .and_then(|item| item.position)
            .map(PositionKey::value)
    }

    /// Sets a frame behind the coordinator's back.
    pub fn set_frame(&self, item_id: ItemId, frame: f64) {
        if let Some(item) = self.items.lock().unwrap().get_mut(&item_id) {
            item.position = PositionKey::new(frame);
        }
    }

    /// Store writes issued so far (swaps plus assigned rows).
    pub fn writes(&self) -> usize {
        self.swap_writes.load(Ordering::SeqCst) + self.assigned_items.load(Ordering::SeqCst)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Lets `successful` more swaps through, then fails every swap.
    pub fn fail_swaps_after(&self, successful: usize) {
        *self.fail_swaps_after.lock().unwrap() = Some(successful);
    }

    /// Fails any assignment chunk that contains `item_id`.
    pub fn fail_assign_for(&self, item_id: ItemId) {
        self.fail_assign_for.lock().unwrap().insert(item_id);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    fn swap_budget_exhausted(&self) -> bool {
        let mut budget = self.fail_swaps_after.lock().unwrap();
        match budget.as_mut() {
            None => false,
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
        }
    }
}

#[async_trait]
impl SequenceStore for RecordingStore {
    async fn load_order(&self, collection_id: CollectionId) -> StoreResult<Vec<SequenceItem>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| item.collection_id == collection_id)
            .cloned()
            .collect())
    }

    async fn swap_keys(
        &self,
        collection_id: CollectionId,
        item_a: ItemId,
        item_b: ItemId,
    ) -> StoreResult<SwapOutcome> {
        self.swap_calls.fetch_add(1, Ordering::SeqCst);
        if self.swap_budget_exhausted() {
            return Err(StoreError::Unavailable("injected swap failure".to_string()));
        }
        let mut items = self.items.lock().unwrap();
        let key_of = |id: ItemId| -> StoreResult<PositionKey> {
            let item = items
                .get(&id)
                .filter(|item| item.collection_id == collection_id)
                .ok_or(StoreError::ItemNotFound {
                    collection_id,
                    item_id: id,
                })?;
            item.position.ok_or(StoreError::Unpositioned(id))
        };
        let key_a = key_of(item_a)?;
        let key_b = key_of(item_b)?;
        if key_a == key_b {
            return Ok(SwapOutcome::Unchanged);
        }
        if let Some(item) = items.get_mut(&item_a) {
            item.position = Some(key_b);
        }
        if let Some(item) = items.get_mut(&item_b) {
            item.position = Some(key_a);
        }
        self.swap_writes.fetch_add(1, Ordering::SeqCst);
        Ok(SwapOutcome::Swapped)
    }

    async fn assign_keys(
        &self,
        collection_id: CollectionId,
        assignments: &[FrameAssignment],
    ) -> StoreResult<()> {
        self.assign_calls.fetch_add(1, Ordering::SeqCst);
        {
            let failing = self.fail_assign_for.lock().unwrap();
            if assignments
                .iter()
                .any(|assignment| failing.contains(&assignment.item_id))
            {
                return Err(StoreError::Unavailable(
                    "injected assign failure".to_string(),
                ));
            }
        }
        let mut items = self.items.lock().unwrap();
        for assignment in assignments {
            let item = items
                .get_mut(&assignment.item_id)
                .filter(|item| item.collection_id == collection_id)
                .ok_or(StoreError::ItemNotFound {
                    collection_id,
                    item_id: assignment.item_id,
                })?;
            item.position = Some(assignment.new_key);
        }
        self.assigned_items
            .fetch_add(assignments.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn refresh_views(&self, _collection_id: CollectionId) -> StoreResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected refresh failure".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn frames(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(Some).collect()
}

pub fn new_collection() -> CollectionId {
    Uuid::new_v4()
}
