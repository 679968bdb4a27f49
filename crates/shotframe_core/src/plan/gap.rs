//! Gap distribution for block inserts and moves.
//!
//! # Responsibility
//! - Compute strictly increasing keys for N items placed between two
//!   neighbors.
//! - Turn a block move (items + target index) into explicit key assignments.
//!
//! # Invariants
//! - Returned keys preserve the block order and lie strictly between the
//!   neighbor keys when both exist.
//! - Computed keys are never negative.
//! - Collisions are ruled out analytically: an interval below `min_gap` is
//!   reported as exhaustion, never retried.
//! - Unpositioned items receive a key only when named in the moving block.

use crate::config::{EngineConfig, DEFAULT_MIN_GAP, DEFAULT_SPACING};
use crate::model::item::{FrameAssignment, ItemId, PositionKey, SequenceItem};
use log::{debug, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from gap distribution.
#[derive(Debug, Clone, PartialEq)]
pub enum GapError {
    /// Block size must be at least one.
    InvalidCount(usize),
    /// No room left between the neighbors at the configured precision.
    KeySpaceExhausted {
        predecessor: Option<PositionKey>,
        successor: Option<PositionKey>,
        count: usize,
    },
    /// Moving block names an item missing from the collection.
    UnknownItem(ItemId),
    /// Moving block names the same item twice.
    DuplicateItem(ItemId),
    /// Spacing or gap parameter is not a finite positive number.
    InvalidSpacing(f64),
}

impl Display for GapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCount(count) => write!(f, "block size must be >= 1, got {count}"),
            Self::KeySpaceExhausted {
                predecessor,
                successor,
                count,
            } => write!(
                f,
                "no room for {count} keys between {} and {}",
                describe_bound(*predecessor),
                describe_bound(*successor)
            ),
            Self::UnknownItem(id) => write!(f, "item not in collection: {id}"),
            Self::DuplicateItem(id) => write!(f, "item listed twice in moving block: {id}"),
            Self::InvalidSpacing(value) => {
                write!(f, "spacing must be finite and > 0, got {value}")
            }
        }
    }
}

impl Error for GapError {}

fn describe_bound(bound: Option<PositionKey>) -> String {
    bound.map_or_else(|| "<open>".to_string(), |key| key.to_string())
}

/// Result of planning a block move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlacement {
    /// Keys to write. Includes the displaced head when one was re-keyed.
    pub assignments: Vec<FrameAssignment>,
    /// Sequence order after the assignments are applied.
    pub final_order: Vec<ItemId>,
    /// Former head item moved off key zero, if any.
    pub displaced: Option<ItemId>,
    /// Whether the whole sequence was re-spaced after exhaustion.
    pub respaced: bool,
}

/// Computes keys for items inserted into a gap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapDistributor {
    default_spacing: f64,
    min_gap: f64,
}

impl Default for GapDistributor {
    fn default() -> Self {
        Self {
            default_spacing: DEFAULT_SPACING,
            min_gap: DEFAULT_MIN_GAP,
        }
    }
}

impl GapDistributor {
    /// Creates a distributor with explicit spacing parameters.
    pub fn new(default_spacing: f64, min_gap: f64) -> Result<Self, GapError> {
        if !default_spacing.is_finite() || default_spacing <= 0.0 {
            return Err(GapError::InvalidSpacing(default_spacing));
        }
        if !min_gap.is_finite() || min_gap <= 0.0 {
            return Err(GapError::InvalidSpacing(min_gap));
        }
        Ok(Self {
            default_spacing,
            min_gap,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, GapError> {
        Self::new(config.default_spacing, config.min_gap)
    }

    pub fn default_spacing(&self) -> f64 {
        self.default_spacing
    }

    /// Average spacing of existing keys.
    ///
    /// Falls back to the default spacing with fewer than two keys or when
    /// all keys collapse onto one value.
    pub fn average_spacing(&self, keys: &[PositionKey]) -> f64 {
        let (Some(min), Some(max)) = (keys.iter().min(), keys.iter().max()) else {
            return self.default_spacing;
        };
        if keys.len() < 2 {
            return self.default_spacing;
        }
        let spacing = (max.value() - min.value()) / (keys.len() - 1) as f64;
        if spacing.is_finite() && spacing >= self.min_gap {
            spacing
        } else {
            self.default_spacing
        }
    }

    /// Computes `count` increasing keys between two optional neighbors.
    ///
    /// `existing` holds every current key of the collection and only feeds
    /// the tail-insert spacing.
    ///
    /// # Errors
    /// - `InvalidCount` when `count == 0`.
    /// - `KeySpaceExhausted` when the interval falls below `min_gap` or the
    ///   successor leaves no room above zero.
    pub fn between(
        &self,
        predecessor: Option<PositionKey>,
        successor: Option<PositionKey>,
        count: usize,
        existing: &[PositionKey],
    ) -> Result<Vec<PositionKey>, GapError> {
        if count == 0 {
            return Err(GapError::InvalidCount(count));
        }
        let exhausted = || GapError::KeySpaceExhausted {
            predecessor,
            successor,
            count,
        };
        let slots = count as f64 + 1.0;

        let raw: Vec<f64> = match (predecessor, successor) {
            (Some(predecessor), Some(successor)) => {
                let interval = (successor.value() - predecessor.value()) / slots;
                if interval < self.min_gap {
                    return Err(exhausted());
                }
                (1..=count)
                    .map(|step| predecessor.value() + interval * step as f64)
                    .collect()
            }
            (Some(predecessor), None) => {
                let spacing = self.average_spacing(existing);
                (1..=count)
                    .map(|step| predecessor.value() + spacing * step as f64)
                    .collect()
            }
            (None, Some(successor)) => {
                let interval = successor.value() / slots;
                if interval < self.min_gap {
                    return Err(exhausted());
                }
                (1..=count).map(|step| interval * step as f64).collect()
            }
            (None, None) => (0..count)
                .map(|step| self.default_spacing * step as f64)
                .collect(),
        };

        let mut keys: Vec<PositionKey> = Vec::with_capacity(count);
        for value in raw {
            let key = PositionKey::new(value.max(0.0)).ok_or_else(exhausted)?;
            let after_previous = keys.last().map_or(true, |previous| key > *previous);
            let after_predecessor = predecessor.map_or(true, |bound| key > bound);
            let before_successor = successor.map_or(true, |bound| key < bound);
            if !(after_previous && after_predecessor && before_successor) {
                return Err(exhausted());
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Plans moving (or placing) a block of items to `target_index`.
    ///
    /// `target_index` indexes the positioned sequence with the moving items
    /// removed and is clamped to its length. Block order follows `moving`.
    /// Exhaustion falls back to re-spacing the whole resulting order.
    pub fn plan_block_move(
        &self,
        items: &[SequenceItem],
        moving: &[ItemId],
        target_index: usize,
    ) -> Result<BlockPlacement, GapError> {
        if moving.is_empty() {
            return Err(GapError::InvalidCount(0));
        }
        let mut moving_set = HashSet::with_capacity(moving.len());
        for item_id in moving {
            if !moving_set.insert(*item_id) {
                return Err(GapError::DuplicateItem(*item_id));
            }
            if !items.iter().any(|item| item.item_id == *item_id) {
                return Err(GapError::UnknownItem(*item_id));
            }
        }

        let mut positioned: Vec<&SequenceItem> =
            items.iter().filter(|item| item.is_positioned()).collect();
        positioned.sort_by(|left, right| left.sequence_cmp(right));
        let existing_keys: Vec<PositionKey> =
            positioned.iter().filter_map(|item| item.position).collect();
        let remaining: Vec<&SequenceItem> = positioned
            .into_iter()
            .filter(|item| !moving_set.contains(&item.item_id))
            .collect();

        let index = target_index.min(remaining.len());
        let mut final_order: Vec<ItemId> = remaining.iter().map(|item| item.item_id).collect();
        final_order.splice(index..index, moving.iter().copied());

        let predecessor = index
            .checked_sub(1)
            .and_then(|previous| remaining[previous].position);
        let successor = remaining.get(index).and_then(|item| item.position);

        let planned = if index == 0 && successor.is_some_and(|key| key <= PositionKey::ZERO) {
            self.displace_head(&remaining, moving)
        } else {
            self.between(predecessor, successor, moving.len(), &existing_keys)
                .map(|keys| {
                    let assignments = moving
                        .iter()
                        .zip(keys)
                        .map(|(item_id, key)| FrameAssignment::new(*item_id, key))
                        .collect();
                    (assignments, None)
                })
        };

        match planned {
            Ok((assignments, displaced)) => {
                debug!(
                    "event=block_plan module=plan status=ok count={} target_index={} displaced={}",
                    moving.len(),
                    index,
                    displaced.is_some()
                );
                Ok(BlockPlacement {
                    assignments,
                    final_order,
                    displaced,
                    respaced: false,
                })
            }
            Err(GapError::KeySpaceExhausted { .. }) => {
                warn!(
                    "event=block_plan module=plan status=respace count={} target_index={} sequence_len={}",
                    moving.len(),
                    index,
                    final_order.len()
                );
                Ok(BlockPlacement {
                    assignments: self.respace(&final_order),
                    final_order,
                    displaced: None,
                    respaced: true,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Evenly re-keys a whole order: `0, s, 2s, ...`.
    pub fn respace(&self, order: &[ItemId]) -> Vec<FrameAssignment> {
        order
            .iter()
            .enumerate()
            .filter_map(|(index, item_id)| {
                PositionKey::new(self.default_spacing * index as f64)
                    .map(|key| FrameAssignment::new(*item_id, key))
            })
            .collect()
    }

    // Head insert when the current head already sits on key zero: the first
    // moving item takes zero, the old head moves up to make room.
    fn displace_head(
        &self,
        remaining: &[&SequenceItem],
        moving: &[ItemId],
    ) -> Result<(Vec<FrameAssignment>, Option<ItemId>), GapError> {
        let exhausted = || GapError::KeySpaceExhausted {
            predecessor: None,
            successor: Some(PositionKey::ZERO),
            count: moving.len(),
        };
        let (Some(head), Some(first_moving)) = (remaining.first(), moving.first()) else {
            return Err(exhausted());
        };
        let head_key = head.position.unwrap_or(PositionKey::ZERO);

        let displaced_value = match remaining.get(1).and_then(|next| next.position) {
            Some(next) => next.value() / 2.0,
            None => self.default_spacing.max(head_key.value()),
        };
        if displaced_value < self.min_gap {
            return Err(exhausted());
        }
        let displaced_key = PositionKey::new(displaced_value).ok_or_else(exhausted)?;

        let mut assignments = vec![FrameAssignment::new(*first_moving, PositionKey::ZERO)];
        if moving.len() > 1 {
            let keys = self.between(
                Some(PositionKey::ZERO),
                Some(displaced_key),
                moving.len() - 1,
                &[],
            )?;
            assignments.extend(
                moving[1..]
                    .iter()
                    .zip(keys)
                    .map(|(item_id, key)| FrameAssignment::new(*item_id, key)),
            );
        }
        assignments.push(FrameAssignment::new(head.item_id, displaced_key));
        Ok((assignments, Some(head.item_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::{GapDistributor, GapError};
    use crate::model::item::{FrameAssignment, ItemId, PositionKey, SequenceItem};
    use uuid::Uuid;

    fn key(value: f64) -> PositionKey {
        PositionKey::new(value).unwrap()
    }

    fn values(keys: &[PositionKey]) -> Vec<f64> {
        keys.iter().map(|key| key.value()).collect()
    }

    fn item(shot: Uuid, position: Option<f64>, created_at: i64) -> SequenceItem {
        SequenceItem::new(shot, position.map(key), created_at)
    }

    fn key_for(assignments: &[FrameAssignment], item_id: ItemId) -> f64 {
        assignments
            .iter()
            .find(|assignment| assignment.item_id == item_id)
            .map(|assignment| assignment.new_key.value())
            .unwrap()
    }

    #[test]
    fn three_items_between_100_and_200() {
        let distributor = GapDistributor::default();
        let keys = distributor
            .between(Some(key(100.0)), Some(key(200.0)), 3, &[])
            .unwrap();
        assert_eq!(values(&keys), vec![125.0, 150.0, 175.0]);
    }

    #[test]
    fn two_items_at_head_before_60() {
        let distributor = GapDistributor::default();
        let keys = distributor.between(None, Some(key(60.0)), 2, &[]).unwrap();
        assert_eq!(values(&keys), vec![20.0, 40.0]);
    }

    #[test]
    fn tail_insert_uses_average_spacing() {
        let distributor = GapDistributor::default();
        let existing = [key(0.0), key(10.0), key(20.0), key(30.0)];
        let keys = distributor
            .between(Some(key(30.0)), None, 2, &existing)
            .unwrap();
        assert_eq!(values(&keys), vec![40.0, 50.0]);
    }

    #[test]
    fn tail_insert_with_single_key_uses_default_spacing() {
        let distributor = GapDistributor::default();
        let keys = distributor
            .between(Some(key(7.0)), None, 1, &[key(7.0)])
            .unwrap();
        assert_eq!(values(&keys), vec![57.0]);
    }

    #[test]
    fn empty_collection_starts_at_zero() {
        let distributor = GapDistributor::default();
        let keys = distributor.between(None, None, 3, &[]).unwrap();
        assert_eq!(values(&keys), vec![0.0, 50.0, 100.0]);
    }

    #[test]
    fn zero_count_is_rejected() {
        let distributor = GapDistributor::default();
        let err = distributor.between(None, None, 0, &[]).unwrap_err();
        assert_eq!(err, GapError::InvalidCount(0));
    }

    #[test]
    fn equal_neighbors_report_exhaustion() {
        let distributor = GapDistributor::default();
        let err = distributor
            .between(Some(key(10.0)), Some(key(10.0)), 1, &[])
            .unwrap_err();
        assert!(matches!(err, GapError::KeySpaceExhausted { count: 1, .. }));
    }

    #[test]
    fn gap_below_min_gap_reports_exhaustion() {
        let distributor = GapDistributor::new(50.0, 0.5).unwrap();
        let err = distributor
            .between(Some(key(1.0)), Some(key(2.0)), 2, &[])
            .unwrap_err();
        assert!(matches!(err, GapError::KeySpaceExhausted { .. }));
    }

    #[test]
    fn invalid_spacing_is_rejected() {
        assert!(GapDistributor::new(0.0, 1e-6).is_err());
        assert!(GapDistributor::new(50.0, f64::NAN).is_err());
    }

    #[test]
    fn block_move_into_middle_uses_neighbor_midpoints() {
        let shot = Uuid::new_v4();
        let a = item(shot, Some(0.0), 1);
        let b = item(shot, Some(50.0), 2);
        let c = item(shot, Some(100.0), 3);
        let d = item(shot, Some(150.0), 4);
        let items = vec![a.clone(), b.clone(), c.clone(), d.clone()];

        let placement = GapDistributor::default()
            .plan_block_move(&items, &[d.item_id], 1)
            .unwrap();

        assert_eq!(
            placement.final_order,
            vec![a.item_id, d.item_id, b.item_id, c.item_id]
        );
        assert_eq!(placement.assignments.len(), 1);
        assert_eq!(key_for(&placement.assignments, d.item_id), 25.0);
        assert!(!placement.respaced);
    }

    #[test]
    fn block_move_past_end_is_clamped_to_tail() {
        let shot = Uuid::new_v4();
        let a = item(shot, Some(0.0), 1);
        let b = item(shot, Some(50.0), 2);
        let c = item(shot, Some(100.0), 3);
        let items = vec![a.clone(), b.clone(), c.clone()];

        let placement = GapDistributor::default()
            .plan_block_move(&items, &[a.item_id], 99)
            .unwrap();

        assert_eq!(placement.final_order, vec![b.item_id, c.item_id, a.item_id]);
        assert_eq!(key_for(&placement.assignments, a.item_id), 150.0);
    }

    #[test]
    fn head_insert_displaces_item_sitting_on_zero() {
        let shot = Uuid::new_v4();
        let head = item(shot, Some(0.0), 1);
        let next = item(shot, Some(100.0), 2);
        let x = item(shot, None, 3);
        let y = item(shot, None, 4);
        let items = vec![head.clone(), next.clone(), x.clone(), y.clone()];

        let placement = GapDistributor::default()
            .plan_block_move(&items, &[x.item_id, y.item_id], 0)
            .unwrap();

        assert_eq!(placement.displaced, Some(head.item_id));
        assert_eq!(key_for(&placement.assignments, x.item_id), 0.0);
        assert_eq!(key_for(&placement.assignments, y.item_id), 25.0);
        assert_eq!(key_for(&placement.assignments, head.item_id), 50.0);
        assert_eq!(
            placement.final_order,
            vec![x.item_id, y.item_id, head.item_id, next.item_id]
        );
    }

    #[test]
    fn head_insert_without_next_moves_head_to_default_spacing() {
        let shot = Uuid::new_v4();
        let head = item(shot, Some(0.0), 1);
        let x = item(shot, None, 2);
        let items = vec![head.clone(), x.clone()];

        let placement = GapDistributor::default()
            .plan_block_move(&items, &[x.item_id], 0)
            .unwrap();

        assert_eq!(key_for(&placement.assignments, x.item_id), 0.0);
        assert_eq!(key_for(&placement.assignments, head.item_id), 50.0);
    }

    #[test]
    fn head_insert_before_positive_key_keeps_head_in_place() {
        let shot = Uuid::new_v4();
        let head = item(shot, Some(60.0), 1);
        let x = item(shot, None, 2);
        let y = item(shot, None, 3);
        let items = vec![head.clone(), x.clone(), y.clone()];

        let placement = GapDistributor::default()
            .plan_block_move(&items, &[x.item_id, y.item_id], 0)
            .unwrap();

        assert_eq!(placement.displaced, None);
        assert_eq!(key_for(&placement.assignments, x.item_id), 20.0);
        assert_eq!(key_for(&placement.assignments, y.item_id), 40.0);
    }

    #[test]
    fn exhausted_gap_falls_back_to_respacing() {
        let shot = Uuid::new_v4();
        let a = item(shot, Some(10.0), 1);
        let b = item(shot, Some(10.0), 2);
        let c = item(shot, None, 3);
        let items = vec![a.clone(), b.clone(), c.clone()];

        let placement = GapDistributor::default()
            .plan_block_move(&items, &[c.item_id], 1)
            .unwrap();

        assert!(placement.respaced);
        assert_eq!(placement.final_order, vec![a.item_id, c.item_id, b.item_id]);
        assert_eq!(key_for(&placement.assignments, a.item_id), 0.0);
        assert_eq!(key_for(&placement.assignments, c.item_id), 50.0);
        assert_eq!(key_for(&placement.assignments, b.item_id), 100.0);
    }

    #[test]
    fn block_move_rejects_unknown_and_repeated_items() {
        let shot = Uuid::new_v4();
        let a = item(shot, Some(0.0), 1);
        let items = vec![a.clone()];
        let distributor = GapDistributor::default();

        let stranger = Uuid::new_v4();
        assert_eq!(
            distributor.plan_block_move(&items, &[stranger], 0),
            Err(GapError::UnknownItem(stranger))
        );
        assert_eq!(
            distributor.plan_block_move(&items, &[a.item_id, a.item_id], 0),
            Err(GapError::DuplicateItem(a.item_id))
        );
        assert_eq!(
            distributor.plan_block_move(&items, &[], 0),
            Err(GapError::InvalidCount(0))
        );
    }

    #[test]
    fn unpositioned_bystanders_are_left_alone() {
        let shot = Uuid::new_v4();
        let a = item(shot, Some(0.0), 1);
        let loose = item(shot, None, 2);
        let b = item(shot, Some(100.0), 3);
        let items = vec![a.clone(), loose.clone(), b.clone()];

        let placement = GapDistributor::default()
            .plan_block_move(&items, &[b.item_id], 0)
            .unwrap();

        assert!(placement
            .assignments
            .iter()
            .all(|assignment| assignment.item_id != loose.item_id));
        assert!(!placement.final_order.contains(&loose.item_id));
    }
}
