//! Swap planning for drag-and-drop reorders.
//!
//! # Responsibility
//! - Turn a desired permutation into a minimal list of pairwise key swaps.
//! - Verify the plan by replaying it before anything is written.
//!
//! # Invariants
//! - Items are matched by unique backing id, never by key value.
//! - A plan never holds more than `n - 1` swaps and is empty iff the orders
//!   already match.
//! - Replaying `swap_sequence` over the current order yields the desired order.

use crate::model::item::ItemId;
use log::error;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Desired order disagrees with the current snapshot.
///
/// The caller must reload the canonical order before planning again.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataSyncError {
    /// Ids in the desired order that the current order does not contain.
    pub unknown: Vec<ItemId>,
    /// Ids in the current order that the desired order leaves out.
    pub missing: Vec<ItemId>,
    /// Ids listed more than once in either order.
    pub duplicated: Vec<ItemId>,
}

impl DataSyncError {
    fn is_empty(&self) -> bool {
        self.unknown.is_empty() && self.missing.is_empty() && self.duplicated.is_empty()
    }
}

impl Display for DataSyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "desired order out of sync with collection: unknown={} missing={} duplicated={}",
            self.unknown.len(),
            self.missing.len(),
            self.duplicated.len()
        )
    }
}

impl Error for DataSyncError {}

/// Replayed plan did not reproduce the desired order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerError {
    pub expected: Vec<ItemId>,
    pub actual: Vec<ItemId>,
}

impl Display for PlannerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let first_mismatch = self
            .expected
            .iter()
            .zip(&self.actual)
            .position(|(expected, actual)| expected != actual);
        match first_mismatch {
            Some(index) => write!(f, "swap plan replay diverges at slot {index}"),
            None => write!(
                f,
                "swap plan replay length {} differs from expected {}",
                self.actual.len(),
                self.expected.len()
            ),
        }
    }
}

impl Error for PlannerError {}

/// Errors from reorder planning. Neither kind is retryable as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderError {
    DataSync(DataSyncError),
    Planner(PlannerError),
}

impl Display for ReorderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataSync(err) => write!(f, "{err}"),
            Self::Planner(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReorderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DataSync(err) => Some(err),
            Self::Planner(err) => Some(err),
        }
    }
}

impl From<DataSyncError> for ReorderError {
    fn from(value: DataSyncError) -> Self {
        Self::DataSync(value)
    }
}

impl From<PlannerError> for ReorderError {
    fn from(value: PlannerError) -> Self {
        Self::Planner(value)
    }
}

/// Why a swap was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapReason {
    /// `item_b` belongs in `slot`, currently held by `item_a`.
    PlaceAtSlot { slot: usize },
}

impl Display for SwapReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlaceAtSlot { slot } => write!(f, "place at slot {slot}"),
        }
    }
}

/// One pairwise key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStep {
    pub item_a: ItemId,
    pub item_b: ItemId,
    pub reason: SwapReason,
}

/// Planned transformation of one order into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderPlan {
    pub swap_sequence: Vec<SwapStep>,
    pub final_order: Vec<ItemId>,
    pub no_changes_needed: bool,
}

impl ReorderPlan {
    pub fn swap_count(&self) -> usize {
        self.swap_sequence.len()
    }
}

/// Plans the swaps turning `current` into `desired`.
///
/// Scans left to right; at the first slot whose occupant differs, swaps in
/// the item that belongs there. Each swap fixes one slot for good, so at
/// most `n - 1` swaps are produced.
///
/// # Errors
/// - `DataSync` when the two orders are not permutations of one id set.
/// - `Planner` when replaying the plan does not yield `desired`.
pub fn plan_reorder(current: &[ItemId], desired: &[ItemId]) -> Result<ReorderPlan, ReorderError> {
    check_same_items(current, desired)?;

    let mut working = current.to_vec();
    let mut slot_of: HashMap<ItemId, usize> = working
        .iter()
        .enumerate()
        .map(|(slot, item_id)| (*item_id, slot))
        .collect();

    let mut swap_sequence = Vec::new();
    for (slot, wanted) in desired.iter().enumerate() {
        let occupant = working[slot];
        if occupant == *wanted {
            continue;
        }
        let Some(&from) = slot_of.get(wanted) else {
            // Unreachable after the id-set check; replay reports it if hit.
            break;
        };
        working.swap(slot, from);
        slot_of.insert(*wanted, slot);
        slot_of.insert(occupant, from);
        swap_sequence.push(SwapStep {
            item_a: occupant,
            item_b: *wanted,
            reason: SwapReason::PlaceAtSlot { slot },
        });
    }

    let replayed = apply_swaps(current, &swap_sequence);
    if replayed != desired {
        let err = PlannerError {
            expected: desired.to_vec(),
            actual: replayed,
        };
        error!(
            "event=reorder_plan module=plan status=error error_code=plan_replay_mismatch items={} swaps={} error={}",
            current.len(),
            swap_sequence.len(),
            err
        );
        return Err(err.into());
    }

    Ok(ReorderPlan {
        no_changes_needed: swap_sequence.is_empty(),
        swap_sequence,
        final_order: replayed,
    })
}

/// Replays swaps over an order, exchanging slots by item id.
///
/// Swaps naming an id absent from `order` leave it unchanged.
pub fn apply_swaps(order: &[ItemId], swaps: &[SwapStep]) -> Vec<ItemId> {
    let mut result = order.to_vec();
    for step in swaps {
        let slot_a = result.iter().position(|item_id| *item_id == step.item_a);
        let slot_b = result.iter().position(|item_id| *item_id == step.item_b);
        if let (Some(slot_a), Some(slot_b)) = (slot_a, slot_b) {
            result.swap(slot_a, slot_b);
        }
    }
    result
}

fn check_same_items(current: &[ItemId], desired: &[ItemId]) -> Result<(), DataSyncError> {
    let mut report = DataSyncError::default();

    let mut current_set = HashSet::with_capacity(current.len());
    for item_id in current {
        if !current_set.insert(*item_id) {
            report.duplicated.push(*item_id);
        }
    }
    let mut desired_set = HashSet::with_capacity(desired.len());
    for item_id in desired {
        if !desired_set.insert(*item_id) && !report.duplicated.contains(item_id) {
            report.duplicated.push(*item_id);
        }
    }

    report.unknown = desired
        .iter()
        .filter(|item_id| !current_set.contains(*item_id))
        .copied()
        .collect();
    report.missing = current
        .iter()
        .filter(|item_id| !desired_set.contains(*item_id))
        .copied()
        .collect();

    if report.is_empty() {
        Ok(())
    } else {
        Err(report)
    }
}
