//! Timeline item and position key types.
//!
//! # Responsibility
//! - Represent one shot item ("shot generation") with its timeline frame.
//! - Provide a totally ordered numeric key type over `f64`.
//!
//! # Invariants
//! - `PositionKey` never holds NaN or infinity.
//! - `-0.0` is normalized to `0.0`, so the head slot has one representation.
//! - `None` position means unpositioned; it is distinct from key zero.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one timeline item.
pub type ItemId = Uuid;

/// Stable identifier of one collection (shot).
pub type CollectionId = Uuid;

/// Numeric position key ("timeline frame") of an item.
///
/// Keys are real numbers with no contiguity requirement, so a new key can be
/// placed between any two distinct keys until precision runs out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct PositionKey(f64);

impl PositionKey {
    /// The head slot of a sequence.
    pub const ZERO: Self = Self(0.0);

    /// Creates a key from a finite value.
    ///
    /// Returns `None` for NaN and infinities.
    pub fn new(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        if value == 0.0 {
            return Some(Self::ZERO);
        }
        Some(Self(value))
    }

    /// Raw numeric value.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for PositionKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PositionKey {}

impl PartialOrd for PositionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PositionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Display for PositionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<f64> for PositionKey {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("position key must be finite, got `{value}`"))
    }
}

impl From<PositionKey> for f64 {
    fn from(value: PositionKey) -> Self {
        value.0
    }
}

/// One item of a collection as seen by the position engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceItem {
    /// Unique backing identifier.
    pub item_id: ItemId,
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Timeline frame. `None` means unpositioned.
    pub position: Option<PositionKey>,
    /// Epoch ms creation timestamp, used as ordering tie-break.
    pub created_at: i64,
}

impl SequenceItem {
    /// Creates an item with a generated id.
    pub fn new(collection_id: CollectionId, position: Option<PositionKey>, created_at: i64) -> Self {
        Self::with_id(Uuid::new_v4(), collection_id, position, created_at)
    }

    /// Creates an item with a caller-provided id.
    pub fn with_id(
        item_id: ItemId,
        collection_id: CollectionId,
        position: Option<PositionKey>,
        created_at: i64,
    ) -> Self {
        Self {
            item_id,
            collection_id,
            position,
            created_at,
        }
    }

    /// Returns whether the item takes part in the ordered sequence.
    pub fn is_positioned(&self) -> bool {
        self.position.is_some()
    }

    /// Canonical sequence comparison.
    ///
    /// Positioned items come first ordered by key, then creation time, then
    /// id. Unpositioned items trail in creation order.
    pub fn sequence_cmp(&self, other: &Self) -> Ordering {
        let by_position = match (self.position, other.position) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_position
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.item_id.cmp(&other.item_id))
    }
}

/// Explicit key write for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameAssignment {
    /// Item receiving the key.
    pub item_id: ItemId,
    /// New timeline frame.
    pub new_key: PositionKey,
}

impl FrameAssignment {
    pub fn new(item_id: ItemId, new_key: PositionKey) -> Self {
        Self { item_id, new_key }
    }
}
