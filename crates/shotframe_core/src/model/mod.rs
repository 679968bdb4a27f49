//! Shot timeline domain model.
//!
//! # Responsibility
//! - Define item identity, position keys and key assignments.
//! - Define the canonical total order over one collection's items.
//!
//! # Invariants
//! - Ordering by `(position, created_at, item_id)` is total within a collection.
//! - An unpositioned item (`position == None`) is not part of the sequence.

pub mod item;
pub mod sequence;
