//! Store contract and persistence implementations.
//!
//! # Responsibility
//! - Define the async contract the position engine writes through.
//! - Keep SQL details inside the SQLite store.
//!
//! # Invariants
//! - Key swaps are all-or-nothing.
//! - Store APIs return semantic errors (`ItemNotFound`, `Unpositioned`) in
//!   addition to transport errors.

pub mod sequence_store;
pub mod sqlite_store;
