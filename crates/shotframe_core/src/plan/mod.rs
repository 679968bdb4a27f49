//! Pure position planning.
//!
//! # Responsibility
//! - Compute key assignments and swap plans without touching the store.
//!
//! # Invariants
//! - Everything here is synchronous and side-effect free apart from logging,
//!   so plans may be computed speculatively.

pub mod gap;
pub mod reorder;
