//! Sequence use-case services.
//!
//! # Responsibility
//! - Turn position plans into store writes and reloads.
//! - Serialize drag gestures against background reloads.

pub mod concurrency_guard;
pub mod exchange_coordinator;
