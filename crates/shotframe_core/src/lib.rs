//! Core engine for ordered timeline positions.
//! Owns key allocation, reorder planning and write coordination for shots.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod plan;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::item::{CollectionId, FrameAssignment, ItemId, PositionKey, SequenceItem};
pub use model::sequence::SequenceSnapshot;
pub use plan::gap::{BlockPlacement, GapDistributor, GapError};
pub use plan::reorder::{
    apply_swaps, plan_reorder, DataSyncError, PlannerError, ReorderError, ReorderPlan, SwapReason,
    SwapStep,
};
pub use repo::sequence_store::{SequenceStore, StoreError, StoreResult, SwapOutcome};
pub use repo::sqlite_store::{ShotStats, SqliteSequenceStore};
pub use service::concurrency_guard::{
    CommitOutcome, ConcurrencyGuard, DragCancelled, Gesture, GuardError, GuardPhase,
    InvalidationDecision,
};
pub use service::exchange_coordinator::{
    BatchOutcome, BlockMoveOutcome, ExchangeCoordinator, ExchangeError, ExchangeOutcome,
    ReorderOutcome, ReorderStrategy,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
