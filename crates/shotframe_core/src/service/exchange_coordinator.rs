//! Executes position plans against the store.
//!
//! # Responsibility
//! - Run single swaps, swap batches and absolute key assignments.
//! - Finish every mutating operation with exactly one reload that also
//!   refreshes the store's cached read views.
//! - Keep a read-through snapshot per collection that mirrors own writes.
//!
//! # Invariants
//! - Batch reloads happen only after every write of the batch completed.
//! - Swaps read keys inside the store's atomic unit, never from stale plans.
//! - Skip decisions never come from the cached snapshot: equal-key swaps are
//!   detected by the store, unchanged assignments only against a snapshot
//!   loaded within the same call.
//! - Writes are never retried here; failures surface to the caller.

use crate::config::{ConfigError, EngineConfig};
use crate::model::item::{CollectionId, FrameAssignment, ItemId};
use crate::model::sequence::SequenceSnapshot;
use crate::plan::gap::{BlockPlacement, GapDistributor, GapError};
use crate::plan::reorder::{plan_reorder, DataSyncError, PlannerError, ReorderError, ReorderPlan};
use crate::repo::sequence_store::{SequenceStore, StoreError, SwapOutcome};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Errors from coordinator operations.
#[derive(Debug)]
pub enum ExchangeError {
    /// Request references items the collection does not hold.
    DataSync(DataSyncError),
    /// Swap plan failed its own replay check.
    Planner(PlannerError),
    /// Gap distribution rejected the block.
    Gap(GapError),
    /// Swap names an item that is not part of the sequence.
    Unpositioned(ItemId),
    /// Atomic swap write failed.
    StoreWrite(StoreError),
    /// One or more assignment chunks failed; the others were written.
    AssignWrite {
        failed_chunks: usize,
        total_chunks: usize,
        first: StoreError,
    },
    /// Reading the collection failed.
    Load(StoreError),
    /// Post-write reload or view refresh failed.
    Reload(StoreError),
}

impl Display for ExchangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataSync(err) => write!(f, "{err}"),
            Self::Planner(err) => write!(f, "reorder plan invariant violated: {err}"),
            Self::Gap(err) => write!(f, "{err}"),
            Self::Unpositioned(id) => write!(f, "item has no timeline frame: {id}"),
            Self::StoreWrite(err) => write!(f, "position swap failed: {err}"),
            Self::AssignWrite {
                failed_chunks,
                total_chunks,
                first,
            } => write!(
                f,
                "{failed_chunks}/{total_chunks} frame assignment writes failed: {first}"
            ),
            Self::Load(err) => write!(f, "loading timeline failed: {err}"),
            Self::Reload(err) => write!(f, "reloading timeline failed: {err}"),
        }
    }
}

impl Error for ExchangeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DataSync(err) => Some(err),
            Self::Planner(err) => Some(err),
            Self::Gap(err) => Some(err),
            Self::Unpositioned(_) => None,
            Self::StoreWrite(err) => Some(err),
            Self::AssignWrite { first, .. } => Some(first),
            Self::Load(err) => Some(err),
            Self::Reload(err) => Some(err),
        }
    }
}

impl From<ReorderError> for ExchangeError {
    fn from(value: ReorderError) -> Self {
        match value {
            ReorderError::DataSync(err) => Self::DataSync(err),
            ReorderError::Planner(err) => Self::Planner(err),
        }
    }
}

impl From<GapError> for ExchangeError {
    fn from(value: GapError) -> Self {
        match value {
            GapError::UnknownItem(item_id) => Self::DataSync(DataSyncError {
                unknown: vec![item_id],
                ..DataSyncError::default()
            }),
            other => Self::Gap(other),
        }
    }
}

impl ExchangeError {
    /// Whether the error came from the store rather than from planning.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::StoreWrite(_) | Self::AssignWrite { .. } | Self::Load(_) | Self::Reload(_)
        )
    }
}

/// Result of one swap without reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Keys were exchanged in the store.
    Swapped,
    /// Nothing to do; no write was issued.
    Skipped,
}

/// Result of a mutating operation followed by its reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Swaps or assignments persisted.
    pub written: usize,
    /// Swaps or assignments skipped as no-ops.
    pub skipped: usize,
    /// Collection state after the final reload.
    pub snapshot: SequenceSnapshot,
}

/// How a reorder was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderStrategy {
    /// Orders already matched; nothing written.
    Unchanged,
    /// Pairwise swaps from the plan.
    Swaps,
    /// Absolute re-spacing, used when duplicate keys defeat swapping.
    Respaced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderOutcome {
    pub plan: ReorderPlan,
    pub strategy: ReorderStrategy,
    pub snapshot: SequenceSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMoveOutcome {
    pub placement: BlockPlacement,
    pub snapshot: SequenceSnapshot,
}

/// Runs position changes for any number of collections over one store.
pub struct ExchangeCoordinator<S: SequenceStore> {
    store: S,
    config: EngineConfig,
    distributor: GapDistributor,
    snapshots: Mutex<HashMap<CollectionId, SequenceSnapshot>>,
}

impl<S: SequenceStore> ExchangeCoordinator<S> {
    /// Creates a coordinator with default tunables.
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            distributor: GapDistributor::default(),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a coordinator with validated tunables.
    pub fn with_config(store: S, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let distributor =
            GapDistributor::from_config(&config).map_err(|err| ConfigError::Invalid {
                field: "default_spacing",
                reason: err.to_string(),
            })?;
        Ok(Self {
            store,
            config,
            distributor,
            snapshots: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn distributor(&self) -> &GapDistributor {
        &self.distributor
    }

    /// Last snapshot loaded for a collection, with own writes applied.
    pub fn cached_snapshot(&self, collection_id: CollectionId) -> Option<SequenceSnapshot> {
        self.snapshots().get(&collection_id).cloned()
    }

    /// Reads the collection fresh without touching read views.
    pub async fn load(&self, collection_id: CollectionId) -> Result<SequenceSnapshot, ExchangeError> {
        let items = self
            .store
            .load_order(collection_id)
            .await
            .map_err(ExchangeError::Load)?;
        let snapshot = SequenceSnapshot::from_items(collection_id, items);
        self.snapshots().insert(collection_id, snapshot.clone());
        Ok(snapshot)
    }

    /// Refreshes read views and reloads the collection.
    pub async fn reload(
        &self,
        collection_id: CollectionId,
    ) -> Result<SequenceSnapshot, ExchangeError> {
        self.store
            .refresh_views(collection_id)
            .await
            .map_err(ExchangeError::Reload)?;
        let items = self
            .store
            .load_order(collection_id)
            .await
            .map_err(ExchangeError::Reload)?;
        let snapshot = SequenceSnapshot::from_items(collection_id, items);
        self.snapshots().insert(collection_id, snapshot.clone());
        info!(
            "event=sequence_reload module=service status=ok shot={collection_id} items={}",
            snapshot.len()
        );
        Ok(snapshot)
    }

    /// Swaps two items' keys and reloads immediately.
    pub async fn exchange_positions(
        &self,
        collection_id: CollectionId,
        item_a: ItemId,
        item_b: ItemId,
    ) -> Result<BatchOutcome, ExchangeError> {
        let outcome = self
            .exchange_positions_no_reload(collection_id, item_a, item_b)
            .await?;
        let snapshot = self.reload(collection_id).await?;
        let written = usize::from(outcome == ExchangeOutcome::Swapped);
        Ok(BatchOutcome {
            written,
            skipped: 1 - written,
            snapshot,
        })
    }

    /// Swaps two items' keys; the caller reloads later.
    ///
    /// Skips without a store round trip only when both ids name the same
    /// item. Equal keys are detected by the store's atomic read.
    pub async fn exchange_positions_no_reload(
        &self,
        collection_id: CollectionId,
        item_a: ItemId,
        item_b: ItemId,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        if item_a == item_b {
            debug!(
                "event=exchange module=service status=skip reason=same_item shot={collection_id} item={item_a}"
            );
            return Ok(ExchangeOutcome::Skipped);
        }

        match self.store.swap_keys(collection_id, item_a, item_b).await {
            Ok(SwapOutcome::Swapped) => {
                if let Some(snapshot) = self.snapshots().get_mut(&collection_id) {
                    snapshot.swap_positions(item_a, item_b);
                }
                Ok(ExchangeOutcome::Swapped)
            }
            Ok(SwapOutcome::Unchanged) => {
                debug!(
                    "event=exchange module=service status=skip reason=equal_keys shot={collection_id} item_a={item_a} item_b={item_b}"
                );
                Ok(ExchangeOutcome::Skipped)
            }
            Err(StoreError::Unpositioned(item_id)) => Err(ExchangeError::Unpositioned(item_id)),
            Err(err) => {
                warn!(
                    "event=exchange module=service status=error shot={collection_id} item_a={item_a} item_b={item_b} error={err}"
                );
                Err(ExchangeError::StoreWrite(err))
            }
        }
    }

    /// Runs swaps in order, then reloads once.
    ///
    /// Each swap reads keys fresh inside the store. The first failing swap
    /// stops the batch; earlier swaps stay applied.
    pub async fn batch_exchange_positions(
        &self,
        collection_id: CollectionId,
        exchanges: &[(ItemId, ItemId)],
    ) -> Result<BatchOutcome, ExchangeError> {
        let mut written = 0;
        let mut skipped = 0;
        for (item_a, item_b) in exchanges {
            match self
                .exchange_positions_no_reload(collection_id, *item_a, *item_b)
                .await?
            {
                ExchangeOutcome::Swapped => written += 1,
                ExchangeOutcome::Skipped => skipped += 1,
            }
        }
        debug!(
            "event=batch_exchange module=service status=ok shot={collection_id} swapped={written} skipped={skipped}"
        );
        let snapshot = self.reload(collection_id).await?;
        Ok(BatchOutcome {
            written,
            skipped,
            snapshot,
        })
    }

    /// Writes explicit keys as concurrent chunked writes, then reloads once.
    ///
    /// Every assignment is written. Every chunk runs to completion even when
    /// another fails.
    pub async fn apply_absolute_frames(
        &self,
        collection_id: CollectionId,
        assignments: &[FrameAssignment],
    ) -> Result<BatchOutcome, ExchangeError> {
        self.write_frames(collection_id, assignments, None).await
    }

    // `fresh` must be loaded by the calling operation; assignments matching
    // its keys are skipped.
    async fn write_frames(
        &self,
        collection_id: CollectionId,
        assignments: &[FrameAssignment],
        fresh: Option<&SequenceSnapshot>,
    ) -> Result<BatchOutcome, ExchangeError> {
        let mut seen = HashSet::with_capacity(assignments.len());
        if let Some(repeated) = assignments
            .iter()
            .find(|assignment| !seen.insert(assignment.item_id))
        {
            return Err(ExchangeError::Gap(GapError::DuplicateItem(repeated.item_id)));
        }

        let pending: Vec<FrameAssignment> = assignments
            .iter()
            .filter(|assignment| {
                !fresh.is_some_and(|snapshot| {
                    snapshot.position_of(assignment.item_id) == Some(Some(assignment.new_key))
                })
            })
            .copied()
            .collect();
        let skipped = assignments.len() - pending.len();

        let chunks: Vec<&[FrameAssignment]> = pending
            .chunks(self.config.assignment_chunk_size)
            .collect();
        let results = join_all(
            chunks
                .iter()
                .map(|chunk| self.store.assign_keys(collection_id, chunk)),
        )
        .await;

        let mut written = 0;
        let mut failed_chunks = 0;
        let mut first_error = None;
        for (chunk, result) in chunks.iter().zip(results) {
            match result {
                Ok(()) => {
                    written += chunk.len();
                    self.mirror_assignments(collection_id, chunk);
                }
                Err(err) => {
                    failed_chunks += 1;
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(first) = first_error {
            warn!(
                "event=assign_frames module=service status=error shot={collection_id} failed_chunks={failed_chunks} total_chunks={} error={first}",
                chunks.len()
            );
            return Err(ExchangeError::AssignWrite {
                failed_chunks,
                total_chunks: chunks.len(),
                first,
            });
        }

        debug!(
            "event=assign_frames module=service status=ok shot={collection_id} written={written} skipped={skipped} chunks={}",
            chunks.len()
        );
        let snapshot = self.reload(collection_id).await?;
        Ok(BatchOutcome {
            written,
            skipped,
            snapshot,
        })
    }

    /// Applies a drag-and-drop order given as the full desired sequence.
    ///
    /// # Errors
    /// - `DataSync` when `desired` is not a permutation of the positioned
    ///   items; nothing is written.
    pub async fn reorder(
        &self,
        collection_id: CollectionId,
        desired: &[ItemId],
    ) -> Result<ReorderOutcome, ExchangeError> {
        let snapshot = self.load(collection_id).await?;
        let plan = plan_reorder(&snapshot.ordered_ids(), desired).map_err(|err| {
            warn!(
                "event=reorder module=service status=error shot={collection_id} error={err}"
            );
            ExchangeError::from(err)
        })?;

        if plan.no_changes_needed {
            return Ok(ReorderOutcome {
                plan,
                strategy: ReorderStrategy::Unchanged,
                snapshot,
            });
        }

        if snapshot.has_duplicate_keys() {
            info!(
                "event=reorder module=service status=respace reason=duplicate_keys shot={collection_id} items={}",
                plan.final_order.len()
            );
            let assignments = self.distributor.respace(&plan.final_order);
            let batch = self
                .write_frames(collection_id, &assignments, Some(&snapshot))
                .await?;
            return Ok(ReorderOutcome {
                plan,
                strategy: ReorderStrategy::Respaced,
                snapshot: batch.snapshot,
            });
        }

        let exchanges: Vec<(ItemId, ItemId)> = plan
            .swap_sequence
            .iter()
            .map(|step| (step.item_a, step.item_b))
            .collect();
        let batch = self
            .batch_exchange_positions(collection_id, &exchanges)
            .await?;
        Ok(ReorderOutcome {
            plan,
            strategy: ReorderStrategy::Swaps,
            snapshot: batch.snapshot,
        })
    }

    /// Moves or places a block of items at `target_index`.
    ///
    /// Placing unpositioned items here is how they join the sequence.
    pub async fn move_block(
        &self,
        collection_id: CollectionId,
        moving: &[ItemId],
        target_index: usize,
    ) -> Result<BlockMoveOutcome, ExchangeError> {
        let snapshot = self.load(collection_id).await?;
        let placement = self
            .distributor
            .plan_block_move(snapshot.items(), moving, target_index)?;
        let batch = self
            .write_frames(collection_id, &placement.assignments, Some(&snapshot))
            .await?;
        Ok(BlockMoveOutcome {
            placement,
            snapshot: batch.snapshot,
        })
    }

    /// Re-keys the whole sequence evenly, keeping its current order.
    pub async fn respace(&self, collection_id: CollectionId) -> Result<BatchOutcome, ExchangeError> {
        let snapshot = self.load(collection_id).await?;
        let assignments = self.distributor.respace(&snapshot.ordered_ids());
        self.write_frames(collection_id, &assignments, Some(&snapshot))
            .await
    }

    fn snapshots(&self) -> MutexGuard<'_, HashMap<CollectionId, SequenceSnapshot>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mirror_assignments(&self, collection_id: CollectionId, assignments: &[FrameAssignment]) {
        if let Some(snapshot) = self.snapshots().get_mut(&collection_id) {
            for assignment in assignments {
                snapshot.set_position(assignment.item_id, assignment.new_key);
            }
        }
    }
}
