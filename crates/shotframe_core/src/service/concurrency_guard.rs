//! Drag-session guard for one collection.
//!
//! # Responsibility
//! - Track the `Idle -> Dragging -> Committing -> Idle` gesture lifecycle.
//! - Hold the session's optimistic order and suppress background reloads
//!   while a gesture is live.
//! - Resynchronize with the store after a failed commit.
//!
//! # Invariants
//! - Cancelling a drag issues no write and no reload.
//! - A started commit is never cancelled by the guard; it runs to completion
//!   or failure and always ends in `Idle`.
//! - Invalidations arriving outside `Idle` are counted, not applied; the
//!   commit's final reload absorbs them.
//! - A commit future dropped mid-flight leaves the guard `Idle` with a
//!   pending resync; no new drag starts until `resync` reloads the
//!   collection.

use crate::model::item::{CollectionId, FrameAssignment, ItemId};
use crate::model::sequence::SequenceSnapshot;
use crate::repo::sequence_store::SequenceStore;
use crate::service::exchange_coordinator::{ExchangeCoordinator, ExchangeError};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Gesture lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Idle,
    Dragging,
    Committing,
}

impl Display for GuardPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Dragging => "dragging",
            Self::Committing => "committing",
        };
        f.write_str(name)
    }
}

/// Position change requested by a finished gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gesture {
    /// Exchange two items.
    Swap { item_a: ItemId, item_b: ItemId },
    /// Apply a full desired order.
    Reorder { desired: Vec<ItemId> },
    /// Move or place a block at an index.
    MoveBlock {
        moving: Vec<ItemId>,
        target_index: usize,
    },
    /// Write explicit keys.
    Assign { assignments: Vec<FrameAssignment> },
}

impl Gesture {
    fn name(&self) -> &'static str {
        match self {
            Self::Swap { .. } => "swap",
            Self::Reorder { .. } => "reorder",
            Self::MoveBlock { .. } => "move_block",
            Self::Assign { .. } => "assign",
        }
    }
}

/// What the caller should do with an external invalidation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationDecision {
    /// No gesture is live; reload now.
    Reload,
    /// A gesture is live; the signal was queued.
    Deferred,
    /// Signal concerns another collection.
    Ignored,
}

/// Errors from guard transitions and commits.
#[derive(Debug)]
pub enum GuardError {
    /// Action not allowed in the current phase.
    InvalidTransition {
        from: GuardPhase,
        action: &'static str,
    },
    /// Snapshot or signal belongs to another collection.
    CollectionMismatch {
        expected: CollectionId,
        actual: CollectionId,
    },
    /// Commit failed. `resynced` tells whether the forced reload succeeded.
    Commit {
        source: ExchangeError,
        resynced: bool,
    },
    /// An abandoned commit left the collection unsynchronized.
    ResyncRequired,
    /// Reload requested through `resync` failed.
    Resync(ExchangeError),
}

impl Display for GuardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition { from, action } => {
                write!(f, "cannot {action} while {from}")
            }
            Self::CollectionMismatch { expected, actual } => write!(
                f,
                "guard is bound to shot {expected}, got shot {actual}"
            ),
            Self::Commit { source, resynced } => {
                write!(f, "commit failed (resynced={resynced}): {source}")
            }
            Self::ResyncRequired => write!(f, "resync required after abandoned commit"),
            Self::Resync(source) => write!(f, "resync failed: {source}"),
        }
    }
}

impl Error for GuardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Commit { source, .. } | Self::Resync(source) => Some(source),
            _ => None,
        }
    }
}

/// Result of cancelling a drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragCancelled {
    /// Invalidations queued during the drag; the caller may reload for them.
    pub deferred_invalidations: usize,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Collection state after the commit's reload.
    pub snapshot: SequenceSnapshot,
    /// Invalidations queued during the gesture and covered by that reload.
    pub absorbed_invalidations: usize,
}

#[derive(Debug)]
struct GuardState {
    phase: GuardPhase,
    drag_snapshot: Option<SequenceSnapshot>,
    preview_order: Option<Vec<ItemId>>,
    deferred_invalidations: usize,
    resync_pending: bool,
}

impl GuardState {
    fn idle() -> Self {
        Self {
            phase: GuardPhase::Idle,
            drag_snapshot: None,
            preview_order: None,
            deferred_invalidations: 0,
            resync_pending: false,
        }
    }

    // Returns the number of invalidations dropped by the reset.
    // `resync_pending` survives the reset.
    fn reset(&mut self) -> usize {
        let deferred = self.deferred_invalidations;
        let resync_pending = self.resync_pending;
        *self = Self::idle();
        self.resync_pending = resync_pending;
        deferred
    }
}

/// Session-scoped handle guarding one collection.
///
/// Clones share state, so the gesture code and an invalidation listener can
/// each hold one.
#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    collection_id: CollectionId,
    state: Arc<Mutex<GuardState>>,
}

impl ConcurrencyGuard {
    pub fn new(collection_id: CollectionId) -> Self {
        Self {
            collection_id,
            state: Arc::new(Mutex::new(GuardState::idle())),
        }
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub fn phase(&self) -> GuardPhase {
        self.lock().phase
    }

    /// Whether background reloads are currently held back.
    pub fn is_suppressing_reloads(&self) -> bool {
        self.phase() != GuardPhase::Idle
    }

    /// Whether an abandoned commit still awaits a reload.
    pub fn resync_pending(&self) -> bool {
        self.lock().resync_pending
    }

    /// Reloads the collection after an abandoned commit and clears the
    /// pending flag.
    ///
    /// Allowed only while idle. Calling it with nothing pending still reloads.
    pub async fn resync<S: SequenceStore>(
        &self,
        coordinator: &ExchangeCoordinator<S>,
    ) -> Result<SequenceSnapshot, GuardError> {
        {
            let state = self.lock();
            if state.phase != GuardPhase::Idle {
                return Err(GuardError::InvalidTransition {
                    from: state.phase,
                    action: "resync",
                });
            }
        }
        let collection_id = self.collection_id;
        match coordinator.reload(collection_id).await {
            Ok(snapshot) => {
                self.lock().resync_pending = false;
                info!("event=resync module=guard status=ok shot={collection_id}");
                Ok(snapshot)
            }
            Err(source) => {
                error!(
                    "event=resync module=guard status=error shot={collection_id} error={source}"
                );
                Err(GuardError::Resync(source))
            }
        }
    }

    /// Starts a drag over the given snapshot.
    pub fn begin_drag(&self, snapshot: SequenceSnapshot) -> Result<(), GuardError> {
        if snapshot.collection_id() != self.collection_id {
            return Err(GuardError::CollectionMismatch {
                expected: self.collection_id,
                actual: snapshot.collection_id(),
            });
        }
        let mut state = self.lock();
        if state.phase != GuardPhase::Idle {
            return Err(GuardError::InvalidTransition {
                from: state.phase,
                action: "begin drag",
            });
        }
        if state.resync_pending {
            return Err(GuardError::ResyncRequired);
        }
        state.phase = GuardPhase::Dragging;
        state.drag_snapshot = Some(snapshot);
        debug!(
            "event=drag_begin module=guard status=ok shot={}",
            self.collection_id
        );
        Ok(())
    }

    /// Replaces the optimistic order shown while dragging.
    pub fn update_preview(&self, order: Vec<ItemId>) -> Result<(), GuardError> {
        let mut state = self.lock();
        if state.phase != GuardPhase::Dragging {
            return Err(GuardError::InvalidTransition {
                from: state.phase,
                action: "update preview",
            });
        }
        state.preview_order = Some(order);
        Ok(())
    }

    /// Order to display while a gesture is live.
    ///
    /// Returns `None` when idle.
    pub fn optimistic_order(&self) -> Option<Vec<ItemId>> {
        let state = self.lock();
        if state.phase == GuardPhase::Idle {
            return None;
        }
        state.preview_order.clone().or_else(|| {
            state
                .drag_snapshot
                .as_ref()
                .map(SequenceSnapshot::ordered_ids)
        })
    }

    /// Abandons the drag without writing or reloading.
    pub fn cancel_drag(&self) -> Result<DragCancelled, GuardError> {
        let mut state = self.lock();
        if state.phase != GuardPhase::Dragging {
            return Err(GuardError::InvalidTransition {
                from: state.phase,
                action: "cancel drag",
            });
        }
        let deferred_invalidations = state.reset();
        debug!(
            "event=drag_cancel module=guard status=ok shot={} deferred_invalidations={deferred_invalidations}",
            self.collection_id
        );
        Ok(DragCancelled {
            deferred_invalidations,
        })
    }

    /// Routes an external invalidation signal.
    pub fn notify_invalidated(&self, collection_id: CollectionId) -> InvalidationDecision {
        if collection_id != self.collection_id {
            return InvalidationDecision::Ignored;
        }
        let mut state = self.lock();
        if state.phase == GuardPhase::Idle {
            return InvalidationDecision::Reload;
        }
        state.deferred_invalidations += 1;
        debug!(
            "event=invalidation module=guard status=deferred shot={collection_id} phase={} queued={}",
            state.phase, state.deferred_invalidations
        );
        InvalidationDecision::Deferred
    }

    /// Commits the current preview order as a reorder.
    pub async fn commit_preview<S: SequenceStore>(
        &self,
        coordinator: &ExchangeCoordinator<S>,
    ) -> Result<CommitOutcome, GuardError> {
        let preview = {
            let state = self.lock();
            if state.phase != GuardPhase::Dragging {
                return Err(GuardError::InvalidTransition {
                    from: state.phase,
                    action: "commit preview",
                });
            }
            state.preview_order.clone()
        };
        let Some(desired) = preview else {
            return Err(GuardError::InvalidTransition {
                from: GuardPhase::Dragging,
                action: "commit without preview",
            });
        };
        self.commit(coordinator, Gesture::Reorder { desired }).await
    }

    /// Runs the gesture's coordinator operation.
    ///
    /// On failure one reload is forced so no optimistic state outlives the
    /// error; the gesture error is returned either way.
    pub async fn commit<S: SequenceStore>(
        &self,
        coordinator: &ExchangeCoordinator<S>,
        gesture: Gesture,
    ) -> Result<CommitOutcome, GuardError> {
        {
            let mut state = self.lock();
            if state.phase != GuardPhase::Dragging {
                return Err(GuardError::InvalidTransition {
                    from: state.phase,
                    action: "commit",
                });
            }
            state.phase = GuardPhase::Committing;
        }
        let mut scope = CommitScope {
            state: &self.state,
            collection_id: self.collection_id,
            armed: true,
        };

        let gesture_name = gesture.name();
        let collection_id = self.collection_id;
        let result = match gesture {
            Gesture::Swap { item_a, item_b } => coordinator
                .exchange_positions(collection_id, item_a, item_b)
                .await
                .map(|outcome| outcome.snapshot),
            Gesture::Reorder { desired } => coordinator
                .reorder(collection_id, &desired)
                .await
                .map(|outcome| outcome.snapshot),
            Gesture::MoveBlock {
                moving,
                target_index,
            } => coordinator
                .move_block(collection_id, &moving, target_index)
                .await
                .map(|outcome| outcome.snapshot),
            Gesture::Assign { assignments } => coordinator
                .apply_absolute_frames(collection_id, &assignments)
                .await
                .map(|outcome| outcome.snapshot),
        };

        match result {
            Ok(snapshot) => {
                let absorbed_invalidations = scope.finish();
                info!(
                    "event=commit module=guard status=ok shot={collection_id} gesture={gesture_name} absorbed_invalidations={absorbed_invalidations}"
                );
                Ok(CommitOutcome {
                    snapshot,
                    absorbed_invalidations,
                })
            }
            Err(source) => {
                warn!(
                    "event=commit module=guard status=error shot={collection_id} gesture={gesture_name} error={source}"
                );
                let resynced = match coordinator.reload(collection_id).await {
                    Ok(_) => {
                        info!("event=resync module=guard status=ok shot={collection_id}");
                        true
                    }
                    Err(reload_err) => {
                        error!(
                            "event=resync module=guard status=error shot={collection_id} error={reload_err}"
                        );
                        false
                    }
                };
                scope.finish();
                Err(GuardError::Commit { source, resynced })
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<GuardState>) -> MutexGuard<'_, GuardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// Returns the guard to `Idle` even when the commit future is dropped
// mid-flight.
struct CommitScope<'a> {
    state: &'a Mutex<GuardState>,
    collection_id: CollectionId,
    armed: bool,
}

impl CommitScope<'_> {
    fn finish(&mut self) -> usize {
        self.armed = false;
        lock_state(self.state).reset()
    }
}

impl Drop for CommitScope<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = lock_state(self.state);
            state.reset();
            state.resync_pending = true;
            drop(state);
            warn!(
                "event=commit module=guard status=abandoned resync=pending shot={}",
                self.collection_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConcurrencyGuard, GuardError, GuardPhase, InvalidationDecision};
    use crate::model::item::{PositionKey, SequenceItem};
    use crate::model::sequence::SequenceSnapshot;
    use uuid::Uuid;

    fn snapshot(shot: Uuid, count: usize) -> SequenceSnapshot {
        let items = (0..count)
            .map(|index| {
                SequenceItem::new(shot, PositionKey::new(index as f64 * 50.0), index as i64)
            })
            .collect();
        SequenceSnapshot::from_items(shot, items)
    }

    #[test]
    fn drag_then_cancel_returns_to_idle() {
        let shot = Uuid::new_v4();
        let guard = ConcurrencyGuard::new(shot);
        guard.begin_drag(snapshot(shot, 3)).unwrap();
        assert_eq!(guard.phase(), GuardPhase::Dragging);
        assert!(guard.is_suppressing_reloads());

        let cancelled = guard.cancel_drag().unwrap();
        assert_eq!(cancelled.deferred_invalidations, 0);
        assert_eq!(guard.phase(), GuardPhase::Idle);
        assert!(guard.optimistic_order().is_none());
    }

    #[test]
    fn invalidations_are_deferred_while_dragging() {
        let shot = Uuid::new_v4();
        let guard = ConcurrencyGuard::new(shot);
        assert_eq!(guard.notify_invalidated(shot), InvalidationDecision::Reload);

        guard.begin_drag(snapshot(shot, 2)).unwrap();
        assert_eq!(guard.notify_invalidated(shot), InvalidationDecision::Deferred);
        assert_eq!(guard.notify_invalidated(shot), InvalidationDecision::Deferred);
        assert_eq!(
            guard.notify_invalidated(Uuid::new_v4()),
            InvalidationDecision::Ignored
        );

        let cancelled = guard.cancel_drag().unwrap();
        assert_eq!(cancelled.deferred_invalidations, 2);
        assert_eq!(guard.notify_invalidated(shot), InvalidationDecision::Reload);
    }

    #[test]
    fn clones_share_state() {
        let shot = Uuid::new_v4();
        let guard = ConcurrencyGuard::new(shot);
        let listener = guard.clone();
        guard.begin_drag(snapshot(shot, 1)).unwrap();
        assert_eq!(
            listener.notify_invalidated(shot),
            InvalidationDecision::Deferred
        );
    }

    #[test]
    fn preview_replaces_optimistic_order() {
        let shot = Uuid::new_v4();
        let guard = ConcurrencyGuard::new(shot);
        let base = snapshot(shot, 3);
        let mut order = base.ordered_ids();
        guard.begin_drag(base).unwrap();
        assert_eq!(guard.optimistic_order(), Some(order.clone()));

        order.reverse();
        guard.update_preview(order.clone()).unwrap();
        assert_eq!(guard.optimistic_order(), Some(order));
    }

    #[test]
    fn begin_drag_twice_is_rejected() {
        let shot = Uuid::new_v4();
        let guard = ConcurrencyGuard::new(shot);
        guard.begin_drag(snapshot(shot, 1)).unwrap();
        let err = guard.begin_drag(snapshot(shot, 1)).unwrap_err();
        assert!(matches!(
            err,
            GuardError::InvalidTransition {
                from: GuardPhase::Dragging,
                ..
            }
        ));
    }

    #[test]
    fn snapshot_of_other_collection_is_rejected() {
        let guard = ConcurrencyGuard::new(Uuid::new_v4());
        let err = guard.begin_drag(snapshot(Uuid::new_v4(), 1)).unwrap_err();
        assert!(matches!(err, GuardError::CollectionMismatch { .. }));
        assert_eq!(guard.phase(), GuardPhase::Idle);
    }

    #[test]
    fn cancel_and_preview_need_an_active_drag() {
        let guard = ConcurrencyGuard::new(Uuid::new_v4());
        assert!(guard.cancel_drag().is_err());
        assert!(guard.update_preview(Vec::new()).is_err());
    }
}
