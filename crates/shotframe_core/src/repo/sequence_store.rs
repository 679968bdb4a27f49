//! Async store contract used by the exchange coordinator.
//!
//! # Responsibility
//! - Describe reads, atomic swaps, batched key writes and read-view refresh
//!   for one collection at a time.
//!
//! # Invariants
//! - `swap_keys` reads both keys inside its own atomic unit; callers never
//!   pass pre-computed keys.
//! - `assign_keys` assignments are independent of each other.

use crate::db::DbError;
use crate::model::item::{CollectionId, FrameAssignment, ItemId, SequenceItem};
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Result type used by store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Item does not exist in the collection.
    ItemNotFound {
        collection_id: CollectionId,
        item_id: ItemId,
    },
    /// Collection does not exist.
    CollectionNotFound(CollectionId),
    /// Item has no position key, so it cannot take part in a swap.
    Unpositioned(ItemId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
    /// Remote or transient failure reported by a non-SQLite backend.
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ItemNotFound {
                collection_id,
                item_id,
            } => write!(f, "item {item_id} not found in shot {collection_id}"),
            Self::CollectionNotFound(id) => write!(f, "shot not found: {id}"),
            Self::Unpositioned(id) => write!(f, "item has no timeline frame: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "sequence store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "sequence store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "sequence store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid timeline data: {message}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Outcome of one atomic key swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Both keys were exchanged.
    Swapped,
    /// Keys were already equal; nothing was written.
    Unchanged,
}

/// Persistence contract for ordered collections.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Loads every item of a collection, positioned or not.
    async fn load_order(&self, collection_id: CollectionId) -> StoreResult<Vec<SequenceItem>>;

    /// Atomically exchanges the keys of two items.
    async fn swap_keys(
        &self,
        collection_id: CollectionId,
        item_a: ItemId,
        item_b: ItemId,
    ) -> StoreResult<SwapOutcome>;

    /// Writes explicit keys. Assignments have no ordering dependency.
    async fn assign_keys(
        &self,
        collection_id: CollectionId,
        assignments: &[FrameAssignment],
    ) -> StoreResult<()>;

    /// Recomputes cached read views (counts, badges) for a collection.
    async fn refresh_views(&self, collection_id: CollectionId) -> StoreResult<()>;
}

#[async_trait]
impl<S: SequenceStore + ?Sized> SequenceStore for Arc<S> {
    async fn load_order(&self, collection_id: CollectionId) -> StoreResult<Vec<SequenceItem>> {
        (**self).load_order(collection_id).await
    }

    async fn swap_keys(
        &self,
        collection_id: CollectionId,
        item_a: ItemId,
        item_b: ItemId,
    ) -> StoreResult<SwapOutcome> {
        (**self).swap_keys(collection_id, item_a, item_b).await
    }

    async fn assign_keys(
        &self,
        collection_id: CollectionId,
        assignments: &[FrameAssignment],
    ) -> StoreResult<()> {
        (**self).assign_keys(collection_id, assignments).await
    }

    async fn refresh_views(&self, collection_id: CollectionId) -> StoreResult<()> {
        (**self).refresh_views(collection_id).await
    }
}
