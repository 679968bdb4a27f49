//! SQLite-backed sequence store.
//!
//! # Responsibility
//! - Persist shot items and their timeline frames in `shot_generations`.
//! - Implement atomic swaps and batched key writes for the position engine.
//! - Maintain the `shot_stats` read view.
//!
//! # Invariants
//! - Listing is deterministic: `timeline_frame ASC, created_at ASC,
//!   item_uuid ASC` with unpositioned rows last.
//! - A swap reads and writes both rows inside one IMMEDIATE transaction.
//! - `created_at` is strictly increasing per shot, so creation order is a
//!   usable tie-break.

use crate::db::migrations::latest_version;
use crate::db::{open_db, open_db_in_memory};
use crate::model::item::{CollectionId, FrameAssignment, ItemId, PositionKey, SequenceItem};
use crate::repo::sequence_store::{SequenceStore, StoreError, StoreResult, SwapOutcome};
use async_trait::async_trait;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Cached per-shot aggregate refreshed after every position change.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotStats {
    pub shot_id: CollectionId,
    pub item_count: i64,
    pub positioned_count: i64,
    pub first_frame: Option<f64>,
    pub last_frame: Option<f64>,
    pub refreshed_at: i64,
}

/// SQLite-backed store owning one connection.
pub struct SqliteSequenceStore {
    conn: Mutex<Connection>,
}

impl SqliteSequenceStore {
    /// Creates store from a migrated connection.
    pub fn try_new(conn: Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates store over a fresh in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::try_new(open_db_in_memory()?)
    }

    /// Creates store over a database file, migrating it first.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::try_new(open_db(path)?)
    }

    /// Creates one shot.
    pub fn create_shot(&self, name: &str) -> StoreResult<CollectionId> {
        let shot_id = Uuid::new_v4();
        self.lock().execute(
            "INSERT INTO shots (shot_uuid, name) VALUES (?1, ?2);",
            params![shot_id.to_string(), name],
        )?;
        Ok(shot_id)
    }

    /// Inserts one item with an explicit frame or unpositioned.
    pub fn insert_item(
        &self,
        shot_id: CollectionId,
        frame: Option<PositionKey>,
    ) -> StoreResult<SequenceItem> {
        let conn = self.lock();
        ensure_shot_exists(&conn, shot_id)?;
        let item_id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO shot_generations (
                item_uuid,
                shot_uuid,
                timeline_frame,
                created_at,
                updated_at
            ) VALUES (
                ?1,
                ?2,
                ?3,
                MAX(
                    strftime('%s', 'now') * 1000,
                    COALESCE(
                        (SELECT MAX(created_at) + 1 FROM shot_generations WHERE shot_uuid = ?2),
                        0
                    )
                ),
                strftime('%s', 'now') * 1000
            );",
            params![
                item_id.to_string(),
                shot_id.to_string(),
                frame.map(PositionKey::value),
            ],
        )?;
        load_required_item(&conn, shot_id, item_id)
    }

    /// Deletes one item. Survivors keep their keys.
    pub fn remove_item(&self, shot_id: CollectionId, item_id: ItemId) -> StoreResult<()> {
        let changed = self.lock().execute(
            "DELETE FROM shot_generations WHERE item_uuid = ?1 AND shot_uuid = ?2;",
            params![item_id.to_string(), shot_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::ItemNotFound {
                collection_id: shot_id,
                item_id,
            });
        }
        Ok(())
    }

    /// Takes one item out of the ordered sequence.
    pub fn clear_position(&self, shot_id: CollectionId, item_id: ItemId) -> StoreResult<()> {
        let changed = self.lock().execute(
            "UPDATE shot_generations
             SET timeline_frame = NULL,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE item_uuid = ?1
               AND shot_uuid = ?2;",
            params![item_id.to_string(), shot_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::ItemNotFound {
                collection_id: shot_id,
                item_id,
            });
        }
        Ok(())
    }

    /// Reads the cached aggregate for one shot, if it was ever refreshed.
    pub fn shot_stats(&self, shot_id: CollectionId) -> StoreResult<Option<ShotStats>> {
        let stats = self
            .lock()
            .query_row(
                "SELECT item_count, positioned_count, first_frame, last_frame, refreshed_at
                 FROM shot_stats
                 WHERE shot_uuid = ?1;",
                [shot_id.to_string()],
                |row| {
                    Ok(ShotStats {
                        shot_id,
                        item_count: row.get(0)?,
                        positioned_count: row.get(1)?,
                        first_frame: row.get(2)?,
                        last_frame: row.get(3)?,
                        refreshed_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_order_blocking(&self, shot_id: CollectionId) -> StoreResult<Vec<SequenceItem>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT item_uuid, shot_uuid, timeline_frame, created_at
             FROM shot_generations
             WHERE shot_uuid = ?1
             ORDER BY timeline_frame IS NULL ASC,
                      timeline_frame ASC,
                      created_at ASC,
                      item_uuid ASC;",
        )?;
        let mut rows = stmt.query([shot_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn swap_keys_blocking(
        &self,
        shot_id: CollectionId,
        item_a: ItemId,
        item_b: ItemId,
    ) -> StoreResult<SwapOutcome> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let key_a = read_frame(&tx, shot_id, item_a)?.ok_or(StoreError::Unpositioned(item_a))?;
        let key_b = read_frame(&tx, shot_id, item_b)?.ok_or(StoreError::Unpositioned(item_b))?;
        if key_a == key_b {
            return Ok(SwapOutcome::Unchanged);
        }

        write_frame(&tx, shot_id, item_a, key_b)?;
        write_frame(&tx, shot_id, item_b, key_a)?;
        tx.commit()?;

        debug!(
            "event=swap_keys module=repo status=ok shot={shot_id} item_a={item_a} item_b={item_b} key_a={key_b} key_b={key_a}"
        );
        Ok(SwapOutcome::Swapped)
    }

    fn assign_keys_blocking(
        &self,
        shot_id: CollectionId,
        assignments: &[FrameAssignment],
    ) -> StoreResult<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for assignment in assignments {
            write_frame(&tx, shot_id, assignment.item_id, assignment.new_key)?;
        }
        tx.commit()?;

        debug!(
            "event=assign_keys module=repo status=ok shot={shot_id} count={}",
            assignments.len()
        );
        Ok(())
    }

    fn refresh_views_blocking(&self, shot_id: CollectionId) -> StoreResult<()> {
        let conn = self.lock();
        ensure_shot_exists(&conn, shot_id)?;
        conn.execute(
            "INSERT INTO shot_stats (
                shot_uuid,
                item_count,
                positioned_count,
                first_frame,
                last_frame,
                refreshed_at
            )
            SELECT
                ?1,
                COUNT(*),
                COUNT(timeline_frame),
                MIN(timeline_frame),
                MAX(timeline_frame),
                strftime('%s', 'now') * 1000
            FROM shot_generations
            WHERE shot_uuid = ?1
            ON CONFLICT(shot_uuid) DO UPDATE SET
                item_count = excluded.item_count,
                positioned_count = excluded.positioned_count,
                first_frame = excluded.first_frame,
                last_frame = excluded.last_frame,
                refreshed_at = excluded.refreshed_at;",
            [shot_id.to_string()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SequenceStore for SqliteSequenceStore {
    async fn load_order(&self, collection_id: CollectionId) -> StoreResult<Vec<SequenceItem>> {
        self.load_order_blocking(collection_id)
    }

    async fn swap_keys(
        &self,
        collection_id: CollectionId,
        item_a: ItemId,
        item_b: ItemId,
    ) -> StoreResult<SwapOutcome> {
        self.swap_keys_blocking(collection_id, item_a, item_b)
    }

    async fn assign_keys(
        &self,
        collection_id: CollectionId,
        assignments: &[FrameAssignment],
    ) -> StoreResult<()> {
        self.assign_keys_blocking(collection_id, assignments)
    }

    async fn refresh_views(&self, collection_id: CollectionId) -> StoreResult<()> {
        self.refresh_views_blocking(collection_id)
    }
}

// Outer `None`-equivalent is `ItemNotFound`; inner `None` means unpositioned.
fn read_frame(
    conn: &Connection,
    shot_id: CollectionId,
    item_id: ItemId,
) -> StoreResult<Option<PositionKey>> {
    let frame: Option<Option<f64>> = conn
        .query_row(
            "SELECT timeline_frame
             FROM shot_generations
             WHERE item_uuid = ?1
               AND shot_uuid = ?2;",
            params![item_id.to_string(), shot_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match frame {
        None => Err(StoreError::ItemNotFound {
            collection_id: shot_id,
            item_id,
        }),
        Some(None) => Ok(None),
        Some(Some(value)) => parse_frame(value, item_id).map(Some),
    }
}

fn write_frame(
    conn: &Connection,
    shot_id: CollectionId,
    item_id: ItemId,
    key: PositionKey,
) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE shot_generations
         SET timeline_frame = ?3,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE item_uuid = ?1
           AND shot_uuid = ?2;",
        params![item_id.to_string(), shot_id.to_string(), key.value()],
    )?;
    if changed == 0 {
        return Err(StoreError::ItemNotFound {
            collection_id: shot_id,
            item_id,
        });
    }
    Ok(())
}

fn load_required_item(
    conn: &Connection,
    shot_id: CollectionId,
    item_id: ItemId,
) -> StoreResult<SequenceItem> {
    let mut stmt = conn.prepare(
        "SELECT item_uuid, shot_uuid, timeline_frame, created_at
         FROM shot_generations
         WHERE item_uuid = ?1
           AND shot_uuid = ?2;",
    )?;
    let mut rows = stmt.query(params![item_id.to_string(), shot_id.to_string()])?;
    if let Some(row) = rows.next()? {
        return parse_item_row(row);
    }
    Err(StoreError::ItemNotFound {
        collection_id: shot_id,
        item_id,
    })
}

fn ensure_shot_exists(conn: &Connection, shot_id: CollectionId) -> StoreResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM shots WHERE shot_uuid = ?1);",
        [shot_id.to_string()],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(StoreError::CollectionNotFound(shot_id))
    }
}

fn parse_item_row(row: &Row<'_>) -> StoreResult<SequenceItem> {
    let item_uuid_text: String = row.get("item_uuid")?;
    let item_id = parse_uuid(&item_uuid_text, "shot_generations.item_uuid")?;
    let shot_uuid_text: String = row.get("shot_uuid")?;
    let shot_id = parse_uuid(&shot_uuid_text, "shot_generations.shot_uuid")?;
    let position = row
        .get::<_, Option<f64>>("timeline_frame")?
        .map(|value| parse_frame(value, item_id))
        .transpose()?;

    Ok(SequenceItem {
        item_id,
        collection_id: shot_id,
        position,
        created_at: row.get("created_at")?,
    })
}

fn parse_frame(value: f64, item_id: ItemId) -> StoreResult<PositionKey> {
    PositionKey::new(value).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid timeline_frame `{value}` for item {item_id}"
        ))
    })
}

fn parse_uuid(value: &str, column: &'static str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    const REQUIRED: &[(&str, &[&str])] = &[
        ("shots", &["shot_uuid", "name", "created_at"]),
        (
            "shot_generations",
            &[
                "item_uuid",
                "shot_uuid",
                "timeline_frame",
                "created_at",
                "updated_at",
            ],
        ),
        (
            "shot_stats",
            &[
                "shot_uuid",
                "item_count",
                "positioned_count",
                "first_frame",
                "last_frame",
                "refreshed_at",
            ],
        ),
    ];

    for &(table, columns) in REQUIRED {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(StoreError::MissingRequiredColumn { table, column });
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
