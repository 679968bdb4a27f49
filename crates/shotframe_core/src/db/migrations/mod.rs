//! Ordered schema steps for the timeline database.
//!
//! # Responsibility
//! - List every schema step with its version and name.
//! - Run pending steps, one transaction per step.
//!
//! # Invariants
//! - Versions start at 1 and increase by exactly one.
//! - `PRAGMA user_version` is bumped inside the step's own transaction, so a
//!   failed step leaves the previous version in place.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "shot_generations",
        sql: include_str!("0001_shot_generations.sql"),
    },
    SchemaStep {
        version: 2,
        name: "shot_stats",
        sql: include_str!("0002_shot_stats.sql"),
    },
];

/// Schema version this binary migrates to.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Brings `conn` up to [`latest_version`].
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the database is ahead of this binary.
/// - `Migration` naming the first step that failed.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from_version = schema_version(conn)?;
    let latest = latest_version();
    if from_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }

    let pending = STEPS.iter().filter(|step| step.version > from_version);
    let mut applied = 0;
    for step in pending {
        run_step(conn, step).map_err(|source| DbError::Migration {
            version: step.version,
            name: step.name,
            source,
        })?;
        debug!(
            "event=db_migrate_step module=db status=ok version={} name={}",
            step.version, step.name
        );
        applied += 1;
    }

    if applied > 0 {
        info!(
            "event=db_migrate module=db status=ok from_version={from_version} to_version={latest} steps={applied}"
        );
    }
    Ok(())
}

fn run_step(conn: &mut Connection, step: &SchemaStep) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(step.sql)?;
    tx.pragma_update(None, "user_version", step.version)?;
    tx.commit()
}

fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
