use std::collections::HashSet;

use chrono::{SecondsFormat, Utc};
use libsql::{Connection, params};
use thiserror::Error;

use crate::db::{Database, StoreError};

/// Ordered schema steps. Each step runs inside its own transaction and is
/// recorded in the ledger, so restarts pick up where the last run stopped.
const SCHEMA_STEPS: &[(&str, &str)] = &[(
    "001_initial",
    include_str!("../../../migrations/001_initial.sql"),
)];

const LEDGER_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS schema_migrations (version TEXT PRIMARY KEY, applied_at TEXT NOT NULL)";

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("schema ledger unavailable: {0}")]
    Ledger(libsql::Error),
    #[error("schema step {version} failed: {source}")]
    Step {
        version: String,
        source: libsql::Error,
    },
}

pub async fn run_migrations(db: &Database) -> Result<(), MigrationError> {
    let conn = db.connection().await?;
    apply_steps(&conn, SCHEMA_STEPS).await
}

async fn apply_steps(
    conn: &Connection,
    steps: &[(&str, &str)],
) -> Result<(), MigrationError> {
    conn.execute(LEDGER_TABLE, ())
        .await
        .map_err(MigrationError::Ledger)?;

    let applied = applied_versions(conn).await?;
    for &(version, sql) in steps {
        if applied.contains(version) {
            continue;
        }
        apply_step(conn, version, sql).await?;
    }
    Ok(())
}

async fn applied_versions(conn: &Connection) -> Result<HashSet<String>, MigrationError> {
    let mut rows = conn
        .query("SELECT version FROM schema_migrations", ())
        .await
        .map_err(MigrationError::Ledger)?;

    let mut versions = HashSet::new();
    while let Some(row) = rows.next().await.map_err(MigrationError::Ledger)? {
        versions.insert(row.get::<String>(0).map_err(MigrationError::Ledger)?);
    }
    Ok(versions)
}

async fn apply_step(conn: &Connection, version: &str, sql: &str) -> Result<(), MigrationError> {
    let step_failed = |source| MigrationError::Step {
        version: version.to_string(),
        source,
    };

    let tx = conn.transaction().await.map_err(step_failed)?;
    tx.execute_batch(sql).await.map_err(step_failed)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        params![
            version,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        ],
    )
    .await
    .map_err(step_failed)?;
    tx.commit().await.map_err(step_failed)?;
    Ok(())
}
