//! SQLite connection pooling.
//!
//! One pool per process, shared by the content, vector, graph, and session
//! stores. WAL keeps retrieval reads concurrent with the message appends
//! the pipeline does after every answer; the busy timeout covers the brief
//! writer contention that produces. Foreign keys are enforced because the
//! entity relation and message tables reference rows this service never
//! creates itself.

use anyhow::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use std::time::Duration;

/// Connections kept per pool. Retrieval fans out to at most three backends
/// plus the session writes, so a small pool is enough.
const MAX_CONNECTIONS: u32 = 5;

pub async fn connect(config: &crate::config::Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    Ok(pool)
}
