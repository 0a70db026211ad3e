#![forbid(unsafe_code)]

use crate::error::Error;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use tracing::debug;

/// Open (creating if needed) the state database and bring its schema up to date.
pub async fn open_database(path: &Path) -> Result<SqlitePool, Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    // a single connection serializes writers without busy retries
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    debug!(path = %path.display(), "state database ready");
    Ok(pool)
}
