//! Connection handling for the saga snapshot database.
//!
//! Snapshot traffic is small and write-heavy: one upsert per completed step,
//! one delete per successful saga. A single WAL-mode connection keeps every
//! write serialized without ever hitting `SQLITE_BUSY`, and inspection reads
//! simply queue behind it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};

const DATABASE_FILE: &str = "sagaflow.db";

/// Handle to the migrated snapshot database.
#[derive(Clone, Debug)]
pub struct SagaDatabase {
    pool: SqlitePool,
}

impl SagaDatabase {
    /// Open (creating if needed) the database file at `path` and apply the
    /// embedded migrations.
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;

        tracing::debug!(path = %path.display(), "opened saga snapshot database");
        Ok(Self { pool })
    }

    /// Open `sagaflow.db` under [`default_data_dir`], creating the directory
    /// first.
    pub async fn open_default() -> Result<Self, sqlx::Error> {
        let dir = default_data_dir();
        tokio::fs::create_dir_all(&dir).await?;
        Self::open(&dir.join(DATABASE_FILE)).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for in-flight queries and close the connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `SAGAFLOW_DATA_DIR` when set, otherwise `~/.sagaflow`.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SAGAFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sagaflow")
}
