//! SQLite connection pool.
//!
//! One pool per database file. WAL mode lets status readers run while a sync
//! writes; foreign keys are enforced so a sync-state row cannot outlive its issue.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a connection pool for the database at `db_path`.
///
/// The file is created if missing; its parent directory must already exist.
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        // Sync and push run sequentially; a few connections cover status readers
        .max_connections(4)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;

    if !mode.0.eq_ignore_ascii_case("wal") {
        log::warn!(
            "SQLite at {} is not in WAL mode (got {})",
            db_path.display(),
            mode.0
        );
    }

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_pool_with_wal() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = create_pool(&db_path).await.unwrap();

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");

        let fk: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk.0, 1);
    }

    #[tokio::test]
    async fn test_pool_requires_parent_directory() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("missing/test.db");

        // create_if_missing only creates the file, not directories
        assert!(create_pool(&db_path).await.is_err());

        std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
        let pool = create_pool(&db_path).await.unwrap();
        assert!(db_path.exists());

        let result: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(result.0, 1);
    }
}
