//! Database layer for the local issue cache.
//!
//! This module handles:
//! - Connection pool management with WAL mode
//! - Schema creation, including the upgrade of a single-project store
//! - Carry-over of legacy single-project issue rows into a project

pub mod pool;

use crate::models::project::{self, NewProject};
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use pool::DbPool;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Name the pre-project issue table is moved to during the upgrade.
pub const LEGACY_ISSUES_TABLE: &str = "issues_legacy";

/// Columns carried over from a legacy issue table when present.
const LEGACY_COPY_COLUMNS: &[&str] = &[
    "github_id",
    "number",
    "title",
    "body",
    "state",
    "labels",
    "assignees",
    "created_at",
    "updated_at",
    "closed_at",
    "local_modified_at",
    "sync_hash",
];

/// Issue table keyed by project. `{table}` is substituted at creation time.
const ISSUES_TABLE_DDL: &str = r#"
CREATE TABLE {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    github_id INTEGER,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    number INTEGER,
    title TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL DEFAULT 'open',
    labels TEXT NOT NULL DEFAULT '',
    assignees TEXT NOT NULL DEFAULT '',
    created_at TEXT,
    updated_at TEXT,
    closed_at TEXT,
    local_modified_at TEXT,
    sync_hash TEXT,
    remote_snapshot TEXT,
    UNIQUE (github_id, project_id),
    UNIQUE (project_id, number)
)
"#;

/// Open the database at `db_path`, creating it if needed, and ensure the schema.
pub async fn initialize(db_path: &Path) -> Result<DbPool, DbError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Migration(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let pool = pool::create_pool(db_path).await?;
    ensure_schema(&pool).await?;

    Ok(pool)
}

/// Create missing tables and upgrade a single-project issue table in place.
///
/// If `issues` exists without a `project_id` column it is renamed to
/// [`LEGACY_ISSUES_TABLE`] and a project-keyed table takes its place. The rows
/// stay in the legacy table until [`migrate_legacy_issues`] carries them over.
pub async fn ensure_schema(pool: &DbPool) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    apply_migration(
        &mut tx,
        "0001_projects",
        include_str!("migrations/0001_projects.sql"),
    )
    .await?;

    if !table_exists(&mut tx, "issues").await? {
        sqlx::query(&issues_ddl("issues")).execute(&mut *tx).await?;
    } else if !column_exists(&mut tx, "issues", "project_id").await? {
        if table_exists(&mut tx, LEGACY_ISSUES_TABLE).await? {
            return Err(DbError::Migration(format!(
                "both a single-project `issues` table and `{}` exist",
                LEGACY_ISSUES_TABLE
            )));
        }

        log::info!("Upgrading single-project issue table to project-keyed schema");
        sqlx::query(&issues_ddl("issues_new"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("ALTER TABLE issues RENAME TO {}", LEGACY_ISSUES_TABLE))
            .execute(&mut *tx)
            .await?;
        sqlx::query("ALTER TABLE issues_new RENAME TO issues")
            .execute(&mut *tx)
            .await?;
    } else if !column_exists(&mut tx, "issues", "remote_snapshot").await? {
        sqlx::query("ALTER TABLE issues ADD COLUMN remote_snapshot TEXT")
            .execute(&mut *tx)
            .await?;
    }

    apply_migration(
        &mut tx,
        "0002_issue_sync_state",
        include_str!("migrations/0002_issue_sync_state.sql"),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Whether a legacy issue table is waiting to be carried over.
pub async fn has_legacy_issues(pool: &DbPool) -> Result<bool, DbError> {
    let mut conn = pool.acquire().await?;
    table_exists(&mut conn, LEGACY_ISSUES_TABLE).await
}

/// Copy rows from the renamed-away legacy table into `issues` under `legacy_project`.
///
/// Registers the project if needed, creates a sync-state row for every copied
/// issue (SYNCED with a remote id, LOCAL_ONLY without), and drops the legacy
/// table. Returns the number of rows copied; 0 if there was nothing to migrate.
pub async fn migrate_legacy_issues(
    pool: &DbPool,
    legacy_project: &NewProject,
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;

    if !table_exists(&mut tx, LEGACY_ISSUES_TABLE).await? {
        return Ok(0);
    }

    let legacy_columns = table_columns(&mut tx, LEGACY_ISSUES_TABLE).await?;
    if !legacy_columns.iter().any(|c| c == "title") {
        return Err(DbError::Migration(format!(
            "`{}` has no title column",
            LEGACY_ISSUES_TABLE
        )));
    }

    let columns: Vec<&str> = LEGACY_COPY_COLUMNS
        .iter()
        .copied()
        .filter(|c| legacy_columns.iter().any(|l| l == c))
        .collect();
    let column_list = columns.join(", ");

    let project_id = project::register_in(&mut tx, legacy_project).await?;

    let copied = sqlx::query(&format!(
        "INSERT INTO issues (project_id, {cols}) SELECT ?, {cols} FROM {legacy}",
        cols = column_list,
        legacy = LEGACY_ISSUES_TABLE
    ))
    .bind(project_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query(
        r#"
        INSERT INTO issue_sync_state (issue_local_id, sync_state, github_id, retry_count)
        SELECT id,
               CASE WHEN github_id IS NULL THEN 'LOCAL_ONLY' ELSE 'SYNCED' END,
               github_id,
               0
        FROM issues
        WHERE project_id = ?
          AND id NOT IN (SELECT issue_local_id FROM issue_sync_state)
        "#,
    )
    .bind(project_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!("DROP TABLE {}", LEGACY_ISSUES_TABLE))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    log::info!(
        "Migrated {} legacy issue(s) into {}/{}",
        copied,
        legacy_project.owner,
        legacy_project.repo
    );

    Ok(copied)
}

/// Pools keyed by database path, so projects sharing a file share a pool.
#[derive(Default)]
pub struct StoreSet {
    pools: HashMap<PathBuf, DbPool>,
}

impl StoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the pool for `db_path`, initializing the database on first use.
    pub async fn open(&mut self, db_path: &Path) -> Result<DbPool, DbError> {
        if let Some(pool) = self.pools.get(db_path) {
            return Ok(pool.clone());
        }

        let pool = initialize(db_path).await?;
        self.pools.insert(db_path.to_path_buf(), pool.clone());
        Ok(pool)
    }

    /// Close every pool.
    pub async fn close(self) {
        for pool in self.pools.into_values() {
            pool.close().await;
        }
    }
}

fn issues_ddl(table: &str) -> String {
    ISSUES_TABLE_DDL.replace("{table}", table)
}

/// Run a named migration once, recording it in `_migrations`.
async fn apply_migration(
    conn: &mut SqliteConnection,
    name: &str,
    sql: &str,
) -> Result<(), DbError> {
    let applied: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    if applied.is_some() {
        return Ok(());
    }

    for statement in parse_sql_statements(sql) {
        sqlx::query(&statement).execute(&mut *conn).await?;
    }

    sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
        .bind(name)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool, DbError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count > 0)
}

async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, DbError> {
    Ok(table_columns(conn, table).await?.iter().any(|c| c == column))
}

async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>, DbError> {
    let rows = sqlx::query("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
}

/// Split a migration file into statements.
///
/// Skips `--` comments and ignores semicolons inside parentheses.
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current_statement = String::new();
    let mut paren_depth: i32 = 0;

    for line in sql.lines() {
        let code = match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        };

        for ch in code.chars() {
            match ch {
                '(' => {
                    paren_depth += 1;
                    current_statement.push(ch);
                }
                ')' => {
                    paren_depth = paren_depth.saturating_sub(1);
                    current_statement.push(ch);
                }
                ';' if paren_depth == 0 => {
                    let stmt = current_statement.trim().to_string();
                    if !stmt.is_empty() {
                        statements.push(stmt);
                    }
                    current_statement.clear();
                }
                _ => current_statement.push(ch),
            }
        }

        if !current_statement.is_empty() {
            current_statement.push(' ');
        }
    }

    let final_stmt = current_statement.trim().to_string();
    if !final_stmt.is_empty() {
        statements.push(final_stmt);
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_initialize_creates_tables() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested/test.db");

        let pool = initialize(&db_path).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_migrations' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(table_names, vec!["issue_sync_state", "issues", "projects"]);
        assert!(!has_legacy_issues(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let _pool1 = initialize(&db_path).await.unwrap();
        let pool2 = initialize(&db_path).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&pool2)
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }

    #[tokio::test]
    async fn test_ensure_schema_adds_remote_snapshot_column() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = initialize(&db_path).await.unwrap();
        sqlx::query("ALTER TABLE issues DROP COLUMN remote_snapshot")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = initialize(&db_path).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert!(column_exists(&mut conn, "issues", "remote_snapshot")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_migrate_without_legacy_table_is_noop() {
        let dir = tempdir().unwrap();
        let pool = initialize(&dir.path().join("test.db")).await.unwrap();

        let copied = migrate_legacy_issues(&pool, &NewProject::new("o", "r"))
            .await
            .unwrap();
        assert_eq!(copied, 0);

        let projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(projects, 0);
    }

    #[test]
    fn test_parse_sql_statements() {
        let sql = r#"
-- comment line
CREATE TABLE a (x INTEGER DEFAULT (strftime('%s', 'now'))); -- trailing
CREATE INDEX i ON a(x);
"#;
        let statements = parse_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE a"));
        assert!(statements[1].starts_with("CREATE INDEX i"));
    }
}
