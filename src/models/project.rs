//! Project registry.
//!
//! A project is one remote repository mirrored locally. `(owner, repo)` is
//! unique; registering a known pair updates it in place and keeps its ID.

use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use std::path::Path;

/// Registered project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Local database ID.
    pub id: i64,

    /// Repository owner (user or organization).
    pub owner: String,

    /// Repository name.
    pub repo: String,

    /// Working tree path used for auto-detection.
    pub path: Option<String>,

    /// Project-specific token override.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Project-specific database override.
    pub database_path: Option<String>,

    /// Unix timestamp of first registration.
    pub created_at: i64,

    /// Unix timestamp of last update.
    pub updated_at: i64,
}

impl Project {
    /// `owner/repo`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Data required to register a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub owner: String,
    pub repo: String,
    pub path: Option<String>,
    pub token: Option<String>,
    pub database_path: Option<String>,
}

impl NewProject {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_database(mut self, database_path: impl Into<String>) -> Self {
        self.database_path = Some(database_path.into());
        self
    }
}

const PROJECT_COLUMNS: &str =
    "id, owner, repo, path, token, database_path, created_at, updated_at";

/// Register a project, or update path/token/database of a known one.
///
/// Returns the local ID, which is stable across re-registration. `None`
/// fields leave the stored value unchanged.
pub async fn register(pool: &DbPool, project: &NewProject) -> Result<i64, AppError> {
    let mut conn = pool.acquire().await?;
    Ok(register_in(&mut conn, project).await?)
}

/// [`register`] on an existing connection or transaction.
pub async fn register_in(
    conn: &mut SqliteConnection,
    project: &NewProject,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO projects (owner, repo, path, token, database_path)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(owner, repo) DO UPDATE SET
            path = COALESCE(excluded.path, projects.path),
            token = COALESCE(excluded.token, projects.token),
            database_path = COALESCE(excluded.database_path, projects.database_path),
            updated_at = strftime('%s', 'now')
        RETURNING id
        "#,
    )
    .bind(&project.owner)
    .bind(&project.repo)
    .bind(&project.path)
    .bind(&project.token)
    .bind(&project.database_path)
    .fetch_one(&mut *conn)
    .await
}

/// Look up a project by owner and repository name.
pub async fn find_by_name(pool: &DbPool, owner: &str, repo: &str) -> Result<Project, AppError> {
    sqlx::query_as::<_, Project>(&format!(
        "SELECT {} FROM projects WHERE owner = ? AND repo = ?",
        PROJECT_COLUMNS
    ))
    .bind(owner)
    .bind(repo)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found_with_id("Project", format!("{}/{}", owner, repo)))
}

/// Look up the project whose path equals `path` or contains it.
///
/// The deepest registered path wins when projects are nested.
pub async fn find_by_path(pool: &DbPool, path: &Path) -> Result<Project, AppError> {
    let path = path.display().to_string();
    let path = path.trim_end_matches('/');

    sqlx::query_as::<_, Project>(&format!(
        r#"
        SELECT {} FROM projects
        WHERE path IS NOT NULL
          AND (path = ?1 OR substr(?1, 1, length(path) + 1) = path || '/')
        ORDER BY length(path) DESC
        LIMIT 1
        "#,
        PROJECT_COLUMNS
    ))
    .bind(path)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found_with_id("Project", path.to_string()))
}

/// Look up a project by local ID.
pub async fn get_project(pool: &DbPool, id: i64) -> Result<Project, AppError> {
    sqlx::query_as::<_, Project>(&format!(
        "SELECT {} FROM projects WHERE id = ?",
        PROJECT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found_with_id("Project", id.to_string()))
}

/// All registered projects, in registration order.
pub async fn list_projects(pool: &DbPool) -> Result<Vec<Project>, AppError> {
    let projects = sqlx::query_as::<_, Project>(&format!(
        "SELECT {} FROM projects ORDER BY id ASC",
        PROJECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::{tempdir, TempDir};

    async fn setup_test_db() -> (TempDir, DbPool) {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_register_and_find() {
        let (_dir, pool) = setup_test_db().await;

        let id = register(&pool, &NewProject::new("octo", "hello").with_path("/src/hello"))
            .await
            .unwrap();

        let project = find_by_name(&pool, "octo", "hello").await.unwrap();
        assert_eq!(project.id, id);
        assert_eq!(project.path.as_deref(), Some("/src/hello"));
        assert_eq!(project.full_name(), "octo/hello");
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (_dir, pool) = setup_test_db().await;

        let first = register(&pool, &NewProject::new("octo", "hello").with_path("/one"))
            .await
            .unwrap();
        let second = register(&pool, &NewProject::new("octo", "hello").with_path("/two"))
            .await
            .unwrap();

        assert_eq!(first, second);

        let projects = list_projects(&pool).await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].path.as_deref(), Some("/two"));
    }

    #[tokio::test]
    async fn test_register_keeps_token_when_not_given() {
        let (_dir, pool) = setup_test_db().await;

        register(&pool, &NewProject::new("octo", "hello").with_token("secret"))
            .await
            .unwrap();
        register(&pool, &NewProject::new("octo", "hello").with_path("/src"))
            .await
            .unwrap();

        let project = find_by_name(&pool, "octo", "hello").await.unwrap();
        assert_eq!(project.token.as_deref(), Some("secret"));
        assert_eq!(project.path.as_deref(), Some("/src"));
    }

    #[tokio::test]
    async fn test_find_by_path() {
        let (_dir, pool) = setup_test_db().await;

        register(&pool, &NewProject::new("a", "outer").with_path("/src"))
            .await
            .unwrap();
        register(&pool, &NewProject::new("a", "inner").with_path("/src/inner"))
            .await
            .unwrap();

        let exact = find_by_path(&pool, Path::new("/src")).await.unwrap();
        assert_eq!(exact.repo, "outer");

        let nested = find_by_path(&pool, Path::new("/src/inner/lib")).await.unwrap();
        assert_eq!(nested.repo, "inner");

        // Sibling with a shared prefix must not match
        let err = find_by_path(&pool, Path::new("/srcother")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_find_not_found() {
        let (_dir, pool) = setup_test_db().await;

        let err = find_by_name(&pool, "nobody", "nothing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        let err = get_project(&pool, 42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn test_token_not_serialized() {
        let project = Project {
            id: 1,
            owner: "o".to_string(),
            repo: "r".to_string(),
            path: None,
            token: Some("secret".to_string()),
            database_path: None,
            created_at: 0,
            updated_at: 0,
        };
        let json = serde_json::to_string(&project).unwrap();
        assert!(!json.contains("secret"));
    }
}
