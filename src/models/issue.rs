//! Cached issue model.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqliteConnection};

/// Local copy of a remote issue plus local-only fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Local surrogate ID.
    pub id: i64,

    /// Remote issue ID; `None` until uploaded.
    pub github_id: Option<i64>,

    /// FK to projects.
    pub project_id: i64,

    /// Issue number within the repository; `None` until uploaded.
    pub number: Option<i64>,

    pub title: String,

    pub body: String,

    /// `open` or `closed`, as reported by the remote.
    pub state: String,

    /// Comma-joined label names.
    pub labels: String,

    /// Comma-joined assignee logins.
    pub assignees: String,

    /// Remote-supplied ISO 8601 timestamps.
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub closed_at: Option<String>,

    /// RFC 3339 time of the last local edit.
    pub local_modified_at: Option<String>,

    /// Hash of the last known remote content.
    pub sync_hash: Option<String>,
}

impl Issue {
    pub fn label_list(&self) -> Vec<String> {
        split_list(&self.labels)
    }

    pub fn assignee_list(&self) -> Vec<String> {
        split_list(&self.assignees)
    }

    /// Current content as issue fields.
    pub fn fields(&self) -> IssueFields {
        IssueFields {
            github_id: self.github_id,
            number: self.number,
            title: self.title.clone(),
            body: self.body.clone(),
            state: self.state.clone(),
            labels: self.label_list(),
            assignees: self.assignee_list(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            closed_at: self.closed_at.clone(),
        }
    }
}

/// Issue content as supplied by a remote fetch, an import or a local edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFields {
    pub github_id: Option<i64>,
    pub number: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub closed_at: Option<String>,
}

fn default_state() -> String {
    "open".to_string()
}

impl IssueFields {
    /// A new local issue with just a title.
    pub fn local(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            state: default_state(),
            ..Default::default()
        }
    }

    /// Hash of the user-visible content, used for change detection.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.title.as_str(),
            self.body.as_str(),
            self.state.as_str(),
            &join_list(&self.labels),
            &join_list(&self.assignees),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Partial local edit; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEdit {
    pub title: Option<String>,
    pub body: Option<String>,
    pub state: Option<String>,
    pub labels: Option<Vec<String>>,
    pub assignees: Option<Vec<String>>,
}

impl IssueEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.state.is_none()
            && self.labels.is_none()
            && self.assignees.is_none()
    }
}

/// Join a list into the comma-separated storage form.
pub fn join_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Split the comma-separated storage form.
pub fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

const ISSUE_COLUMNS: &str = "id, github_id, project_id, number, title, body, state, labels, \
     assignees, created_at, updated_at, closed_at, local_modified_at, sync_hash";

/// Get an issue by local ID.
pub async fn get_issue(conn: &mut SqliteConnection, id: i64) -> Result<Issue, AppError> {
    sqlx::query_as::<_, Issue>(&format!("SELECT {} FROM issues WHERE id = ?", ISSUE_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("Issue", id.to_string()))
}

/// Find a cached issue by remote ID within a project.
pub async fn find_by_github_id(
    conn: &mut SqliteConnection,
    project_id: i64,
    github_id: i64,
) -> Result<Option<Issue>, sqlx::Error> {
    sqlx::query_as::<_, Issue>(&format!(
        "SELECT {} FROM issues WHERE project_id = ? AND github_id = ?",
        ISSUE_COLUMNS
    ))
    .bind(project_id)
    .bind(github_id)
    .fetch_optional(&mut *conn)
    .await
}

/// Find a not-yet-uploaded issue with the same title.
pub async fn find_local_match(
    conn: &mut SqliteConnection,
    project_id: i64,
    title: &str,
) -> Result<Option<Issue>, sqlx::Error> {
    sqlx::query_as::<_, Issue>(&format!(
        "SELECT {} FROM issues WHERE project_id = ? AND github_id IS NULL AND title = ? ORDER BY id LIMIT 1",
        ISSUE_COLUMNS
    ))
    .bind(project_id)
    .bind(title)
    .fetch_optional(&mut *conn)
    .await
}

/// All cached issues of a project, by local ID.
pub async fn list_for_project(
    conn: &mut SqliteConnection,
    project_id: i64,
) -> Result<Vec<Issue>, sqlx::Error> {
    sqlx::query_as::<_, Issue>(&format!(
        "SELECT {} FROM issues WHERE project_id = ? ORDER BY id ASC",
        ISSUE_COLUMNS
    ))
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await
}

/// Insert a new issue row. Returns the local ID.
///
/// Rows that carry a remote ID record their content as the last known remote
/// version.
pub async fn insert(
    conn: &mut SqliteConnection,
    project_id: i64,
    fields: &IssueFields,
) -> Result<i64, sqlx::Error> {
    let (sync_hash, remote_snapshot) = match fields.github_id {
        Some(_) => (Some(fields.content_hash()), Some(snapshot(fields)?)),
        None => (None, None),
    };

    sqlx::query_scalar(
        r#"
        INSERT INTO issues (
            github_id, project_id, number, title, body, state, labels, assignees,
            created_at, updated_at, closed_at, sync_hash, remote_snapshot
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(fields.github_id)
    .bind(project_id)
    .bind(fields.number)
    .bind(&fields.title)
    .bind(&fields.body)
    .bind(&fields.state)
    .bind(join_list(&fields.labels))
    .bind(join_list(&fields.assignees))
    .bind(&fields.created_at)
    .bind(&fields.updated_at)
    .bind(&fields.closed_at)
    .bind(sync_hash)
    .bind(remote_snapshot)
    .fetch_one(&mut *conn)
    .await
}

/// Overwrite an issue with remote content and clear its local-edit marker.
///
/// `fields` also becomes the last known remote version.
pub async fn overwrite_from_remote(
    conn: &mut SqliteConnection,
    id: i64,
    fields: &IssueFields,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE issues SET
            github_id = COALESCE(?, github_id),
            number = COALESCE(?, number),
            title = ?,
            body = ?,
            state = ?,
            labels = ?,
            assignees = ?,
            created_at = ?,
            updated_at = ?,
            closed_at = ?,
            local_modified_at = NULL,
            sync_hash = ?,
            remote_snapshot = ?
        WHERE id = ?
        "#,
    )
    .bind(fields.github_id)
    .bind(fields.number)
    .bind(&fields.title)
    .bind(&fields.body)
    .bind(&fields.state)
    .bind(join_list(&fields.labels))
    .bind(join_list(&fields.assignees))
    .bind(&fields.created_at)
    .bind(&fields.updated_at)
    .bind(&fields.closed_at)
    .bind(fields.content_hash())
    .bind(snapshot(fields)?)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Link a local issue to its remote counterpart without touching content.
pub async fn attach_remote(
    conn: &mut SqliteConnection,
    id: i64,
    github_id: i64,
    number: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE issues SET github_id = ?, number = COALESCE(?, number) WHERE id = ?")
        .bind(github_id)
        .bind(number)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Record `remote` as the last known remote version without touching the
/// cached content.
pub async fn record_remote_version(
    conn: &mut SqliteConnection,
    id: i64,
    remote: &IssueFields,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE issues SET sync_hash = ?, remote_snapshot = ? WHERE id = ?")
        .bind(remote.content_hash())
        .bind(snapshot(remote)?)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Replace the cached content with the last known remote version.
///
/// Returns `false`, leaving the row untouched, when no remote version has been
/// recorded.
pub async fn restore_remote_version(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<bool, sqlx::Error> {
    let stored: Option<Option<String>> =
        sqlx::query_scalar("SELECT remote_snapshot FROM issues WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    let Some(raw) = stored.flatten() else {
        return Ok(false);
    };
    let remote: IssueFields =
        serde_json::from_str(&raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    overwrite_from_remote(conn, id, &remote).await?;
    Ok(true)
}

/// Apply a local edit and stamp `local_modified_at`.
pub async fn apply_edit(
    conn: &mut SqliteConnection,
    id: i64,
    edit: &IssueEdit,
    modified_at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE issues SET
            title = COALESCE(?, title),
            body = COALESCE(?, body),
            state = COALESCE(?, state),
            labels = COALESCE(?, labels),
            assignees = COALESCE(?, assignees),
            local_modified_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&edit.title)
    .bind(&edit.body)
    .bind(&edit.state)
    .bind(edit.labels.as_deref().map(join_list))
    .bind(edit.assignees.as_deref().map(join_list))
    .bind(modified_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Clear the local-edit marker.
pub async fn mark_clean(conn: &mut SqliteConnection, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE issues SET local_modified_at = NULL WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

fn snapshot(fields: &IssueFields) -> Result<String, sqlx::Error> {
    serde_json::to_string(fields).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}
