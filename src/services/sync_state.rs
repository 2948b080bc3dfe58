//! Sync state persistence service.
//!
//! Stores one [`SyncStateRecord`] per cached issue and moves it through the
//! transition table. Every change runs in one transaction: the state, retry
//! counter, error and attempt timestamp are written together or not at all.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::sync_state::{SyncEvent, SyncState, SyncStateRecord};
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Error recorded when a failure transition is requested without a message.
const UNKNOWN_ERROR: &str = "unknown error";

const RECORD_COLUMNS: &str =
    "issue_local_id, sync_state, github_id, sync_error, retry_count, last_sync_attempt, updated_at";

/// Get the current Unix timestamp.
pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Create the sync-state record for a newly cached issue.
pub async fn create(
    pool: &DbPool,
    issue_id: i64,
    initial_state: SyncState,
    remote_id: Option<i64>,
) -> Result<(), AppError> {
    let mut conn = pool.acquire().await?;
    create_in(&mut conn, issue_id, initial_state, remote_id).await?;
    Ok(())
}

/// [`create`] on an existing connection or transaction.
pub async fn create_in(
    conn: &mut SqliteConnection,
    issue_id: i64,
    initial_state: SyncState,
    remote_id: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO issue_sync_state (issue_local_id, sync_state, github_id, retry_count, updated_at)
        VALUES (?, ?, ?, 0, ?)
        "#,
    )
    .bind(issue_id)
    .bind(initial_state.as_str())
    .bind(remote_id)
    .bind(now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get the sync-state record of an issue.
pub async fn get(pool: &DbPool, issue_id: i64) -> Result<SyncStateRecord, AppError> {
    let mut conn = pool.acquire().await?;
    get_in(&mut conn, issue_id).await
}

/// [`get`] on an existing connection or transaction.
pub async fn get_in(
    conn: &mut SqliteConnection,
    issue_id: i64,
) -> Result<SyncStateRecord, AppError> {
    sqlx::query_as::<_, SyncStateRecord>(&format!(
        "SELECT {} FROM issue_sync_state WHERE issue_local_id = ?",
        RECORD_COLUMNS
    ))
    .bind(issue_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found_with_id("SyncState", issue_id.to_string()))
}

/// Move an issue to `new_state`.
///
/// Rejects transitions missing from the table with
/// [`AppError::InvalidTransition`] and leaves the record unchanged.
/// Returns the updated record.
pub async fn update(
    pool: &DbPool,
    issue_id: i64,
    new_state: SyncState,
    remote_id: Option<i64>,
    error: Option<&str>,
) -> Result<SyncStateRecord, AppError> {
    let mut tx = pool.begin().await?;
    let record = update_in(&mut tx, issue_id, new_state, remote_id, error).await?;
    tx.commit().await?;
    Ok(record)
}

/// [`update`] inside a caller-owned transaction.
pub async fn update_in(
    conn: &mut SqliteConnection,
    issue_id: i64,
    new_state: SyncState,
    remote_id: Option<i64>,
    error: Option<&str>,
) -> Result<SyncStateRecord, AppError> {
    let current = get_in(conn, issue_id).await?;

    if !current.sync_state.can_transition_to(new_state) {
        return Err(AppError::invalid_transition(
            issue_id,
            current.sync_state.as_str(),
            new_state.as_str(),
        ));
    }

    write_transition(conn, &current, new_state, remote_id, error).await?;

    log::debug!(
        "Issue {}: {} -> {}",
        issue_id,
        current.sync_state,
        new_state
    );

    get_in(conn, issue_id).await
}

/// Apply `event` to an issue's current state.
pub async fn apply_event(
    pool: &DbPool,
    issue_id: i64,
    event: SyncEvent,
    remote_id: Option<i64>,
    error: Option<&str>,
) -> Result<SyncStateRecord, AppError> {
    let mut tx = pool.begin().await?;
    let record = apply_event_in(&mut tx, issue_id, event, remote_id, error).await?;
    tx.commit().await?;
    Ok(record)
}

/// [`apply_event`] inside a caller-owned transaction.
pub async fn apply_event_in(
    conn: &mut SqliteConnection,
    issue_id: i64,
    event: SyncEvent,
    remote_id: Option<i64>,
    error: Option<&str>,
) -> Result<SyncStateRecord, AppError> {
    let current = get_in(conn, issue_id).await?;

    let Some(new_state) = current.sync_state.apply(event) else {
        return Err(AppError::invalid_transition(
            issue_id,
            current.sync_state.as_str(),
            format!("{:?}", event),
        ));
    };

    write_transition(conn, &current, new_state, remote_id, error).await?;

    log::debug!(
        "Issue {}: {} -> {} ({:?})",
        issue_id,
        current.sync_state,
        new_state,
        event
    );

    get_in(conn, issue_id).await
}

/// Write one validated transition.
///
/// The `sync_state = ?` guard makes a concurrent change surface as an
/// invalid transition instead of being overwritten.
async fn write_transition(
    conn: &mut SqliteConnection,
    current: &SyncStateRecord,
    new_state: SyncState,
    remote_id: Option<i64>,
    error: Option<&str>,
) -> Result<(), AppError> {
    let timestamp = now();
    let records_error = new_state.records_error();

    let error_value = if records_error {
        Some(error.unwrap_or(UNKNOWN_ERROR))
    } else {
        error
    };
    let clear_error = new_state == SyncState::Synced;

    let result = sqlx::query(
        r#"
        UPDATE issue_sync_state SET
            sync_state = ?,
            github_id = COALESCE(?, github_id),
            sync_error = CASE WHEN ? THEN NULL ELSE COALESCE(?, sync_error) END,
            retry_count = retry_count + ?,
            last_sync_attempt = CASE
                WHEN ? THEN MAX(COALESCE(last_sync_attempt, 0), ?)
                ELSE last_sync_attempt
            END,
            updated_at = ?
        WHERE issue_local_id = ? AND sync_state = ?
        "#,
    )
    .bind(new_state.as_str())
    .bind(remote_id)
    .bind(clear_error)
    .bind(error_value)
    .bind(if records_error { 1i64 } else { 0 })
    .bind(new_state.stamps_attempt())
    .bind(timestamp)
    .bind(timestamp)
    .bind(current.issue_local_id)
    .bind(current.sync_state.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::invalid_transition(
            current.issue_local_id,
            current.sync_state.as_str(),
            new_state.as_str(),
        ));
    }

    Ok(())
}

/// All records in `state`, oldest attempt first.
pub async fn list_by_state(
    pool: &DbPool,
    state: SyncState,
) -> Result<Vec<SyncStateRecord>, AppError> {
    let records = sqlx::query_as::<_, SyncStateRecord>(&format!(
        r#"
        SELECT {} FROM issue_sync_state
        WHERE sync_state = ?
        ORDER BY COALESCE(last_sync_attempt, 0) ASC, issue_local_id ASC
        "#,
        RECORD_COLUMNS
    ))
    .bind(state.as_str())
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Records of one project's issues in any of `states`, oldest attempt first.
pub async fn list_for_project(
    pool: &DbPool,
    project_id: i64,
    states: &[SyncState],
) -> Result<Vec<SyncStateRecord>, AppError> {
    if states.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; states.len()].join(", ");
    let sql = format!(
        r#"
        SELECT s.issue_local_id, s.sync_state, s.github_id, s.sync_error, s.retry_count,
               s.last_sync_attempt, s.updated_at
        FROM issue_sync_state s
        JOIN issues i ON i.id = s.issue_local_id
        WHERE i.project_id = ? AND s.sync_state IN ({})
        ORDER BY COALESCE(s.last_sync_attempt, 0) ASC, s.issue_local_id ASC
        "#,
        placeholders
    );

    let mut query = sqlx::query_as::<_, SyncStateRecord>(&sql).bind(project_id);
    for state in states {
        query = query.bind(state.as_str());
    }

    Ok(query.fetch_all(pool).await?)
}

/// Count of records per state. Every state is present, zeros included.
pub async fn summary(pool: &DbPool) -> Result<BTreeMap<SyncState, i64>, AppError> {
    let rows = sqlx::query(
        "SELECT sync_state, COUNT(*) AS count FROM issue_sync_state GROUP BY sync_state",
    )
    .fetch_all(pool)
    .await?;

    collect_counts(rows)
}

/// [`summary`] restricted to one project.
pub async fn summary_for_project(
    pool: &DbPool,
    project_id: i64,
) -> Result<BTreeMap<SyncState, i64>, AppError> {
    let rows = sqlx::query(
        r#"
        SELECT s.sync_state, COUNT(*) AS count
        FROM issue_sync_state s
        JOIN issues i ON i.id = s.issue_local_id
        WHERE i.project_id = ?
        GROUP BY s.sync_state
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    collect_counts(rows)
}

fn collect_counts(
    rows: Vec<sqlx::sqlite::SqliteRow>,
) -> Result<BTreeMap<SyncState, i64>, AppError> {
    let mut counts: BTreeMap<SyncState, i64> =
        SyncState::ALL.iter().map(|state| (*state, 0)).collect();

    for row in rows {
        let name: String = row.try_get("sync_state")?;
        let count: i64 = row.try_get("count")?;
        match name.parse::<SyncState>() {
            Ok(state) => *counts.entry(state).or_insert(0) += count,
            Err(e) => log::warn!("Skipping sync state row: {}", e),
        }
    }

    Ok(counts)
}

/// Queue a local-only or locally modified issue for upload.
pub async fn request_upload(pool: &DbPool, issue_id: i64) -> Result<SyncStateRecord, AppError> {
    apply_event(pool, issue_id, SyncEvent::RequestUpload, None, None).await
}

/// Take a pending upload of edits back out of the queue.
pub async fn cancel_sync(pool: &DbPool, issue_id: i64) -> Result<SyncStateRecord, AppError> {
    apply_event(pool, issue_id, SyncEvent::SyncCancelled, None, None).await
}

/// Requeue a failed upload.
///
/// A record whose retries are used up moves to ERROR instead.
pub async fn retry_failed(pool: &DbPool, issue_id: i64) -> Result<SyncStateRecord, AppError> {
    let mut tx = pool.begin().await?;
    let current = get_in(&mut tx, issue_id).await?;

    let record = if current.retries_exhausted() {
        let message = format!(
            "retries exhausted after {} failures: {}",
            current.retry_count,
            current.sync_error.as_deref().unwrap_or(UNKNOWN_ERROR)
        );
        apply_event_in(
            &mut tx,
            issue_id,
            SyncEvent::RetriesExhausted,
            None,
            Some(&message),
        )
        .await?
    } else {
        apply_event_in(&mut tx, issue_id, SyncEvent::RetryRequested, None, None).await?
    };

    tx.commit().await?;
    Ok(record)
}

/// Give up on a failed upload and return the issue to its unqueued state.
pub async fn abandon_retry(pool: &DbPool, issue_id: i64) -> Result<SyncStateRecord, AppError> {
    apply_event(pool, issue_id, SyncEvent::RetryAbandoned, None, None).await
}
