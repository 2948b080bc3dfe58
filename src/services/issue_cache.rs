//! Issue cache operations.
//!
//! Writes that touch an issue row and its sync-state record happen in one
//! transaction, so an issue never exists without its sync state.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::issue::{self, Issue, IssueEdit, IssueFields};
use crate::models::sync_state::{SyncEvent, SyncState, SyncStateRecord};
use crate::services::github_client::RemoteIssue;
use crate::services::sync_state;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Result of reconciling one fetched remote issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// New issue inserted as SYNCED.
    Created,
    /// Cached copy overwritten with remote content.
    Updated,
    /// Local and remote diverged; issue is now CONFLICTED.
    Conflicted,
    /// Remote content matches the last known version.
    Unchanged,
    /// Issue is in a state fetches do not touch.
    Skipped,
}

/// How a conflict is settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Drop local edits and restore the remote version the conflict was raised against.
    AcceptRemote,
    /// Keep local content as an unqueued edit.
    KeepLocal,
    /// Apply a merged edit and queue it for upload.
    Merge(IssueEdit),
}

/// Insert an issue and its sync-state record.
///
/// The initial state follows provenance: SYNCED with a remote id,
/// LOCAL_ONLY without. Imported rows go through here so they are stored
/// exactly like fetched ones.
pub async fn register_issue(
    pool: &DbPool,
    project_id: i64,
    fields: &IssueFields,
) -> Result<i64, AppError> {
    if fields.title.trim().is_empty() {
        return Err(AppError::invalid_input_field("Issue title is empty", "title"));
    }

    let mut tx = pool.begin().await?;

    let id = issue::insert(&mut tx, project_id, fields).await?;
    sync_state::create_in(
        &mut tx,
        id,
        SyncState::initial(fields.github_id.is_some()),
        fields.github_id,
    )
    .await?;

    tx.commit().await?;
    Ok(id)
}

/// Get a cached issue with its sync state.
pub async fn get_issue(pool: &DbPool, issue_id: i64) -> Result<(Issue, SyncStateRecord), AppError> {
    let mut conn = pool.acquire().await?;
    let issue = issue::get_issue(&mut conn, issue_id).await?;
    let record = sync_state::get_in(&mut conn, issue_id).await?;
    Ok((issue, record))
}

/// All cached issues of a project.
pub async fn list_issues(pool: &DbPool, project_id: i64) -> Result<Vec<Issue>, AppError> {
    let mut conn = pool.acquire().await?;
    Ok(issue::list_for_project(&mut conn, project_id).await?)
}

/// Reconcile one fetched remote issue into the cache.
pub async fn apply_remote_issue(
    pool: &DbPool,
    project_id: i64,
    remote: &RemoteIssue,
) -> Result<ApplyOutcome, AppError> {
    let fields = remote.to_fields();
    let remote_hash = fields.content_hash();

    let mut tx = pool.begin().await?;

    let outcome = match issue::find_by_github_id(&mut tx, project_id, remote.id).await? {
        None => {
            let local_match = issue::find_local_match(&mut tx, project_id, &remote.title).await?;
            let local_match = match local_match {
                Some(local) => {
                    let record = sync_state::get_in(&mut tx, local.id).await?;
                    (record.sync_state == SyncState::LocalOnly).then_some(local)
                }
                None => None,
            };

            match local_match {
                Some(local) => {
                    issue::attach_remote(&mut tx, local.id, remote.id, Some(remote.number))
                        .await?;
                    issue::record_remote_version(&mut tx, local.id, &fields).await?;
                    sync_state::apply_event_in(
                        &mut tx,
                        local.id,
                        SyncEvent::RemoteMatchFound,
                        Some(remote.id),
                        None,
                    )
                    .await?;
                    ApplyOutcome::Conflicted
                }
                None => {
                    let id = issue::insert(&mut tx, project_id, &fields).await?;
                    sync_state::create_in(&mut tx, id, SyncState::Synced, Some(remote.id)).await?;
                    ApplyOutcome::Created
                }
            }
        }
        Some(cached) => {
            let record = sync_state::get_in(&mut tx, cached.id).await?;

            if cached.sync_hash.as_deref() == Some(remote_hash.as_str()) {
                ApplyOutcome::Unchanged
            } else {
                let divergence = match record.sync_state {
                    SyncState::Synced if cached.local_modified_at.is_none() => None,
                    SyncState::Synced | SyncState::LocalModified => Some(SyncEvent::RemoteDiverged),
                    SyncState::PendingSync => Some(SyncEvent::RemoteChangedConcurrently),
                    _ => {
                        log::debug!(
                            "Skipping remote change for issue {} in state {}",
                            cached.id,
                            record.sync_state
                        );
                        tx.commit().await?;
                        return Ok(ApplyOutcome::Skipped);
                    }
                };

                match divergence {
                    None => {
                        issue::overwrite_from_remote(&mut tx, cached.id, &fields).await?;
                        ApplyOutcome::Updated
                    }
                    Some(event) => {
                        // Remember the remote version the conflict was raised against
                        issue::record_remote_version(&mut tx, cached.id, &fields).await?;
                        sync_state::apply_event_in(&mut tx, cached.id, event, None, None).await?;
                        ApplyOutcome::Conflicted
                    }
                }
            }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Apply a local edit to a cached issue.
///
/// SYNCED and PENDING_PUSH issues move to LOCAL_MODIFIED; other states
/// keep their state and carry the new content.
pub async fn record_local_edit(
    pool: &DbPool,
    issue_id: i64,
    edit: &IssueEdit,
) -> Result<SyncStateRecord, AppError> {
    if edit.is_empty() {
        return Err(AppError::invalid_input_field("Edit changes nothing", "edit"));
    }
    if edit.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::invalid_input_field("Issue title is empty", "title"));
    }

    let mut tx = pool.begin().await?;

    let record = sync_state::get_in(&mut tx, issue_id).await?;
    issue::apply_edit(&mut tx, issue_id, edit, &chrono::Utc::now().to_rfc3339()).await?;

    let record = if record.sync_state.apply(SyncEvent::LocalEdit).is_some() {
        sync_state::apply_event_in(&mut tx, issue_id, SyncEvent::LocalEdit, None, None).await?
    } else {
        record
    };

    tx.commit().await?;
    Ok(record)
}

/// Drop local edits of an uploaded issue.
///
/// The cached content is restored to the last known remote version.
pub async fn discard_local_edits(
    pool: &DbPool,
    issue_id: i64,
) -> Result<SyncStateRecord, AppError> {
    let mut tx = pool.begin().await?;

    let cached = issue::get_issue(&mut tx, issue_id).await?;
    if cached.github_id.is_none() {
        return Err(AppError::invalid_input_field(
            "Issue was never uploaded; there is no remote version to return to",
            "issue_id",
        ));
    }

    let record =
        sync_state::apply_event_in(&mut tx, issue_id, SyncEvent::DiscardLocalEdits, None, None)
            .await?;
    restore_remote_version(&mut tx, issue_id).await?;

    tx.commit().await?;
    Ok(record)
}

/// Settle a CONFLICTED issue.
pub async fn resolve_conflict(
    pool: &DbPool,
    issue_id: i64,
    resolution: &Resolution,
) -> Result<SyncStateRecord, AppError> {
    let mut tx = pool.begin().await?;
    let modified_at = chrono::Utc::now().to_rfc3339();

    let record = match resolution {
        Resolution::AcceptRemote => {
            let record =
                sync_state::apply_event_in(&mut tx, issue_id, SyncEvent::AcceptRemote, None, None)
                    .await?;
            restore_remote_version(&mut tx, issue_id).await?;
            record
        }
        Resolution::KeepLocal => {
            let record =
                sync_state::apply_event_in(&mut tx, issue_id, SyncEvent::KeepLocal, None, None)
                    .await?;
            issue::apply_edit(&mut tx, issue_id, &IssueEdit::default(), &modified_at).await?;
            record
        }
        Resolution::Merge(merged) => {
            let record = sync_state::apply_event_in(
                &mut tx,
                issue_id,
                SyncEvent::MergeAndReupload,
                None,
                None,
            )
            .await?;
            issue::apply_edit(&mut tx, issue_id, merged, &modified_at).await?;
            record
        }
    };

    tx.commit().await?;

    log::info!("Resolved conflict on issue {} ({:?})", issue_id, resolution);
    Ok(record)
}

async fn restore_remote_version(
    conn: &mut SqliteConnection,
    issue_id: i64,
) -> Result<(), AppError> {
    if !issue::restore_remote_version(conn, issue_id).await? {
        return Err(AppError::invalid_input_field(
            "No remote version recorded for this issue; sync it first",
            "issue_id",
        ));
    }
    Ok(())
}

/// Record that a conflict could not be resolved. Moves the issue to ERROR.
pub async fn fail_resolution(
    pool: &DbPool,
    issue_id: i64,
    error: &str,
) -> Result<SyncStateRecord, AppError> {
    sync_state::apply_event(pool, issue_id, SyncEvent::ResolutionFailed, None, Some(error)).await
}
