//! Sync processor for pushing cached issues to GitHub.
//!
//! Uploads one issue that is ready to upload and advances its sync state
//! from the outcome. Remote failures are recorded on the issue; only storage
//! failures are returned as errors.

use crate::config::EffectiveProject;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::issue::{self, IssueFields};
use crate::models::sync_state::{SyncEvent, SyncState, SyncStateRecord};
use crate::services::github_client::{
    CreateIssuePayload, CreatedIssue, RemoteIssueSource, UpdateIssuePayload,
};
use crate::services::sync_state;
use serde::Serialize;
use std::time::Instant;

/// Result of processing a single issue.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    /// Local issue ID.
    pub issue_id: i64,
    /// Whether the upload succeeded.
    pub success: bool,
    /// State after processing.
    pub state: SyncState,
    /// Remote issue ID, if known.
    pub github_id: Option<i64>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Duration of the operation in milliseconds.
    pub duration_ms: i64,
}

/// Upload one PENDING_PUSH or PENDING_SYNC issue.
///
/// A PENDING_SYNC issue without a remote number is created rather than
/// updated.
pub async fn process_issue<S: RemoteIssueSource>(
    source: &S,
    pool: &DbPool,
    project: &EffectiveProject,
    record: &SyncStateRecord,
) -> Result<ProcessResult, AppError> {
    let start = Instant::now();
    let issue_id = record.issue_local_id;

    if !record.sync_state.is_ready_to_upload() {
        return Err(AppError::invalid_transition(
            issue_id,
            record.sync_state.as_str(),
            "upload",
        ));
    }

    let cached = {
        let mut conn = pool.acquire().await?;
        issue::get_issue(&mut conn, issue_id).await?
    };
    let fields = cached.fields();

    let result = match cached.number {
        Some(number) if record.sync_state == SyncState::PendingSync => {
            source
                .update_issue(
                    &project.owner,
                    &project.repo,
                    &project.token,
                    number,
                    &UpdateIssuePayload::from_fields(&fields),
                )
                .await
        }
        _ => {
            source
                .create_issue(
                    &project.owner,
                    &project.repo,
                    &project.token,
                    &CreateIssuePayload::from_fields(&fields),
                )
                .await
        }
    };

    let updated = match result {
        Ok(remote) => record_success(pool, record, &remote, &fields).await?,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => record_failure(pool, record, &e).await?,
    };

    Ok(ProcessResult {
        issue_id,
        success: updated.sync_state == SyncState::Synced,
        state: updated.sync_state,
        github_id: updated.github_id,
        error: if updated.sync_state == SyncState::Synced {
            None
        } else {
            updated.sync_error.clone()
        },
        duration_ms: start.elapsed().as_millis() as i64,
    })
}

/// Link the issue to its remote copy and mark it SYNCED.
///
/// The uploaded content becomes the last known remote version.
async fn record_success(
    pool: &DbPool,
    record: &SyncStateRecord,
    remote: &CreatedIssue,
    uploaded: &IssueFields,
) -> Result<SyncStateRecord, AppError> {
    let issue_id = record.issue_local_id;
    let event = match record.sync_state {
        SyncState::PendingPush => SyncEvent::RemoteCreateSucceeded,
        _ => SyncEvent::RemoteUpdateSucceeded,
    };

    let uploaded = IssueFields {
        github_id: Some(remote.id),
        number: Some(remote.number),
        ..uploaded.clone()
    };

    let mut tx = pool.begin().await?;
    issue::attach_remote(&mut tx, issue_id, remote.id, Some(remote.number)).await?;
    issue::record_remote_version(&mut tx, issue_id, &uploaded).await?;
    issue::mark_clean(&mut tx, issue_id).await?;
    let updated = sync_state::apply_event_in(&mut tx, issue_id, event, Some(remote.id), None).await?;
    tx.commit().await?;

    log::debug!("Uploaded issue {} as #{}", issue_id, remote.number);
    Ok(updated)
}

/// Record a failed upload.
///
/// Retryable failures move to PUSH_FAILED/SYNC_FAILED and on to ERROR once
/// the retry limit is reached. Other failures of a create are unrecoverable.
async fn record_failure(
    pool: &DbPool,
    record: &SyncStateRecord,
    error: &AppError,
) -> Result<SyncStateRecord, AppError> {
    let issue_id = record.issue_local_id;
    let message = error.to_string();

    if matches!(error, AppError::Decode { .. }) {
        log::warn!("Upload of issue {} got an undecodable response: {}", issue_id, message);
    } else {
        log::warn!("Upload of issue {} failed: {}", issue_id, message);
    }

    let event = if !error.is_retryable() && record.sync_state == SyncState::PendingPush {
        SyncEvent::Unrecoverable
    } else {
        SyncEvent::RemoteCallFailed
    };

    let mut tx = pool.begin().await?;
    let mut updated = sync_state::apply_event_in(&mut tx, issue_id, event, None, Some(&message)).await?;

    if updated.sync_state != SyncState::Error && updated.retries_exhausted() {
        let final_message = format!(
            "retries exhausted after {} failures: {}",
            updated.retry_count, message
        );
        updated = sync_state::apply_event_in(
            &mut tx,
            issue_id,
            SyncEvent::RetriesExhausted,
            None,
            Some(&final_message),
        )
        .await?;
    }

    tx.commit().await?;
    Ok(updated)
}
