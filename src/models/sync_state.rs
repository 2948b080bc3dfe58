//! Per-issue sync state and its transition table.
//!
//! The legal transitions are data ([`TRANSITIONS`]), not nested conditionals,
//! so the whole table can be iterated in tests.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Relationship between a cached issue and the remote source of truth.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Created locally, never uploaded.
    LocalOnly,
    /// Queued for creation on the remote.
    PendingPush,
    /// Remote create failed; may be retried.
    PushFailed,
    /// Local copy matches the last known remote version.
    Synced,
    /// Edited locally since the last sync.
    LocalModified,
    /// Local edits queued for upload.
    PendingSync,
    /// Remote update failed; may be retried.
    SyncFailed,
    /// Local and remote diverged; needs a human decision.
    Conflicted,
    /// Terminal. Requires operator intervention.
    Error,
}

impl SyncState {
    /// All states, in declaration order.
    pub const ALL: [SyncState; 9] = [
        Self::LocalOnly,
        Self::PendingPush,
        Self::PushFailed,
        Self::Synced,
        Self::LocalModified,
        Self::PendingSync,
        Self::SyncFailed,
        Self::Conflicted,
        Self::Error,
    ];

    /// Initial state chosen from an issue's provenance.
    pub fn initial(has_remote_id: bool) -> Self {
        if has_remote_id {
            Self::Synced
        } else {
            Self::LocalOnly
        }
    }

    /// Target state for `event`, if the table defines one.
    pub fn apply(self, event: SyncEvent) -> Option<SyncState> {
        TRANSITIONS
            .iter()
            .find(|(from, ev, _)| *from == self && *ev == event)
            .map(|(_, _, to)| *to)
    }

    /// Whether any event leads from `self` to `to`.
    pub fn can_transition_to(self, to: SyncState) -> bool {
        TRANSITIONS
            .iter()
            .any(|(from, _, target)| *from == self && *target == to)
    }

    /// No automatic transitions leave this state.
    pub fn is_terminal(self) -> bool {
        self == Self::Error
    }

    /// Entering this state records an error and bumps the retry counter.
    pub fn records_error(self) -> bool {
        matches!(self, Self::PushFailed | Self::SyncFailed | Self::Error)
    }

    /// Entering this state stamps the last sync attempt time.
    pub fn stamps_attempt(self) -> bool {
        matches!(
            self,
            Self::PendingPush | Self::PendingSync | Self::PushFailed | Self::SyncFailed
        )
    }

    /// Issues in this state are waiting to be uploaded.
    pub fn is_ready_to_upload(self) -> bool {
        matches!(self, Self::PendingPush | Self::PendingSync)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalOnly => "LOCAL_ONLY",
            Self::PendingPush => "PENDING_PUSH",
            Self::PushFailed => "PUSH_FAILED",
            Self::Synced => "SYNCED",
            Self::LocalModified => "LOCAL_MODIFIED",
            Self::PendingSync => "PENDING_SYNC",
            Self::SyncFailed => "SYNC_FAILED",
            Self::Conflicted => "CONFLICTED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == upper)
            .ok_or_else(|| format!("unknown sync state: {}", s))
    }
}

/// Triggers that move an issue between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEvent {
    /// User asked to upload the issue or its edits.
    RequestUpload,
    /// A fetched remote issue matches a local-only issue.
    RemoteMatchFound,
    /// Remote create call succeeded.
    RemoteCreateSucceeded,
    /// Issue edited locally.
    LocalEdit,
    /// Remote create/update call errored.
    RemoteCallFailed,
    /// Failure no retry can fix (e.g. rejected credentials).
    Unrecoverable,
    RetryRequested,
    RetryAbandoned,
    RetriesExhausted,
    /// Fetch shows a remote edit that diverges from local state.
    RemoteDiverged,
    DiscardLocalEdits,
    /// Remote update call succeeded.
    RemoteUpdateSucceeded,
    /// Remote changed while an upload was pending.
    RemoteChangedConcurrently,
    SyncCancelled,
    /// Conflict resolved in favour of the remote version.
    AcceptRemote,
    /// Conflict resolved in favour of the local version.
    KeepLocal,
    /// Conflict resolved by merging and re-uploading.
    MergeAndReupload,
    ResolutionFailed,
}

use SyncEvent as E;
use SyncState as S;

/// Every legal `(from, event, to)` transition.
pub const TRANSITIONS: &[(SyncState, SyncEvent, SyncState)] = &[
    (S::LocalOnly, E::RequestUpload, S::PendingPush),
    (S::LocalOnly, E::RemoteMatchFound, S::Conflicted),
    (S::PendingPush, E::RemoteCreateSucceeded, S::Synced),
    (S::PendingPush, E::LocalEdit, S::LocalModified),
    (S::PendingPush, E::RemoteCallFailed, S::PushFailed),
    (S::PendingPush, E::Unrecoverable, S::Error),
    (S::PushFailed, E::RetryRequested, S::PendingPush),
    (S::PushFailed, E::RetryAbandoned, S::LocalOnly),
    (S::PushFailed, E::RetriesExhausted, S::Error),
    (S::Synced, E::LocalEdit, S::LocalModified),
    (S::Synced, E::RemoteDiverged, S::Conflicted),
    (S::Synced, E::Unrecoverable, S::Error),
    (S::LocalModified, E::RequestUpload, S::PendingSync),
    (S::LocalModified, E::RemoteDiverged, S::Conflicted),
    (S::LocalModified, E::DiscardLocalEdits, S::Synced),
    (S::PendingSync, E::RemoteUpdateSucceeded, S::Synced),
    (S::PendingSync, E::RemoteCallFailed, S::SyncFailed),
    (S::PendingSync, E::RemoteChangedConcurrently, S::Conflicted),
    (S::PendingSync, E::SyncCancelled, S::LocalModified),
    (S::SyncFailed, E::RetryRequested, S::PendingSync),
    (S::SyncFailed, E::RetryAbandoned, S::LocalModified),
    (S::SyncFailed, E::RetriesExhausted, S::Error),
    (S::Conflicted, E::AcceptRemote, S::Synced),
    (S::Conflicted, E::KeepLocal, S::LocalModified),
    (S::Conflicted, E::MergeAndReupload, S::PendingSync),
    (S::Conflicted, E::ResolutionFailed, S::Error),
];

/// The states reachable in one step from `state`, listed edge by edge
/// independently of [`TRANSITIONS`] for table checks.
#[cfg(test)]
pub(crate) fn expected_exits(state: SyncState) -> &'static [SyncState] {
    match state {
        S::LocalOnly => &[S::PendingPush, S::Conflicted],
        S::PendingPush => &[S::Synced, S::LocalModified, S::PushFailed, S::Error],
        S::PushFailed => &[S::PendingPush, S::LocalOnly, S::Error],
        S::Synced => &[S::LocalModified, S::Conflicted, S::Error],
        S::LocalModified => &[S::PendingSync, S::Conflicted, S::Synced],
        S::PendingSync => &[S::Synced, S::SyncFailed, S::Conflicted, S::LocalModified],
        S::SyncFailed => &[S::PendingSync, S::LocalModified, S::Error],
        S::Conflicted => &[S::Synced, S::LocalModified, S::PendingSync, S::Error],
        S::Error => &[],
    }
}

/// Sync bookkeeping for one cached issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SyncStateRecord {
    /// Local issue ID (FK to issues).
    pub issue_local_id: i64,

    pub sync_state: SyncState,

    /// Remote issue ID once known; never cleared.
    pub github_id: Option<i64>,

    /// Last error message (optional).
    pub sync_error: Option<String>,

    /// Lifetime failure count; only ever increases.
    pub retry_count: i64,

    /// Last upload attempt (Unix, optional).
    pub last_sync_attempt: Option<i64>,

    /// When this record last changed (Unix).
    pub updated_at: i64,
}

impl SyncStateRecord {
    /// Maximum failed attempts before a failure becomes terminal.
    pub const MAX_RETRIES: i64 = 5;

    /// Check if the record is a failed upload that may be retried.
    pub fn can_retry(&self) -> bool {
        matches!(self.sync_state, SyncState::PushFailed | SyncState::SyncFailed)
            && self.retry_count < Self::MAX_RETRIES
    }

    /// Check if retries are used up.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= Self::MAX_RETRIES
    }
}
