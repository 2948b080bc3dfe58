//! Sync engine for GitHub issue mirroring.
//!
//! This module provides the operations an outer layer (CLI, service) calls:
//! - `sync`: fetch remote issues for each selected project and reconcile them
//! - `push`: upload issues that are ready to upload, oldest attempt first
//! - `status`: per-project sync-state counts, optionally with problem issues
//!
//! Projects are processed one at a time. A credential or network failure is
//! reported for its project and the run moves on; configuration and storage
//! failures abort the run.
//!
//! Only `sync` and a real `push` register projects or carry over issues from
//! a legacy single-project store. `status` and a dry-run `push` only read.

use crate::config::{Config, EffectiveProject};
use crate::db::pool::DbPool;
use crate::db::{self, StoreSet};
use crate::error::AppError;
use crate::models::issue;
use crate::models::project::{self, NewProject};
use crate::models::sync_state::{SyncState, SyncStateRecord};
use crate::services::credentials::CredentialService;
use crate::services::github_client::RemoteIssueSource;
use crate::services::issue_cache::{self, ApplyOutcome};
use crate::services::sync_processor::{self, ProcessResult};
use crate::services::sync_state;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

/// States `push` picks up.
const PUSHABLE_STATES: [SyncState; 4] = [
    SyncState::PendingPush,
    SyncState::PendingSync,
    SyncState::PushFailed,
    SyncState::SyncFailed,
];

/// Outcome of syncing one project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectSyncReport {
    /// `owner/repo`.
    pub project: String,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub conflicted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Why the project was not synced.
    pub error: Option<String>,
}

impl ProjectSyncReport {
    fn new(project: &EffectiveProject) -> Self {
        Self {
            project: project.full_name(),
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Conflicted => self.conflicted += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
            ApplyOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Result of a sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub projects: Vec<ProjectSyncReport>,
    pub duration_ms: i64,
}

impl SyncSummary {
    /// Projects that reported an error.
    pub fn failed_projects(&self) -> impl Iterator<Item = &ProjectSyncReport> {
        self.projects.iter().filter(|p| p.error.is_some())
    }

    pub fn total_conflicts(&self) -> usize {
        self.projects.iter().map(|p| p.conflicted).sum()
    }
}

/// An upload `push` would perform.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedPush {
    pub issue_id: i64,
    pub title: String,
    pub state: SyncState,
    /// `create` or `update`.
    pub action: &'static str,
}

/// Outcome of pushing one project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectPushReport {
    /// `owner/repo`.
    pub project: String,
    /// Uploads selected for this run.
    pub planned: Vec<PlannedPush>,
    /// Per-issue results; empty on a dry run.
    pub results: Vec<ProcessResult>,
    /// Why the project was not pushed.
    pub error: Option<String>,
}

/// Result of a push run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PushSummary {
    pub dry_run: bool,
    pub projects: Vec<ProjectPushReport>,
    pub duration_ms: i64,
}

impl PushSummary {
    pub fn pushed(&self) -> usize {
        self.results().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results().filter(|r| !r.success).count()
    }

    pub fn planned(&self) -> usize {
        self.projects.iter().map(|p| p.planned.len()).sum()
    }

    fn results(&self) -> impl Iterator<Item = &ProcessResult> {
        self.projects.iter().flat_map(|p| p.results.iter())
    }
}

/// An issue that is not SYNCED, for verbose status.
#[derive(Debug, Clone, Serialize)]
pub struct IssueStatus {
    pub issue_id: i64,
    pub number: Option<i64>,
    pub title: String,
    pub state: SyncState,
    pub sync_error: Option<String>,
    pub retry_count: i64,
    pub last_sync_attempt: Option<i64>,
}

/// Sync status of one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    /// `owner/repo`.
    pub project: String,
    pub database: String,
    pub counts: BTreeMap<SyncState, i64>,
    /// Non-SYNCED issues; only filled in verbose mode.
    pub issues: Vec<IssueStatus>,
}

/// Result of a status query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSummary {
    pub projects: Vec<ProjectStatus>,
}

impl StatusSummary {
    /// Counts summed over all projects. Every state is present.
    pub fn totals(&self) -> BTreeMap<SyncState, i64> {
        let mut totals: BTreeMap<SyncState, i64> =
            SyncState::ALL.iter().map(|state| (*state, 0)).collect();
        for project in &self.projects {
            for (state, count) in &project.counts {
                *totals.entry(*state).or_insert(0) += count;
            }
        }
        totals
    }
}

/// Sync engine over a resolved configuration and a remote issue source.
pub struct SyncEngine<S: RemoteIssueSource> {
    config: Config,
    source: S,
}

impl<S: RemoteIssueSource> SyncEngine<S> {
    pub fn new(config: Config, source: S) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and reconcile remote issues for the selected projects.
    ///
    /// `project_filter` matches `owner/repo` or a bare repository name.
    pub async fn sync(&self, project_filter: Option<&str>) -> Result<SyncSummary, AppError> {
        let start = Instant::now();
        let projects = self.config.select_projects(project_filter)?;

        let mut stores = StoreSet::new();
        let result = self.sync_projects(&mut stores, &projects).await;
        stores.close().await;
        let reports = result?;

        Ok(SyncSummary {
            projects: reports,
            duration_ms: start.elapsed().as_millis() as i64,
        })
    }

    async fn sync_projects(
        &self,
        stores: &mut StoreSet,
        projects: &[EffectiveProject],
    ) -> Result<Vec<ProjectSyncReport>, AppError> {
        let mut reports = Vec::with_capacity(projects.len());

        for project in projects {
            let mut report = ProjectSyncReport::new(project);
            match self.sync_project(stores, project, &mut report).await {
                Ok(()) => log::info!(
                    "Synced {}: {} fetched, {} created, {} updated, {} conflicted",
                    report.project,
                    report.fetched,
                    report.created,
                    report.updated,
                    report.conflicted
                ),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("Sync of {} failed: {}", report.project, e);
                    report.error = Some(e.to_string());
                }
            }
            reports.push(report);
        }

        Ok(reports)
    }

    async fn sync_project(
        &self,
        stores: &mut StoreSet,
        project: &EffectiveProject,
        report: &mut ProjectSyncReport,
    ) -> Result<(), AppError> {
        let carry_legacy = self.config.is_legacy_project(project);
        let (pool, project_id) = open_project(stores, project, carry_legacy).await?;

        CredentialService::ensure_credentials(
            &self.source,
            &project.owner,
            &project.repo,
            &project.token,
        )
        .await?;

        let remote_issues = self
            .source
            .list_issues(&project.owner, &project.repo, &project.token)
            .await?;

        for remote in remote_issues.iter().filter(|r| !r.is_pull_request()) {
            report.fetched += 1;
            let outcome = issue_cache::apply_remote_issue(&pool, project_id, remote).await?;
            if outcome == ApplyOutcome::Conflicted {
                log::info!(
                    "Issue #{} of {} conflicts with local changes",
                    remote.number,
                    report.project
                );
            }
            report.record(outcome);
        }

        Ok(())
    }

    /// Upload issues that are ready to upload, across all projects.
    ///
    /// Failed uploads that still have retries left are requeued first. At most
    /// `limit` issues are selected. A dry run makes no remote calls and no
    /// state changes.
    pub async fn push(&self, limit: Option<usize>, dry_run: bool) -> Result<PushSummary, AppError> {
        let start = Instant::now();
        let projects = self.config.select_projects(None)?;

        let mut stores = StoreSet::new();
        let result = self.push_projects(&mut stores, &projects, limit, dry_run).await;
        stores.close().await;
        let reports = result?;

        Ok(PushSummary {
            dry_run,
            projects: reports,
            duration_ms: start.elapsed().as_millis() as i64,
        })
    }

    async fn push_projects(
        &self,
        stores: &mut StoreSet,
        projects: &[EffectiveProject],
        limit: Option<usize>,
        dry_run: bool,
    ) -> Result<Vec<ProjectPushReport>, AppError> {
        let mut remaining = limit.unwrap_or(usize::MAX);
        let mut reports = Vec::with_capacity(projects.len());

        for project in projects {
            let mut report = ProjectPushReport {
                project: project.full_name(),
                ..Default::default()
            };

            match self
                .push_project(stores, project, &mut remaining, dry_run, &mut report)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("Push of {} failed: {}", report.project, e);
                    report.error = Some(e.to_string());
                }
            }
            reports.push(report);
        }

        Ok(reports)
    }

    async fn push_project(
        &self,
        stores: &mut StoreSet,
        project: &EffectiveProject,
        remaining: &mut usize,
        dry_run: bool,
        report: &mut ProjectPushReport,
    ) -> Result<(), AppError> {
        if *remaining == 0 {
            return Ok(());
        }

        let (pool, project_id) = if dry_run {
            match find_project(stores, project).await? {
                (pool, Some(project_id)) => (pool, project_id),
                (_, None) => return Ok(()),
            }
        } else {
            let carry_legacy = self.config.is_legacy_project(project);
            open_project(stores, project, carry_legacy).await?
        };

        let candidates: Vec<SyncStateRecord> =
            sync_state::list_for_project(&pool, project_id, &PUSHABLE_STATES)
                .await?
                .into_iter()
                .filter(|r| r.sync_state.is_ready_to_upload() || r.can_retry())
                .take(*remaining)
                .collect();

        if candidates.is_empty() {
            return Ok(());
        }
        *remaining -= candidates.len();

        let mut conn = pool.acquire().await?;
        for record in &candidates {
            let cached = issue::get_issue(&mut conn, record.issue_local_id).await?;
            let update = cached.number.is_some()
                && matches!(
                    record.sync_state,
                    SyncState::PendingSync | SyncState::SyncFailed
                );
            report.planned.push(PlannedPush {
                issue_id: record.issue_local_id,
                title: cached.title,
                state: record.sync_state,
                action: if update { "update" } else { "create" },
            });
        }
        drop(conn);

        if dry_run {
            return Ok(());
        }

        CredentialService::ensure_credentials(
            &self.source,
            &project.owner,
            &project.repo,
            &project.token,
        )
        .await?;

        for record in candidates {
            let record = if record.sync_state.is_ready_to_upload() {
                record
            } else {
                sync_state::retry_failed(&pool, record.issue_local_id).await?
            };

            if !record.sync_state.is_ready_to_upload() {
                continue;
            }

            let result =
                sync_processor::process_issue(&self.source, &pool, project, &record).await?;
            report.results.push(result);
        }

        log::info!(
            "Pushed {}: {} of {} uploaded",
            report.project,
            report.results.iter().filter(|r| r.success).count(),
            report.results.len()
        );

        Ok(())
    }

    /// Per-project sync-state counts. Makes no remote calls and no changes;
    /// a project that was never synced reports zero counts.
    ///
    /// With `verbose`, every non-SYNCED issue is listed with its last error.
    pub async fn status(&self, verbose: bool) -> Result<StatusSummary, AppError> {
        let projects = self.config.select_projects(None)?;

        let mut stores = StoreSet::new();
        let result = status_projects(&mut stores, &projects, verbose).await;
        stores.close().await;
        let statuses = result?;

        Ok(StatusSummary { projects: statuses })
    }
}

async fn status_projects(
    stores: &mut StoreSet,
    projects: &[EffectiveProject],
    verbose: bool,
) -> Result<Vec<ProjectStatus>, AppError> {
    let mut statuses = Vec::with_capacity(projects.len());

    for project in projects {
        let (counts, issues) = match find_project(stores, project).await? {
            (pool, Some(project_id)) => {
                let counts = sync_state::summary_for_project(&pool, project_id).await?;
                let issues = if verbose {
                    problem_issues(&pool, project_id).await?
                } else {
                    Vec::new()
                };
                (counts, issues)
            }
            // Never synced
            (_, None) => (
                SyncState::ALL.iter().map(|state| (*state, 0)).collect(),
                Vec::new(),
            ),
        };

        statuses.push(ProjectStatus {
            project: project.full_name(),
            database: project.database.display().to_string(),
            counts,
            issues,
        });
    }

    Ok(statuses)
}

/// Open a project's database and register the project.
///
/// With `carry_legacy`, issues of a legacy single-project store in the same
/// database are carried over into this project first.
async fn open_project(
    stores: &mut StoreSet,
    project: &EffectiveProject,
    carry_legacy: bool,
) -> Result<(DbPool, i64), AppError> {
    let pool = stores.open(&project.database).await?;

    let registration = NewProject::new(&project.owner, &project.repo)
        .with_path(project.path.display().to_string())
        .with_database(project.database.display().to_string());

    if db::has_legacy_issues(&pool).await? {
        if carry_legacy {
            let copied = db::migrate_legacy_issues(&pool, &registration).await?;
            log::info!(
                "Carried {} legacy issue(s) into {}",
                copied,
                project.full_name()
            );
        } else {
            log::debug!(
                "Legacy issues in {} left for the configured legacy project",
                project.database.display()
            );
        }
    }

    let project_id = project::register(&pool, &registration).await?;
    Ok((pool, project_id))
}

/// Open a project's database and look the project up without registering it.
async fn find_project(
    stores: &mut StoreSet,
    project: &EffectiveProject,
) -> Result<(DbPool, Option<i64>), AppError> {
    let pool = stores.open(&project.database).await?;

    match project::find_by_name(&pool, &project.owner, &project.repo).await {
        Ok(found) => Ok((pool, Some(found.id))),
        Err(AppError::NotFound { .. }) => Ok((pool, None)),
        Err(e) => Err(e),
    }
}

async fn problem_issues(pool: &DbPool, project_id: i64) -> Result<Vec<IssueStatus>, AppError> {
    let not_synced: Vec<SyncState> = SyncState::ALL
        .iter()
        .copied()
        .filter(|s| *s != SyncState::Synced)
        .collect();
    let records = sync_state::list_for_project(pool, project_id, &not_synced).await?;

    let mut conn = pool.acquire().await?;
    let mut issues = Vec::with_capacity(records.len());
    for record in records {
        let cached = issue::get_issue(&mut conn, record.issue_local_id).await?;
        issues.push(IssueStatus {
            issue_id: record.issue_local_id,
            number: cached.number,
            title: cached.title,
            state: record.sync_state,
            sync_error: record.sync_error,
            retry_count: record.retry_count,
            last_sync_attempt: record.last_sync_attempt,
        });
    }

    Ok(issues)
}
