//! Shared fixtures for integration tests.
//!
//! `FakeSource` is an in-memory remote: issues live in a map keyed by
//! `owner/repo`, creates and updates mutate it, and failures are scripted.

#![allow(dead_code)]

use issue_mirror::config::{Config, GlobalConfig, ProjectConfig};
use issue_mirror::error::{AppError, CredentialError};
use issue_mirror::services::github_client::{
    CreateIssuePayload, CreatedIssue, GitHubLabel, GitHubUser, RemoteIssue, RemoteIssueSource,
    UpdateIssuePayload,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

#[derive(Default)]
struct FakeState {
    issues: HashMap<String, Vec<RemoteIssue>>,
    bad_tokens: HashSet<String>,
    missing_repos: HashSet<String>,
    unreachable_repos: HashSet<String>,
    upload_failures: usize,
    next_id: i64,
    list_calls: usize,
    upload_calls: usize,
}

/// In-memory remote issue source.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<FakeState>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a remote issue.
    pub fn with_issue(self, full_name: &str, issue: RemoteIssue) -> Self {
        self.state
            .lock()
            .unwrap()
            .issues
            .entry(full_name.to_string())
            .or_default()
            .push(issue);
        self
    }

    /// Reject `token` with a 401.
    pub fn reject_token(self, token: &str) -> Self {
        self.state.lock().unwrap().bad_tokens.insert(token.to_string());
        self
    }

    /// Report `owner/repo` as not found.
    pub fn missing_repo(self, full_name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .missing_repos
            .insert(full_name.to_string());
        self
    }

    /// Fail listing `owner/repo` with a transport error.
    pub fn unreachable_repo(self, full_name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unreachable_repos
            .insert(full_name.to_string());
        self
    }

    /// Fail the next `count` creates/updates with a transport error.
    pub fn fail_uploads(&self, count: usize) {
        self.state.lock().unwrap().upload_failures = count;
    }

    /// Replace the body of a remote issue, as an edit on the remote would.
    pub fn edit_remote(&self, full_name: &str, id: i64, body: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(issue) = state
            .issues
            .get_mut(full_name)
            .and_then(|issues| issues.iter_mut().find(|i| i.id == id))
        {
            issue.body = Some(body.to_string());
        }
    }

    pub fn remote_issues(&self, full_name: &str) -> Vec<RemoteIssue> {
        self.state
            .lock()
            .unwrap()
            .issues
            .get(full_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn upload_calls(&self) -> usize {
        self.state.lock().unwrap().upload_calls
    }

    fn check(&self, owner: &str, repo: &str, token: &str) -> Result<(), AppError> {
        let state = self.state.lock().unwrap();
        if state.bad_tokens.contains(token) {
            return Err(CredentialError::invalid_token().into());
        }
        if state.missing_repos.contains(&format!("{}/{}", owner, repo)) {
            return Err(CredentialError::repository_not_found(owner, repo).into());
        }
        Ok(())
    }

    fn take_upload_failure(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.upload_calls += 1;
        if state.upload_failures > 0 {
            state.upload_failures -= 1;
            return Err(AppError::transport("connection reset by peer"));
        }
        Ok(())
    }
}

impl RemoteIssueSource for FakeSource {
    async fn list_issues(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<Vec<RemoteIssue>, AppError> {
        self.check(owner, repo, token)?;
        let full_name = format!("{}/{}", owner, repo);

        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.unreachable_repos.contains(&full_name) {
            return Err(AppError::transport("Failed to connect to server"));
        }
        Ok(state.issues.get(&full_name).cloned().unwrap_or_default())
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        payload: &CreateIssuePayload,
    ) -> Result<CreatedIssue, AppError> {
        self.check(owner, repo, token)?;
        self.take_upload_failure()?;

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = 5000 + state.next_id;
        let issues = state.issues.entry(format!("{}/{}", owner, repo)).or_default();
        let number = issues.iter().map(|i| i.number).max().unwrap_or(0) + 1;

        let body = payload.body.as_deref().unwrap_or("");
        let mut created = remote_issue(id, number, &payload.title, body);
        created.labels = payload
            .labels
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|name| GitHubLabel { name })
            .collect();
        created.assignees = payload
            .assignees
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|login| GitHubUser { login })
            .collect();
        issues.push(created);

        Ok(CreatedIssue {
            id,
            number,
            title: payload.title.clone(),
            state: "open".to_string(),
            html_url: format!("https://github.com/{}/{}/issues/{}", owner, repo, number),
        })
    }

    async fn update_issue(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        number: i64,
        payload: &UpdateIssuePayload,
    ) -> Result<CreatedIssue, AppError> {
        self.check(owner, repo, token)?;
        self.take_upload_failure()?;

        let mut state = self.state.lock().unwrap();
        let issue = state
            .issues
            .get_mut(&format!("{}/{}", owner, repo))
            .and_then(|issues| issues.iter_mut().find(|i| i.number == number))
            .ok_or_else(|| AppError::github_api_full("Not Found", 404, "/issues"))?;

        issue.title = payload.title.clone();
        issue.body = Some(payload.body.clone());
        issue.state = payload.state.clone();
        issue.labels = payload
            .labels
            .iter()
            .map(|name| GitHubLabel { name: name.clone() })
            .collect();
        issue.assignees = payload
            .assignees
            .iter()
            .map(|login| GitHubUser {
                login: login.clone(),
            })
            .collect();

        Ok(CreatedIssue {
            id: issue.id,
            number,
            title: issue.title.clone(),
            state: issue.state.clone(),
            html_url: format!("https://github.com/{}/{}/issues/{}", owner, repo, number),
        })
    }

    async fn validate_token(&self, token: &str) -> Result<(), AppError> {
        self.check("", "", token)
    }

    async fn validate_repository_access(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<(), AppError> {
        self.check(owner, repo, token)
    }
}

/// A plain open issue as the remote reports it.
pub fn remote_issue(id: i64, number: i64, title: &str, body: &str) -> RemoteIssue {
    RemoteIssue {
        id,
        number,
        title: title.to_string(),
        body: Some(body.to_string()),
        state: "open".to_string(),
        labels: Vec::new(),
        assignees: Vec::new(),
        created_at: Some("2026-03-01T10:00:00Z".to_string()),
        updated_at: Some("2026-03-01T10:00:00Z".to_string()),
        closed_at: None,
        html_url: Some(format!("https://github.com/x/y/issues/{}", number)),
        pull_request: None,
    }
}

/// Config with one global database and token and the given `(owner, repo)` projects.
pub fn config_for(db_path: &Path, token: &str, projects: &[(&str, &str)]) -> Config {
    Config {
        global: GlobalConfig {
            database: db_path.display().to_string(),
            token: token.to_string(),
            ..Default::default()
        },
        projects: projects
            .iter()
            .map(|(owner, repo)| ProjectConfig {
                owner: owner.to_string(),
                repo: repo.to_string(),
                path: format!("/src/{}", repo),
                ..Default::default()
            })
            .collect(),
    }
}
