//! GitHub API client.
//!
//! Provides HTTP client for the GitHub REST API with bearer authentication
//! and `Link` header pagination. The token is passed per call so one client
//! serves every configured project.

use crate::error::{AppError, CredentialError};
use crate::models::issue::IssueFields;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Media type requested on every call.
pub const ACCEPT_HEADER: &str = "application/vnd.github+json";

/// REST API version pinned on every call.
pub const API_VERSION: &str = "2022-11-28";

const USER_AGENT: &str = concat!("issue-mirror/", env!("CARGO_PKG_VERSION"));

const PER_PAGE: u32 = 100;

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    /// Base URL of the API (e.g., `https://api.github.com`).
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            timeout_secs: 30,
        }
    }
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
}

/// Label object inside an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

/// User object inside an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

/// Issue as returned by `GET /repos/{owner}/{repo}/issues`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub closed_at: Option<String>,
    pub html_url: Option<String>,
    /// Present only when the entry is a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
}

impl RemoteIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    /// Content in cache form.
    pub fn to_fields(&self) -> IssueFields {
        IssueFields {
            github_id: Some(self.id),
            number: Some(self.number),
            title: self.title.clone(),
            body: self.body.clone().unwrap_or_default(),
            state: self.state.clone(),
            labels: self.labels.iter().map(|l| l.name.clone()).collect(),
            assignees: self.assignees.iter().map(|a| a.login.clone()).collect(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            closed_at: self.closed_at.clone(),
        }
    }
}

/// Body of `POST /repos/{owner}/{repo}/issues`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIssuePayload {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<i64>,
}

impl CreateIssuePayload {
    /// Payload for a cached issue. Empty collections are omitted.
    pub fn from_fields(fields: &IssueFields) -> Self {
        Self {
            title: fields.title.clone(),
            body: Some(fields.body.clone()).filter(|b| !b.is_empty()),
            labels: Some(fields.labels.clone()).filter(|l| !l.is_empty()),
            assignees: Some(fields.assignees.clone()).filter(|a| !a.is_empty()),
            milestone: None,
        }
    }
}

/// Body of `PATCH /repos/{owner}/{repo}/issues/{number}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateIssuePayload {
    pub title: String,
    pub body: String,
    pub state: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
}

impl UpdateIssuePayload {
    pub fn from_fields(fields: &IssueFields) -> Self {
        Self {
            title: fields.title.clone(),
            body: fields.body.clone(),
            state: fields.state.clone(),
            labels: fields.labels.clone(),
            assignees: fields.assignees.clone(),
        }
    }
}

/// Envelope returned by the create and update endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub html_url: String,
}

/// Authenticated user from `GET /user`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticatedUser {
    pub login: String,
}

/// Source of remote issues.
///
/// Implemented by [`GitHubClient`]; tests substitute an in-memory fake.
pub trait RemoteIssueSource: Send + Sync {
    /// All issues of a repository (pull requests excluded).
    fn list_issues(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> impl Future<Output = Result<Vec<RemoteIssue>, AppError>> + Send;

    fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        payload: &CreateIssuePayload,
    ) -> impl Future<Output = Result<CreatedIssue, AppError>> + Send;

    fn update_issue(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        number: i64,
        payload: &UpdateIssuePayload,
    ) -> impl Future<Output = Result<CreatedIssue, AppError>> + Send;

    /// Check the token against the API.
    fn validate_token(&self, token: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Check the token can see the repository.
    fn validate_repository_access(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// What a call targets; decides how a failure status is reported.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    /// `GET /user` token validation.
    User,
    /// Repository access validation.
    RepositoryAccess { owner: &'a str, repo: &'a str },
    /// Issue list/create/update.
    Repository { owner: &'a str, repo: &'a str },
}

impl GitHubClient {
    /// Create a new GitHub client.
    pub fn new(config: GitHubClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT_HEADER));
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static(API_VERSION),
        );

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Client for a non-default API host.
    pub fn with_base_url(base_url: &str) -> Result<Self, AppError> {
        Self::new(GitHubClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// `/repos/{owner}/{repo}{suffix}` with validated, encoded segments.
    fn repo_path(owner: &str, repo: &str, suffix: &str) -> Result<String, AppError> {
        for (name, value) in [("owner", owner), ("repo", repo)] {
            if value.is_empty() || value.chars().any(char::is_control) {
                return Err(AppError::request(format!("invalid {} {:?}", name, value)));
            }
        }

        Ok(format!(
            "/repos/{}/{}{}",
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            suffix
        ))
    }

    /// Build a request with the bearer token attached.
    fn request(&self, method: Method, url: &str, token: &str) -> Result<RequestBuilder, AppError> {
        let auth = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| AppError::request("token contains characters not allowed in a header"))?;

        Ok(self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json"))
    }

    /// Send a request. Construction failures surface as `AppError::Request`.
    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response, AppError> {
        log::debug!("GitHub request: {}", endpoint);

        request.send().await.map_err(|e| {
            let err = AppError::from(e);
            if matches!(err, AppError::Transport { .. }) {
                log::warn!("Transport failure on {}: {}", endpoint, err);
            }
            err
        })
    }

    /// Decode a success response or map the failure status.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
        target: Target<'_>,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await?;
            serde_json::from_slice::<T>(&bytes).map_err(|e| {
                log::warn!("Failed to decode response from {}: {}", endpoint, e);
                AppError::decode(e.to_string(), endpoint)
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body, endpoint, target))
        }
    }

    /// Fetch every page of a list endpoint, following `rel="next"` links.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        first_url: String,
        endpoint: &str,
        token: &str,
        target: Target<'_>,
    ) -> Result<Vec<T>, AppError> {
        let mut all_data = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next.take() {
            let response = self
                .send(self.request(Method::GET, &url, token)?, endpoint)
                .await?;
            next = response
                .headers()
                .get(header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_next_link)
                .filter(|n| *n != url);

            let page: Vec<T> = self.handle_response(response, endpoint, target).await?;
            all_data.extend(page);
        }

        Ok(all_data)
    }

    /// Fetch the user the token belongs to.
    pub async fn current_user(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let endpoint = "/user";
        let request = self.request(Method::GET, &self.api_url(endpoint), token)?;
        let response = self.send(request, endpoint).await?;
        self.handle_response(response, endpoint, Target::User).await
    }
}

impl RemoteIssueSource for GitHubClient {
    async fn list_issues(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<Vec<RemoteIssue>, AppError> {
        let endpoint = Self::repo_path(owner, repo, "/issues")?;
        let url = format!(
            "{}?state=all&per_page={}",
            self.api_url(&endpoint),
            PER_PAGE
        );

        let issues: Vec<RemoteIssue> = self
            .get_all_pages(url, &endpoint, token, Target::Repository { owner, repo })
            .await?;

        Ok(issues
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .collect())
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        payload: &CreateIssuePayload,
    ) -> Result<CreatedIssue, AppError> {
        let endpoint = Self::repo_path(owner, repo, "/issues")?;
        let request = self
            .request(Method::POST, &self.api_url(&endpoint), token)?
            .json(payload);
        let response = self.send(request, &endpoint).await?;
        self.handle_response(response, &endpoint, Target::Repository { owner, repo })
            .await
    }

    async fn update_issue(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        number: i64,
        payload: &UpdateIssuePayload,
    ) -> Result<CreatedIssue, AppError> {
        let endpoint = Self::repo_path(owner, repo, &format!("/issues/{}", number))?;
        let request = self
            .request(Method::PATCH, &self.api_url(&endpoint), token)?
            .json(payload);
        let response = self.send(request, &endpoint).await?;
        self.handle_response(response, &endpoint, Target::Repository { owner, repo })
            .await
    }

    async fn validate_token(&self, token: &str) -> Result<(), AppError> {
        if token.is_empty() {
            return Err(CredentialError::missing_token().into());
        }

        let user = self.current_user(token).await?;
        log::debug!("Token belongs to {}", user.login);
        Ok(())
    }

    async fn validate_repository_access(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<(), AppError> {
        if token.is_empty() {
            return Err(CredentialError::missing_token().into());
        }

        let endpoint = Self::repo_path(owner, repo, "")?;
        let request = self.request(Method::GET, &self.api_url(&endpoint), token)?;
        let response = self.send(request, &endpoint).await?;
        let _: serde_json::Value = self
            .handle_response(response, &endpoint, Target::RepositoryAccess { owner, repo })
            .await?;
        Ok(())
    }
}

/// Map a non-2xx status to an error.
///
/// 401, 403 and 404 are credential failures. Other statuses are credential
/// failures for validation calls and retryable API errors for data calls.
fn status_error(status: StatusCode, body: &str, endpoint: &str, target: Target<'_>) -> AppError {
    match (status, target) {
        (StatusCode::UNAUTHORIZED, _) => CredentialError::invalid_token().into(),
        (StatusCode::FORBIDDEN, Target::User) => CredentialError::token_forbidden().into(),
        (StatusCode::FORBIDDEN, Target::Repository { owner, repo })
        | (StatusCode::FORBIDDEN, Target::RepositoryAccess { owner, repo }) => {
            CredentialError::insufficient_scope(owner, repo).into()
        }
        (StatusCode::NOT_FOUND, Target::Repository { owner, repo })
        | (StatusCode::NOT_FOUND, Target::RepositoryAccess { owner, repo }) => {
            CredentialError::repository_not_found(owner, repo).into()
        }
        (_, Target::User) | (_, Target::RepositoryAccess { .. }) => {
            CredentialError::unexpected(status.as_u16(), body).into()
        }
        (_, Target::Repository { .. }) => {
            // GitHub returns errors as {"message": "..."}
            let message = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| format!("Request failed ({}): {}", status.as_u16(), body));
            AppError::github_api_full(message, status.as_u16(), endpoint)
        }
    }
}

/// Extract the `rel="next"` URL from a `Link` header.
fn parse_next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let url = segments.next()?.trim();
        if segments.any(|s| s.trim() == r#"rel="next""#) {
            url.strip_prefix('<')?.strip_suffix('>').map(str::to_string)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_construction() {
        let client = GitHubClient::with_base_url("https://ghe.example.com/api/v3/").unwrap();
        assert_eq!(
            client.api_url("/user"),
            "https://ghe.example.com/api/v3/user"
        );
    }

    #[test]
    fn test_repo_path_rejects_control_characters() {
        assert_eq!(
            GitHubClient::repo_path("octo", "hello", "/issues").unwrap(),
            "/repos/octo/hello/issues"
        );

        let err = GitHubClient::repo_path("oc\nto", "hello", "").unwrap_err();
        assert!(matches!(err, AppError::Request { .. }));

        let err = GitHubClient::repo_path("octo", "", "").unwrap_err();
        assert!(matches!(err, AppError::Request { .. }));
    }

    #[test]
    fn test_parse_next_link() {
        let link = r#"<https://api.github.com/repositories/1/issues?page=2>; rel="next", <https://api.github.com/repositories/1/issues?page=5>; rel="last""#;
        assert_eq!(
            parse_next_link(link).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );

        let last_page = r#"<https://api.github.com/repositories/1/issues?page=1>; rel="first""#;
        assert_eq!(parse_next_link(last_page), None);
    }

    #[test]
    fn test_create_payload_omits_empty_fields() {
        let payload = CreateIssuePayload::from_fields(&IssueFields::local("Only a title"));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "title": "Only a title" }));
    }

    #[test]
    fn test_status_mapping() {
        let repo = Target::Repository {
            owner: "octo",
            repo: "hello",
        };

        let err = status_error(StatusCode::UNAUTHORIZED, "", "/x", Target::User);
        assert_eq!(err.as_credential().map(|c| c.status_code), Some(401));

        let err = status_error(StatusCode::FORBIDDEN, "", "/x", repo);
        assert_eq!(err.as_credential().map(|c| c.status_code), Some(403));
        assert!(err.to_string().contains("octo/hello"));

        let err = status_error(StatusCode::FORBIDDEN, "", "/user", Target::User);
        let cred = err.as_credential().unwrap();
        assert_eq!(cred.status_code, 403);
        assert!(!cred.message.contains('/'));

        let err = status_error(StatusCode::NOT_FOUND, "", "/x", repo);
        assert_eq!(err.as_credential().map(|c| c.status_code), Some(404));

        let err = status_error(
            StatusCode::BAD_GATEWAY,
            r#"{"message":"Server Error"}"#,
            "/x",
            repo,
        );
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "GitHub API error: Server Error");

        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, "boom", "/user", Target::User);
        let cred = err.as_credential().unwrap();
        assert_eq!(cred.status_code, 500);
        assert!(cred.message.contains("boom"));
    }

    #[test]
    fn test_remote_issue_to_fields() {
        let issue: RemoteIssue = serde_json::from_value(serde_json::json!({
            "id": 1001,
            "number": 1,
            "title": "Bug",
            "body": null,
            "state": "open",
            "labels": [{ "name": "bug" }, { "name": "ui" }],
            "assignees": [{ "login": "alice" }],
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z",
            "closed_at": null,
            "html_url": "https://github.com/octo/hello/issues/1"
        }))
        .unwrap();

        assert!(!issue.is_pull_request());
        let fields = issue.to_fields();
        assert_eq!(fields.github_id, Some(1001));
        assert_eq!(fields.body, "");
        assert_eq!(fields.labels, vec!["bug", "ui"]);
        assert_eq!(fields.assignees, vec!["alice"]);
    }
}
