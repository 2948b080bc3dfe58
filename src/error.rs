//! Application error types.
//!
//! These errors are serializable so that an outer layer (CLI, service) can
//! render them as structured JSON as well as plain text.

use serde::Serialize;
use thiserror::Error;

/// Name of the remote provider used in rendered credential errors.
pub const PROVIDER: &str = "GitHub";

/// Authentication or authorization failure against the remote API.
///
/// Renders as `"GitHub API error (<code>): <message>\n<suggestion>"`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{provider} API error ({status_code}): {message}\n{suggestion}", provider = PROVIDER)]
pub struct CredentialError {
    /// HTTP status code (401 is also used for a missing token).
    pub status_code: u16,

    /// Human-readable description of the failure.
    pub message: String,

    /// What the user can do about it.
    pub suggestion: String,
}

impl CredentialError {
    pub fn new(
        status_code: u16,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            status_code,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// No token configured at all; reported without contacting the API.
    pub fn missing_token() -> Self {
        Self::new(
            401,
            "No GitHub token provided",
            "Set `token` in the global section of your config or a per-project token override.",
        )
    }

    /// 401 from the API.
    pub fn invalid_token() -> Self {
        Self::new(
            401,
            "Invalid or expired GitHub token",
            "Generate a new personal access token and update your config.",
        )
    }

    /// 403 from the token check, before any repository is involved.
    pub fn token_forbidden() -> Self {
        Self::new(
            403,
            "Token is not permitted to access the GitHub API",
            "Check that the token is not restricted by an organization policy and has the `repo` scope.",
        )
    }

    /// 403 from a repository call.
    pub fn insufficient_scope(owner: &str, repo: &str) -> Self {
        Self::new(
            403,
            format!("Token lacks permission to access {}/{}", owner, repo),
            "Ensure the token has the `repo` scope (or issues read/write for fine-grained tokens).",
        )
    }

    /// 404 from the API.
    pub fn repository_not_found(owner: &str, repo: &str) -> Self {
        Self::new(
            404,
            format!("Repository {}/{} not found or not accessible", owner, repo),
            "Check the owner and repo names, and that the token can see private repositories.",
        )
    }

    /// Any other non-2xx status; carries the response body.
    pub fn unexpected(status_code: u16, body: &str) -> Self {
        Self::new(
            status_code,
            format!("Unexpected response: {}", body.trim()),
            "Try again later; if the problem persists check the GitHub status page.",
        )
    }
}

/// Application-level errors.
///
/// All variants serialize to a structured JSON object.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Malformed or incomplete configuration. Aborts the whole run.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Authentication/authorization failure. Aborts only the current project.
    #[error("{0}")]
    Credential(CredentialError),

    /// Network, DNS or timeout failure.
    #[error("Network error: {message}")]
    Transport { message: String },

    /// A success response whose body could not be decoded.
    #[error("Failed to decode response: {message}")]
    Decode {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// The outbound request could not be constructed.
    #[error("Failed to create request: {message}")]
    Request { message: String },

    /// Non-2xx response not covered by the credential mapping.
    #[error("GitHub API error: {message}")]
    GitHubApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Embedded store unreadable or unwritable. Aborts the operation.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// A sync-state change not present in the transition table.
    #[error("Invalid sync transition for issue {issue_id}: {from} -> {to}")]
    InvalidTransition {
        issue_id: i64,
        from: String,
        to: String,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a decode error for an endpoint.
    pub fn decode(message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a request construction error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Create a GitHub API error with status code and endpoint.
    pub fn github_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::GitHubApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(
        issue_id: i64,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            issue_id,
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors that abort the whole invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Storage { .. })
    }

    /// Check if this is a credential error.
    pub fn is_credential(&self) -> bool {
        matches!(self, Self::Credential(_))
    }

    /// Failures recorded as a failed transition and eligible for retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Decode { .. } | Self::GitHubApi { .. }
        )
    }

    /// Get the credential error, if this is one.
    pub fn as_credential(&self) -> Option<&CredentialError> {
        match self {
            Self::Credential(err) => Some(err),
            _ => None,
        }
    }
}

// Conversions from common error types

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        Self::Credential(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transport("Request timed out")
        } else if err.is_connect() {
            Self::transport("Failed to connect to server")
        } else if err.is_decode() {
            Self::Decode {
                message: err.to_string(),
                endpoint: err.url().map(|u| u.path().to_string()),
            }
        } else if err.is_builder() {
            Self::request(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::storage(err.to_string())
    }
}
