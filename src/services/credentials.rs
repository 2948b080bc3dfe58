//! Credential validation against the remote API.
//!
//! Tokens come from configuration; this module only checks that a token is
//! present, accepted by the API, and able to see the target repository.

use crate::error::{AppError, CredentialError};
use crate::services::github_client::RemoteIssueSource;

/// Credential validation operations.
pub struct CredentialService;

impl CredentialService {
    /// Check that `token` is accepted by the API.
    ///
    /// An empty token fails with a 401 credential error without a network call.
    pub async fn validate_token<S: RemoteIssueSource>(
        source: &S,
        token: &str,
    ) -> Result<(), AppError> {
        if token.trim().is_empty() {
            return Err(CredentialError::missing_token().into());
        }
        source.validate_token(token).await
    }

    /// Check that `token` can access `owner/repo`.
    pub async fn validate_repository_access<S: RemoteIssueSource>(
        source: &S,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<(), AppError> {
        if token.trim().is_empty() {
            return Err(CredentialError::missing_token().into());
        }
        source.validate_repository_access(owner, repo, token).await
    }

    /// Validate the token, then repository access.
    ///
    /// Repository validation is skipped when both `owner` and `repo` are empty.
    pub async fn ensure_credentials<S: RemoteIssueSource>(
        source: &S,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<(), AppError> {
        Self::validate_token(source, token).await?;

        if owner.is_empty() && repo.is_empty() {
            return Ok(());
        }

        Self::validate_repository_access(source, owner, repo, token).await
    }
}
