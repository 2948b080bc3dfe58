//! Business logic services.
//!
//! This module contains the core logic for talking to GitHub, keeping the
//! issue cache and its sync states consistent, and orchestrating sync and
//! push runs.
//!
//! Services take a [`RemoteIssueSource`] so tests can run the same code path
//! against an in-memory source.

pub mod credentials;
pub mod github_client;
pub mod issue_cache;
pub mod sync_engine;
pub mod sync_processor;
pub mod sync_state;

pub use credentials::CredentialService;
pub use github_client::{GitHubClient, GitHubClientConfig, RemoteIssueSource};
pub use issue_cache::{ApplyOutcome, Resolution};
pub use sync_engine::{PushSummary, StatusSummary, SyncEngine, SyncSummary};
