//! Issue Mirror - local-first mirror of GitHub issues.
//!
//! Keeps a queryable SQLite copy of one or more repositories' issues, tracks
//! every cached issue through a sync state machine, and reconciles local
//! edits with the remote when a sync or push runs. The library installs no
//! logger and parses no command line; an outer layer drives
//! [`services::SyncEngine`] and renders its summaries.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::{Config, EffectiveProject, ResolveContext};
pub use error::{AppError, CredentialError};
pub use services::{GitHubClient, RemoteIssueSource, SyncEngine};
