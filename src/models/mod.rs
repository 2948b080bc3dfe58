//! Data models for the local issue cache.
//!
//! These models represent the entities stored in the local SQLite database.
//! Row types derive `FromRow` for SQLx queries and `Serialize` so an outer
//! layer can render them as JSON.

pub mod issue;
pub mod project;
pub mod sync_state;

// Re-exports for convenient access
pub use issue::{Issue, IssueEdit, IssueFields};
pub use project::{NewProject, Project};
pub use sync_state::{SyncEvent, SyncState, SyncStateRecord, TRANSITIONS};
