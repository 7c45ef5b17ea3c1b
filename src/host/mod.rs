//! Narrow interfaces to external hosting services.
//!
//! The core never talks to a specific forge's wire format. Bots and
//! pollers consume these traits; forge API clients live outside this
//! crate. [`git`] covers what plain git can reach without an API, and
//! the in-memory doubles in [`memory`] stand in for the rest in tests.
//!
//! All timestamps are host-reported. Pollers deliberately never compare a
//! host timestamp against the local clock when deduplicating, because the
//! two clocks are not trustworthy relative to each other.

pub mod git;
pub mod memory;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::types::{Branch, CommitHash, IssueId, RepoName};

/// Errors from host interactions.
#[derive(Debug, Error)]
pub enum HostError {
    /// Transient failure (network reset, 5xx, rate limit). Safe to retry.
    #[error("transient host error: {0}")]
    Transient(String),

    /// Permanent failure (bad request, missing entity). Retrying will not
    /// help.
    #[error("host error: {0}")]
    Permanent(String),
}

impl HostError {
    /// Returns true if the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Transient(_))
    }
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Whether an issue is open or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Open,
    Closed,
}

/// An issue as reported by an issue project.
///
/// A plain value snapshot; re-fetch to observe changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A pull request as reported by a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub id: IssueId,
    pub title: String,
    pub source: Branch,
    pub target: Branch,
    pub head: CommitHash,
    pub updated_at: DateTime<Utc>,
}

/// An external issue-tracker project.
pub trait IssueProject: Send + Sync {
    /// The project name, for logging and conflict keys.
    fn name(&self) -> &str;

    /// All issues whose host-reported update timestamp is at or after the
    /// given floor.
    fn issues_updated_after(&self, floor: DateTime<Utc>) -> HostResult<Vec<Issue>>;

    /// The single most recently updated issue, if any.
    fn last_updated_issue(&self) -> HostResult<Option<Issue>>;

    /// Fetch one issue by id.
    fn issue(&self, id: &IssueId) -> HostResult<Option<Issue>>;

    /// Add a label to an issue. Adding a label that is already present is
    /// a no-op (actions must be idempotent).
    fn add_label(&self, id: &IssueId, label: &str) -> HostResult<()>;

    /// Remove a label from an issue. Removing an absent label is a no-op.
    fn remove_label(&self, id: &IssueId, label: &str) -> HostResult<()>;

    /// The coarsest granularity of the backend's update-timestamp queries.
    /// Query pads should not be finer than this.
    fn timestamp_precision(&self) -> Duration;
}

/// An external hosted repository on a forge.
pub trait HostedRepository: Send + Sync {
    /// The repository name, for logging and conflict keys.
    fn name(&self) -> &RepoName;

    /// A URL suitable for local VCS clone/fetch/push operations.
    fn url(&self) -> String;

    /// All pull requests whose host-reported update timestamp is at or
    /// after the given floor.
    fn pull_requests_updated_after(&self, floor: DateTime<Utc>) -> HostResult<Vec<PullRequest>>;

    /// All branches currently present on the remote.
    fn branches(&self) -> HostResult<Vec<Branch>>;
}
