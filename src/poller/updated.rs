//! Single-phase high-water-mark pollers.
//!
//! Unlike [`IssuePoller`](super::IssuePoller), these advance their cursor
//! on every call: they suit bots that act on each batch immediately and
//! go through every open item at startup anyway. The first call only
//! seeds the cursor (recording every item at the current maximum update
//! timestamp) and returns nothing, so a restart never reprocesses
//! history.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::host::{HostResult, HostedRepository, Issue, IssueProject, PullRequest};
use crate::types::IssueId;

/// Per-item timestamp tracking shared by the updated-item pollers.
///
/// Timestamp-based searches are not exact enough to avoid receiving the
/// same items multiple times; the per-item map filters repeats. The
/// high-water mark only ever holds host-reported timestamps, avoiding
/// problems with mismatched clocks.
struct UpdateTracker {
    seen: HashMap<IssueId, DateTime<Utc>>,
    last_updated_at: Option<DateTime<Utc>>,
}

impl UpdateTracker {
    fn new() -> Self {
        UpdateTracker {
            seen: HashMap::new(),
            last_updated_at: None,
        }
    }

    /// Seeds the cursor and the per-item map from an initial query.
    /// Every seed item must be recorded: several items can share the
    /// maximum timestamp, and any left out would resurface on the next
    /// call without a host-side change.
    fn seed(&mut self, items: impl IntoIterator<Item = (IssueId, DateTime<Utc>)>) {
        // With no items yet, anything that appears later is new.
        let mut max = DateTime::<Utc>::UNIX_EPOCH;
        for (id, updated_at) in items {
            max = max.max(updated_at);
            self.seen.insert(id, updated_at);
        }
        self.last_updated_at = Some(max);
    }

    fn floor(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }

    /// Filters a query result down to genuinely updated items and
    /// advances the cursor and per-item map.
    fn filter<T>(
        &mut self,
        items: Vec<T>,
        id_of: impl Fn(&T) -> IssueId,
        updated_of: impl Fn(&T) -> DateTime<Utc>,
    ) -> Vec<T> {
        let mut fresh_seen = HashMap::new();
        let mut updated = Vec::new();
        for item in items {
            let id = id_of(&item);
            let at = updated_of(&item);
            fresh_seen.insert(id.clone(), at);
            if Some(at) > self.last_updated_at {
                self.last_updated_at = Some(at);
            }
            let already_seen = self.seen.get(&id).is_some_and(|last| at <= *last);
            if !already_seen {
                updated.push(item);
            }
        }
        self.seen = fresh_seen;
        updated
    }
}

/// Poller for updated issues in an issue project.
pub struct UpdatedIssuePoller {
    project: Arc<dyn IssueProject>,
    tracker: UpdateTracker,
}

impl UpdatedIssuePoller {
    pub fn new(project: Arc<dyn IssueProject>) -> Self {
        UpdatedIssuePoller {
            project,
            tracker: UpdateTracker::new(),
        }
    }

    /// Returns issues updated since the previous call. The first call
    /// seeds the cursor and returns an empty batch.
    pub fn updated_issues(&mut self) -> HostResult<Vec<Issue>> {
        let Some(floor) = self.tracker.floor() else {
            // Seed from everything at the current maximum timestamp --
            // ties at the maximum are indistinguishable from each other
            // by timestamp alone.
            let seed = match self.project.last_updated_issue()? {
                Some(most_recent) => self
                    .project
                    .issues_updated_after(most_recent.updated_at)?
                    .into_iter()
                    .map(|issue| (issue.id, issue.updated_at))
                    .collect(),
                None => Vec::new(),
            };
            self.tracker.seed(seed);
            return Ok(Vec::new());
        };
        let issues = self.project.issues_updated_after(floor)?;
        Ok(self
            .tracker
            .filter(issues, |i| i.id.clone(), |i| i.updated_at))
    }
}

/// Poller for updated pull requests in a hosted repository.
pub struct UpdatedPullRequestPoller {
    repository: Arc<dyn HostedRepository>,
    tracker: UpdateTracker,
}

impl UpdatedPullRequestPoller {
    pub fn new(repository: Arc<dyn HostedRepository>) -> Self {
        UpdatedPullRequestPoller {
            repository,
            tracker: UpdateTracker::new(),
        }
    }

    /// Returns pull requests updated since the previous call. The first
    /// call seeds the cursor and returns an empty batch.
    pub fn updated_pull_requests(&mut self) -> HostResult<Vec<PullRequest>> {
        let Some(floor) = self.tracker.floor() else {
            let prs = self
                .repository
                .pull_requests_updated_after(DateTime::<Utc>::UNIX_EPOCH)?;
            self.tracker
                .seed(prs.into_iter().map(|pr| (pr.id, pr.updated_at)));
            return Ok(Vec::new());
        };
        let prs = self.repository.pull_requests_updated_after(floor)?;
        Ok(self
            .tracker
            .filter(prs, |pr| pr.id.clone(), |pr| pr.updated_at))
    }
}
