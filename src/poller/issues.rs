//! Two-phase (peek, then acknowledge) issue polling.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::host::{HostResult, Issue, IssueProject};
use crate::types::IssueId;

/// State captured by one query.
struct QueryState {
    /// Per-item update timestamps from the raw query result (including
    /// items filtered out of the returned batch).
    seen: HashMap<IssueId, DateTime<Utc>>,
    /// The highest host-reported update timestamp observed so far.
    max_updated_at: DateTime<Utc>,
    /// Identities actually returned to the caller.
    returned: Vec<IssueId>,
}

/// Incremental poller over an [`IssueProject`].
///
/// `updated_issues` returns the set of issues that are logically new or
/// changed since the last *acknowledged* batch, and keeps returning the
/// same set until [`last_batch_handled`](IssuePoller::last_batch_handled)
/// commits it. The query floor is padded backwards by `query_pad` to
/// tolerate backend timestamps that lag the true event time; items
/// already reported at the same timestamp are filtered out per item, so
/// the overlap window does not produce duplicates.
///
/// Cursor timestamps originate from the host, never the local clock; the
/// only locally sourced timestamp is the startup floor.
pub struct IssuePoller {
    project: Arc<dyn IssueProject>,
    query_pad: Duration,
    /// Query floor for the very first poll: `now - startup_pad`, bounding
    /// how far back a restarted process will reach.
    initial_floor: DateTime<Utc>,
    /// Last acknowledged query state.
    acked: Option<QueryState>,
    /// Peeked but not yet acknowledged query state.
    pending: Option<QueryState>,
    /// Issues to re-surface on the next poll regardless of timestamps.
    retries: HashMap<IssueId, Issue>,
}

impl IssuePoller {
    /// Creates a poller.
    ///
    /// `query_pad` is the backward-looking overlap applied to every
    /// query floor; it should be at least the backend's timestamp
    /// precision. `startup_pad` bounds the retroactive window of the
    /// first poll after process start and is typically much larger.
    pub fn new(project: Arc<dyn IssueProject>, query_pad: Duration, startup_pad: Duration) -> Self {
        let query_pad = query_pad.max(project.timestamp_precision());
        IssuePoller {
            project,
            query_pad,
            initial_floor: Utc::now() - startup_pad,
            acked: None,
            pending: None,
            retries: HashMap::new(),
        }
    }

    /// Returns the issues updated since the last acknowledged batch,
    /// plus any issues registered for retry.
    ///
    /// Calling this again before [`last_batch_handled`] returns the same
    /// result set (given unchanged backend state): the cursor does not
    /// move until the batch is acknowledged.
    pub fn updated_issues(&mut self) -> HostResult<Vec<Issue>> {
        let floor = match &self.acked {
            None => self.initial_floor,
            Some(acked) => acked.max_updated_at - self.query_pad,
        };
        debug!(project = self.project.name(), %floor, "querying updated issues");
        let issues = self.project.issues_updated_after(floor)?;

        let max_updated_at = issues
            .iter()
            .map(|issue| issue.updated_at)
            .max()
            .unwrap_or_else(|| {
                self.acked
                    .as_ref()
                    .map(|acked| acked.max_updated_at)
                    .unwrap_or(self.initial_floor)
            });
        let seen: HashMap<IssueId, DateTime<Utc>> = issues
            .iter()
            .map(|issue| (issue.id.clone(), issue.updated_at))
            .collect();

        let mut result: Vec<Issue> = issues
            .into_iter()
            .filter(|issue| self.is_updated(issue))
            .collect();
        for retry in self.retries.values() {
            if !result.iter().any(|issue| issue.id == retry.id) {
                result.push(retry.clone());
            }
        }

        self.pending = Some(QueryState {
            seen,
            max_updated_at,
            returned: result.iter().map(|issue| issue.id.clone()).collect(),
        });

        info!(
            project = self.project.name(),
            count = result.len(),
            "found updated issues"
        );
        Ok(result)
    }

    /// Acknowledges that every issue returned by the last
    /// [`updated_issues`](IssuePoller::updated_issues) call has been
    /// handled. Until this is called, the previous results are included
    /// again on the next poll.
    pub fn last_batch_handled(&mut self) {
        if let Some(pending) = self.pending.take() {
            for id in &pending.returned {
                self.retries.remove(id);
            }
            self.acked = Some(pending);
        }
    }

    /// Registers an issue to be re-surfaced on the next poll even though
    /// its timestamp no longer qualifies. The registration is consumed by
    /// the next acknowledged batch.
    pub fn retry_issue(&mut self, issue: Issue) {
        self.retries.insert(issue.id.clone(), issue);
    }

    /// An issue is updated if the acknowledged state has never seen it,
    /// or saw it with a strictly older timestamp. Item-level comparison:
    /// a global floor cannot distinguish "already reported" from
    /// "unchanged but inside the overlap window."
    fn is_updated(&self, issue: &Issue) -> bool {
        let Some(acked) = &self.acked else {
            return true;
        };
        match acked.seen.get(&issue.id) {
            None => true,
            Some(last_seen) => issue.updated_at > *last_seen,
        }
    }
}
