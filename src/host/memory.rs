//! In-memory host doubles.
//!
//! These stand in for a real forge or issue tracker in tests and local
//! experiments. They are deliberately faithful to the contract the
//! pollers care about: queries filter on the stored host-side
//! `updated_at` values, inclusive at the floor, exactly like a timestamp
//! query against a real backend.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use super::{HostError, HostResult, HostedRepository, Issue, IssueProject, PullRequest};
use crate::types::{Branch, IssueId, RepoName};

/// An in-memory issue project.
pub struct InMemoryIssueProject {
    name: String,
    precision: Duration,
    issues: Mutex<BTreeMap<IssueId, Issue>>,
    /// When set, every query fails with a transient error. Lets tests
    /// exercise retry paths.
    fail_queries: Mutex<bool>,
}

impl InMemoryIssueProject {
    pub fn new(name: impl Into<String>) -> Self {
        InMemoryIssueProject {
            name: name.into(),
            precision: Duration::seconds(1),
            issues: Mutex::new(BTreeMap::new()),
            fail_queries: Mutex::new(false),
        }
    }

    pub fn with_precision(name: impl Into<String>, precision: Duration) -> Self {
        InMemoryIssueProject {
            precision,
            ..Self::new(name)
        }
    }

    /// Inserts or replaces an issue.
    pub fn put_issue(&self, issue: Issue) {
        self.issues
            .lock()
            .unwrap()
            .insert(issue.id.clone(), issue);
    }

    /// Deletes an issue, as a host-side removal would.
    pub fn remove_issue(&self, id: &IssueId) {
        self.issues.lock().unwrap().remove(id);
    }

    /// Sets the host-side update timestamp of an existing issue.
    pub fn touch(&self, id: &IssueId, updated_at: DateTime<Utc>) {
        if let Some(issue) = self.issues.lock().unwrap().get_mut(id) {
            issue.updated_at = updated_at;
        }
    }

    /// Makes subsequent queries fail transiently (or stop failing).
    pub fn set_fail_queries(&self, fail: bool) {
        *self.fail_queries.lock().unwrap() = fail;
    }

    fn check_failure(&self) -> HostResult<()> {
        if *self.fail_queries.lock().unwrap() {
            Err(HostError::Transient("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl IssueProject for InMemoryIssueProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn issues_updated_after(&self, floor: DateTime<Utc>) -> HostResult<Vec<Issue>> {
        self.check_failure()?;
        Ok(self
            .issues
            .lock()
            .unwrap()
            .values()
            .filter(|issue| issue.updated_at >= floor)
            .cloned()
            .collect())
    }

    fn last_updated_issue(&self) -> HostResult<Option<Issue>> {
        self.check_failure()?;
        Ok(self
            .issues
            .lock()
            .unwrap()
            .values()
            .max_by_key(|issue| issue.updated_at)
            .cloned())
    }

    fn issue(&self, id: &IssueId) -> HostResult<Option<Issue>> {
        self.check_failure()?;
        Ok(self.issues.lock().unwrap().get(id).cloned())
    }

    fn add_label(&self, id: &IssueId, label: &str) -> HostResult<()> {
        let mut issues = self.issues.lock().unwrap();
        let issue = issues
            .get_mut(id)
            .ok_or_else(|| HostError::Permanent(format!("no such issue: {}", id)))?;
        if !issue.labels.iter().any(|l| l == label) {
            issue.labels.push(label.to_string());
        }
        Ok(())
    }

    fn remove_label(&self, id: &IssueId, label: &str) -> HostResult<()> {
        let mut issues = self.issues.lock().unwrap();
        let issue = issues
            .get_mut(id)
            .ok_or_else(|| HostError::Permanent(format!("no such issue: {}", id)))?;
        issue.labels.retain(|l| l != label);
        Ok(())
    }

    fn timestamp_precision(&self) -> Duration {
        self.precision
    }
}

/// An in-memory hosted repository.
///
/// The `url` may point at a local path (e.g., a bare git repository in a
/// tempdir), which is how the git-backed storage and mirror tests drive
/// real VCS operations against a "remote."
pub struct InMemoryHostedRepository {
    name: RepoName,
    url: String,
    pull_requests: Mutex<Vec<PullRequest>>,
    branches: Mutex<Vec<Branch>>,
}

impl InMemoryHostedRepository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        InMemoryHostedRepository {
            name: RepoName::new(name),
            url: url.into(),
            pull_requests: Mutex::new(Vec::new()),
            branches: Mutex::new(Vec::new()),
        }
    }

    pub fn put_pull_request(&self, pr: PullRequest) {
        let mut prs = self.pull_requests.lock().unwrap();
        prs.retain(|existing| existing.id != pr.id);
        prs.push(pr);
    }

    pub fn set_branches(&self, branches: Vec<Branch>) {
        *self.branches.lock().unwrap() = branches;
    }
}

impl HostedRepository for InMemoryHostedRepository {
    fn name(&self) -> &RepoName {
        &self.name
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn pull_requests_updated_after(&self, floor: DateTime<Utc>) -> HostResult<Vec<PullRequest>> {
        Ok(self
            .pull_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|pr| pr.updated_at >= floor)
            .cloned()
            .collect())
    }

    fn branches(&self) -> HostResult<Vec<Branch>> {
        Ok(self.branches.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::IssueState;

    fn issue(id: &str, updated_at: DateTime<Utc>) -> Issue {
        Issue {
            id: IssueId::new(id),
            title: format!("issue {}", id),
            state: IssueState::Open,
            labels: vec![],
            updated_at,
        }
    }

    #[test]
    fn query_floor_is_inclusive() {
        let project = InMemoryIssueProject::new("TEST");
        let t = Utc::now();
        project.put_issue(issue("TEST-1", t));

        let hits = project.issues_updated_after(t).unwrap();
        assert_eq!(hits.len(), 1);

        let misses = project
            .issues_updated_after(t + Duration::seconds(1))
            .unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn add_label_is_idempotent() {
        let project = InMemoryIssueProject::new("TEST");
        let id = IssueId::new("TEST-1");
        project.put_issue(issue("TEST-1", Utc::now()));

        project.add_label(&id, "ready").unwrap();
        project.add_label(&id, "ready").unwrap();

        let labels = project.issue(&id).unwrap().unwrap().labels;
        assert_eq!(labels, vec!["ready".to_string()]);
    }

    #[test]
    fn label_on_missing_issue_is_permanent_error() {
        let project = InMemoryIssueProject::new("TEST");
        let err = project
            .add_label(&IssueId::new("TEST-404"), "ready")
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
