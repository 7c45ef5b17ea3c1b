//! Label synchronization driven by an issue poller.
//!
//! The poller decides *which* issues to look at; the work item decides
//! *what* to do with one, against a fresh snapshot fetched at execution
//! time. The snapshot re-fetch matters: the poller's view may be
//! minutes old by the time a parked item finally runs.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::bot::{ItemKey, WorkItem, WorkItemError};
use crate::host::{Issue, IssueProject, IssueState};
use crate::poller::IssuePoller;
use crate::types::BotName;

/// Keeps a configured label in sync with issue state: present while the
/// issue is open, absent once it closes.
pub struct IssueBot {
    name: BotName,
    project: Arc<dyn IssueProject>,
    label: String,
    poller: Arc<Mutex<IssuePoller>>,
}

impl IssueBot {
    pub fn new(
        name: BotName,
        project: Arc<dyn IssueProject>,
        label: impl Into<String>,
        poller: IssuePoller,
    ) -> Self {
        IssueBot {
            name,
            project,
            label: label.into(),
            poller: Arc::new(Mutex::new(poller)),
        }
    }

    pub fn name(&self) -> &BotName {
        &self.name
    }

    pub fn periodic_items(&self) -> Vec<Box<dyn WorkItem>> {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        let issues = match poller.updated_issues() {
            Ok(issues) => issues,
            Err(e) => {
                // The poller keeps its cursor; the next tick retries.
                warn!(project = self.project.name(), error = %e, "cannot query issues");
                return Vec::new();
            }
        };
        let items: Vec<Box<dyn WorkItem>> = issues
            .into_iter()
            .map(|issue| {
                Box::new(IssueWorkItem {
                    bot: self.name.clone(),
                    project: self.project.clone(),
                    label: self.label.clone(),
                    issue,
                    poller: self.poller.clone(),
                }) as Box<dyn WorkItem>
            })
            .collect();
        // Candidates derived; anything dropped from here on must come
        // back through an explicit retry registration.
        poller.last_batch_handled();
        items
    }
}

/// Synchronizes the label on a single issue.
pub struct IssueWorkItem {
    bot: BotName,
    project: Arc<dyn IssueProject>,
    label: String,
    issue: Issue,
    poller: Arc<Mutex<IssuePoller>>,
}

impl fmt::Display for IssueWorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IssueWorkItem@{}#{}", self.project.name(), self.issue.id)
    }
}

impl WorkItem for IssueWorkItem {
    fn key(&self) -> ItemKey {
        ItemKey::new(self.bot.clone(), "issue-label", self.issue.id.as_str())
    }

    fn run(&self, _scratch: &Path) -> Result<Vec<Box<dyn WorkItem>>, WorkItemError> {
        let current = match self.project.issue(&self.issue.id)? {
            Some(issue) => issue,
            None => {
                // Deleted since the poll; nothing to synchronize.
                debug!(issue = %self.issue.id, "issue vanished before processing");
                return Ok(Vec::new());
            }
        };

        let labeled = current.labels.iter().any(|l| *l == self.label);
        match current.state {
            IssueState::Open if !labeled => {
                self.project.add_label(&current.id, &self.label)?;
                info!(issue = %current.id, label = %self.label, "added label");
            }
            IssueState::Closed if labeled => {
                self.project.remove_label(&current.id, &self.label)?;
                info!(issue = %current.id, label = %self.label, "removed label");
            }
            _ => {
                debug!(issue = %current.id, "label already in sync");
            }
        }
        Ok(Vec::new())
    }

    /// Transient failures re-register the issue with the poller so the
    /// next batch includes it again; permanent failures are dropped
    /// after reporting.
    fn handle_error(&self, error: &WorkItemError) {
        if error.is_transient() {
            warn!(item = %self, %error, "transient failure - scheduling retry");
            self.poller
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retry_issue(self.issue.clone());
        } else {
            tracing::error!(item = %self, %error, "work item failed");
        }
    }
}
