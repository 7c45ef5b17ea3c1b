//! The unit-of-work contract between bots and the runner.
//!
//! Bots produce [`WorkItem`]s; the runner executes them on a bounded
//! worker pool. Items carry their own conflict predicate so the runner
//! can serialize work that touches the same external state without a
//! central lock manager. Identity is always by stable keys (repository
//! name, issue id), never by object identity: items are constructed
//! fresh on every scheduling pass, and two fresh instances for the same
//! logical entity must still be detected as conflicting.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::error;

use crate::bots::{IssueBot, MirrorBot, TopologicalBot};
use crate::host::HostError;
use crate::storage::StorageError;
use crate::types::BotName;
use crate::vcs::VcsError;

/// Failure executing a work item.
///
/// Transient external errors are candidates for re-scheduling via the
/// item's own retry logic; invariant violations abort the item for this
/// cycle. Either way the failure never crosses into another item.
#[derive(Debug, Error)]
pub enum WorkItemError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A broken precondition the item cannot recover from (corrupted
    /// local repository, vanished scratch directory, cyclic ordering).
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl WorkItemError {
    /// Returns true if re-running the item later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkItemError::Host(e) => e.is_transient(),
            WorkItemError::Vcs(e) => e.is_transient(),
            WorkItemError::Storage(e) => e.is_transient(),
            WorkItemError::Io(_) => true,
            WorkItemError::Invariant(_) => false,
        }
    }
}

/// Stable identity of a work item, used for conflict detection and for
/// replacing obsoleted pending items.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    /// The owning bot.
    pub bot: BotName,
    /// The kind of work (one per work-item type).
    pub kind: &'static str,
    /// The external entity the item is bound to (repository name,
    /// issue id, destination branch).
    pub entity: String,
}

impl ItemKey {
    pub fn new(bot: BotName, kind: &'static str, entity: impl Into<String>) -> Self {
        ItemKey {
            bot,
            kind,
            entity: entity.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.bot, self.kind, self.entity)
    }
}

/// A unit of work bound to one external entity.
///
/// Items are immutable once created; re-running the same logical work
/// means constructing a new item. `run` must be safe to invoke multiple
/// times with different scratch paths.
pub trait WorkItem: Send + Sync + fmt::Display {
    /// The item's stable identity.
    fn key(&self) -> ItemKey;

    /// Returns true if this item and `other` touch disjoint external
    /// state and may execute in parallel.
    ///
    /// The default conflicts exactly with items of the same kind bound
    /// to the same entity. Items with a wider conflict domain (a whole
    /// repository, say) override this.
    fn concurrent_with(&self, other: &dyn WorkItem) -> bool {
        let (mine, theirs) = (self.key(), other.key());
        !(mine.kind == theirs.kind && mine.entity == theirs.entity)
    }

    /// Executes the item using a private scratch directory, returning
    /// zero or more follow-up items to schedule immediately.
    fn run(&self, scratch: &Path) -> Result<Vec<Box<dyn WorkItem>>, WorkItemError>;

    /// Invoked by the runner when `run` fails. The default reports the
    /// failure; items backed by a poller override this to register a
    /// retry instead of dropping the work.
    fn handle_error(&self, error: &WorkItemError) {
        error!(item = %self, %error, "work item failed");
    }
}

/// The closed set of bot kinds.
///
/// New kinds of bot are added by extending this enum, not by subclassing
/// an open hierarchy. Each variant owns its configuration and any
/// long-lived cursors (pollers); all state needed across runs beyond
/// that is persisted through storage by the work items themselves.
pub enum Bot {
    Mirror(MirrorBot),
    Topological(TopologicalBot),
    Issues(IssueBot),
}

impl Bot {
    /// The bot's configured name.
    pub fn name(&self) -> &BotName {
        match self {
            Bot::Mirror(bot) => bot.name(),
            Bot::Topological(bot) => bot.name(),
            Bot::Issues(bot) => bot.name(),
        }
    }

    /// Computes the bot's currently ready work items. Called on every
    /// scheduler tick; must be fast and non-blocking relative to actual
    /// execution — expensive work belongs in [`WorkItem::run`].
    pub fn periodic_items(&self) -> Vec<Box<dyn WorkItem>> {
        match self {
            Bot::Mirror(bot) => bot.periodic_items(),
            Bot::Topological(bot) => bot.periodic_items(),
            Bot::Issues(bot) => bot.periodic_items(),
        }
    }
}

impl fmt::Display for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The runner shares `Arc<dyn WorkItem>` between its scheduler and
    /// worker threads, so the trait object must be `Send + Sync`.
    #[test]
    fn work_item_trait_objects_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn WorkItem>();
    }

    #[test]
    fn transience_is_classified_per_variant() {
        let rejected = WorkItemError::Vcs(VcsError::PushRejected {
            stderr: String::new(),
        });
        assert!(rejected.is_transient());

        let conflict = WorkItemError::Vcs(VcsError::MergeConflict {
            rev: "main".to_string(),
        });
        assert!(!conflict.is_transient());

        let missing_ref = WorkItemError::Vcs(VcsError::RefNotFound {
            refname: "marks".to_string(),
        });
        assert!(!missing_ref.is_transient());

        let corrupt = WorkItemError::Storage(StorageError::Parse {
            line: "not a mark".to_string(),
            reason: "expected 3 or 4 fields, got 1".to_string(),
        });
        assert!(!corrupt.is_transient());

        let contended = WorkItemError::Storage(StorageError::RetryExhausted { attempts: 10 });
        assert!(contended.is_transient());

        assert!(!WorkItemError::Invariant("cycle".to_string()).is_transient());
    }
}
