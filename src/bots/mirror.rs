//! Branch mirroring between two hosted repositories.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::bot::{ItemKey, WorkItem, WorkItemError};
use crate::host::HostedRepository;
use crate::types::{Branch, BotName};
use crate::vcs::Repository;

/// Mirrors branches from a source repository to a destination.
///
/// Every scheduling pass produces one item; the item fetches each
/// selected branch from the source and pushes it to the destination.
/// Mirroring is naturally idempotent: a branch already at the right
/// hash produces an up-to-date push.
pub struct MirrorBot {
    name: BotName,
    source: Arc<dyn HostedRepository>,
    destination: Arc<dyn HostedRepository>,
    /// Branches to mirror; empty means every branch the source reports.
    branches: Vec<Branch>,
}

impl MirrorBot {
    pub fn new(
        name: BotName,
        source: Arc<dyn HostedRepository>,
        destination: Arc<dyn HostedRepository>,
        branches: Vec<Branch>,
    ) -> Self {
        MirrorBot {
            name,
            source,
            destination,
            branches,
        }
    }

    pub fn name(&self) -> &BotName {
        &self.name
    }

    pub fn periodic_items(&self) -> Vec<Box<dyn WorkItem>> {
        vec![Box::new(MirrorWorkItem {
            bot: self.name.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
            branches: self.branches.clone(),
        })]
    }
}

struct MirrorWorkItem {
    bot: BotName,
    source: Arc<dyn HostedRepository>,
    destination: Arc<dyn HostedRepository>,
    branches: Vec<Branch>,
}

impl fmt::Display for MirrorWorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MirrorWorkItem@{}->{}",
            self.source.name(),
            self.destination.name()
        )
    }
}

impl WorkItem for MirrorWorkItem {
    fn key(&self) -> ItemKey {
        ItemKey::new(self.bot.clone(), "mirror", self.destination.name().as_str())
    }

    /// Anything else writing to the destination repository conflicts,
    /// whatever kind of item it is.
    fn concurrent_with(&self, other: &dyn WorkItem) -> bool {
        other.key().entity != self.destination.name().as_str()
    }

    fn run(&self, scratch: &Path) -> Result<Vec<Box<dyn WorkItem>>, WorkItemError> {
        let path = scratch.join(format!(
            "mirror-{}",
            self.destination.name().as_str().replace('/', "-")
        ));
        let local = match Repository::open(&path) {
            Some(repo) => repo,
            None => Repository::init(&path)?,
        };

        let branches = if self.branches.is_empty() {
            self.source.branches()?
        } else {
            self.branches.clone()
        };

        let source_url = self.source.url();
        let destination_url = self.destination.url();
        for branch in &branches {
            let hash = local.fetch(&source_url, branch.as_str())?;
            debug!(%branch, hash = %hash.short(), "mirroring branch");
            local.push(&hash, &destination_url, branch.as_str())?;
        }
        info!(
            source = %self.source.name(),
            destination = %self.destination.name(),
            branches = branches.len(),
            "mirrored branches"
        );
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::InMemoryHostedRepository;
    use crate::vcs::CommitIdentity;
    use tempfile::TempDir;

    fn seeded_remote(dir: &TempDir, branch: &str) -> String {
        Repository::init_bare(dir.path()).unwrap();
        let url = dir.path().to_str().unwrap().to_string();

        let work = TempDir::new().unwrap();
        let repo = Repository::init(work.path()).unwrap();
        std::fs::write(repo.root().join("a.txt"), "hello\n").unwrap();
        repo.add("a.txt").unwrap();
        let hash = repo
            .commit("seed", &CommitIdentity::new("duke", "duke@example.org"))
            .unwrap();
        repo.push(&hash, &url, branch).unwrap();
        url
    }

    #[test]
    fn mirrors_a_branch_to_the_destination() {
        let source_dir = TempDir::new().unwrap();
        let source_url = seeded_remote(&source_dir, "main");

        let destination_dir = TempDir::new().unwrap();
        Repository::init_bare(destination_dir.path()).unwrap();
        let destination_url = destination_dir.path().to_str().unwrap().to_string();

        let source = Arc::new(InMemoryHostedRepository::new("upstream/repo", &source_url));
        let destination =
            Arc::new(InMemoryHostedRepository::new("mirror/repo", &destination_url));
        let bot = MirrorBot::new(
            BotName::new("mirror"),
            source,
            destination,
            vec![Branch::new("main")],
        );

        let items = bot.periodic_items();
        assert_eq!(items.len(), 1);
        let scratch = TempDir::new().unwrap();
        items[0].run(scratch.path()).unwrap();

        // The destination now has the source's branch head.
        let probe_dir = TempDir::new().unwrap();
        let probe = Repository::init(probe_dir.path()).unwrap();
        let mirrored = probe.fetch(&destination_url, "main").unwrap();
        let original = probe.fetch(&source_url, "main").unwrap();
        assert_eq!(mirrored, original);
    }

    #[test]
    fn mirroring_twice_is_idempotent() {
        let source_dir = TempDir::new().unwrap();
        let source_url = seeded_remote(&source_dir, "main");

        let destination_dir = TempDir::new().unwrap();
        Repository::init_bare(destination_dir.path()).unwrap();
        let destination_url = destination_dir.path().to_str().unwrap().to_string();

        let source = Arc::new(InMemoryHostedRepository::new("upstream/repo", &source_url));
        source.set_branches(vec![Branch::new("main")]);
        let destination =
            Arc::new(InMemoryHostedRepository::new("mirror/repo", &destination_url));
        // Empty branch list: mirror whatever the source reports.
        let bot = MirrorBot::new(BotName::new("mirror"), source, destination, Vec::new());

        let scratch = TempDir::new().unwrap();
        for _ in 0..2 {
            for item in bot.periodic_items() {
                item.run(scratch.path()).unwrap();
            }
        }
    }

    #[test]
    fn items_for_the_same_destination_conflict() {
        let source = Arc::new(InMemoryHostedRepository::new("upstream/repo", "unused"));
        let destination = Arc::new(InMemoryHostedRepository::new("mirror/repo", "unused"));
        let bot = MirrorBot::new(
            BotName::new("mirror"),
            source,
            destination,
            vec![Branch::new("main")],
        );

        let first = bot.periodic_items().pop().unwrap();
        let second = bot.periodic_items().pop().unwrap();
        assert!(!first.concurrent_with(second.as_ref()));
    }
}
