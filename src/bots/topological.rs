//! Dependency-ordered branch merging.
//!
//! Branches declare which other branches they depend on; every pass
//! merges each branch's dependencies into it in topologically sorted
//! order, so a change landing in a root branch propagates through the
//! whole chain within a single pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::bot::{ItemKey, WorkItem, WorkItemError};
use crate::host::HostedRepository;
use crate::types::{Branch, BotName};
use crate::vcs::{CommitIdentity, Repository};

/// A declared dependency: `branch` must receive merges from
/// `depends_on` before anything that depends on `branch` in turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub branch: Branch,
    pub depends_on: Branch,
}

impl DependencyEdge {
    pub fn new(branch: impl Into<Branch>, depends_on: impl Into<Branch>) -> Self {
        DependencyEdge {
            branch: branch.into(),
            depends_on: depends_on.into(),
        }
    }
}

/// The dependency graph contains a cycle, so no merge order exists.
#[derive(Debug, Error)]
#[error("cyclic branch dependencies involving: {}", .involved.iter().map(|b| b.as_str()).collect::<Vec<_>>().join(", "))]
pub struct CycleError {
    /// Branches left over once every acyclic prefix has been peeled off.
    pub involved: Vec<Branch>,
}

/// Orders every branch mentioned in `edges` so each branch appears
/// after all of its dependencies. Ties break alphabetically, making the
/// order deterministic. A cycle is an error, never a silently chosen
/// order.
pub fn topo_sort(edges: &[DependencyEdge]) -> Result<Vec<Branch>, CycleError> {
    let mut dependencies: BTreeMap<Branch, BTreeSet<Branch>> = BTreeMap::new();
    for edge in edges {
        dependencies
            .entry(edge.branch.clone())
            .or_default()
            .insert(edge.depends_on.clone());
        dependencies.entry(edge.depends_on.clone()).or_default();
    }

    let mut order = Vec::with_capacity(dependencies.len());
    while !dependencies.is_empty() {
        let ready: Vec<Branch> = dependencies
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(branch, _)| branch.clone())
            .collect();
        if ready.is_empty() {
            return Err(CycleError {
                involved: dependencies.keys().cloned().collect(),
            });
        }
        for branch in ready {
            dependencies.remove(&branch);
            for deps in dependencies.values_mut() {
                deps.remove(&branch);
            }
            order.push(branch);
        }
    }
    Ok(order)
}

/// Merges dependency branches through a repository in topological order.
pub struct TopologicalBot {
    name: BotName,
    repository: Arc<dyn HostedRepository>,
    edges: Vec<DependencyEdge>,
    identity: CommitIdentity,
}

impl TopologicalBot {
    pub fn new(
        name: BotName,
        repository: Arc<dyn HostedRepository>,
        edges: Vec<DependencyEdge>,
        identity: CommitIdentity,
    ) -> Self {
        TopologicalBot {
            name,
            repository,
            edges,
            identity,
        }
    }

    pub fn name(&self) -> &BotName {
        &self.name
    }

    pub fn periodic_items(&self) -> Vec<Box<dyn WorkItem>> {
        vec![Box::new(TopologicalWorkItem {
            bot: self.name.clone(),
            repository: self.repository.clone(),
            edges: self.edges.clone(),
            identity: self.identity.clone(),
        })]
    }
}

struct TopologicalWorkItem {
    bot: BotName,
    repository: Arc<dyn HostedRepository>,
    edges: Vec<DependencyEdge>,
    identity: CommitIdentity,
}

impl TopologicalWorkItem {
    /// Merges every dependency of `branch` into it and pushes the result.
    fn merge_branch(&self, local: &Repository, branch: &Branch) -> Result<(), WorkItemError> {
        let dependencies: Vec<&Branch> = self
            .edges
            .iter()
            .filter(|edge| edge.branch == *branch)
            .map(|edge| &edge.depends_on)
            .collect();
        if dependencies.is_empty() {
            return Ok(());
        }
        local.checkout_branch(branch.as_str())?;
        // Catch up with the remote branch before merging anything into it.
        let remote_branch = format!("origin/{}", branch);
        if local.resolve(&remote_branch)?.is_some() {
            local.merge(&remote_branch, &self.identity)?;
        }
        for dependency in dependencies {
            // A dependency merged earlier in the pass exists as a local
            // branch ahead of its remote-tracking ref; prefer it.
            let rev = match local.resolve(dependency.as_str())? {
                Some(_) => dependency.as_str().to_string(),
                None => format!("origin/{}", dependency),
            };
            local.merge(&rev, &self.identity)?;
        }
        let head = local.head()?;
        local.push(&head, &self.repository.url(), branch.as_str())?;
        info!(%branch, head = %head.short(), "merged dependencies");
        Ok(())
    }
}

impl fmt::Display for TopologicalWorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopologicalWorkItem@{}", self.repository.name())
    }
}

impl WorkItem for TopologicalWorkItem {
    fn key(&self) -> ItemKey {
        ItemKey::new(
            self.bot.clone(),
            "topological-merge",
            self.repository.name().as_str(),
        )
    }

    /// Conflicts with anything touching the same repository.
    fn concurrent_with(&self, other: &dyn WorkItem) -> bool {
        other.key().entity != self.repository.name().as_str()
    }

    fn run(&self, scratch: &Path) -> Result<Vec<Box<dyn WorkItem>>, WorkItemError> {
        let order = topo_sort(&self.edges)
            .map_err(|cycle| WorkItemError::Invariant(cycle.to_string()))?;

        let url = self.repository.url();
        let path = scratch.join(format!(
            "topological-{}",
            self.repository.name().as_str().replace('/', "-")
        ));
        let local = match Repository::open(&path) {
            Some(repo) => {
                repo.fetch_all()?;
                repo
            }
            None => Repository::clone(&url, &path)?,
        };

        // A failed merge does not block unrelated branches later in the
        // order; the first failure is still reported for this pass.
        let mut first_failure = None;
        for branch in &order {
            if let Err(e) = self.merge_branch(&local, branch) {
                error!(%branch, error = %e, "cannot merge dependencies");
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::InMemoryHostedRepository;
    use tempfile::TempDir;

    fn edge(branch: &str, depends_on: &str) -> DependencyEdge {
        DependencyEdge::new(branch, depends_on)
    }

    #[test]
    fn dependencies_sort_before_dependents() {
        // C depends on B depends on A.
        let order = topo_sort(&[edge("c", "b"), edge("b", "a")]).unwrap();
        assert_eq!(
            order,
            vec![Branch::new("a"), Branch::new("b"), Branch::new("c")]
        );
    }

    #[test]
    fn diamond_orders_both_middles_before_the_join() {
        let order = topo_sort(&[
            edge("d", "b"),
            edge("d", "c"),
            edge("b", "a"),
            edge("c", "a"),
        ])
        .unwrap();
        let position =
            |name: &str| order.iter().position(|b| b.as_str() == name).unwrap();
        assert!(position("a") < position("b"));
        assert!(position("a") < position("c"));
        assert!(position("b") < position("d"));
        assert!(position("c") < position("d"));
    }

    #[test]
    fn cycle_is_an_explicit_error() {
        let err = topo_sort(&[edge("a", "b"), edge("b", "a")]).unwrap_err();
        assert_eq!(
            err.involved,
            vec![Branch::new("a"), Branch::new("b")]
        );
    }

    #[test]
    fn sort_is_deterministic_for_independent_branches() {
        let order = topo_sort(&[edge("z", "root"), edge("a", "root")]).unwrap();
        assert_eq!(
            order,
            vec![Branch::new("root"), Branch::new("a"), Branch::new("z")]
        );
    }

    fn identity() -> CommitIdentity {
        CommitIdentity::new("duke", "duke@example.org")
    }

    /// Builds a bare remote with branches main <- dev <- feature, where
    /// each child is a stale copy of its parent.
    fn seeded_remote(dir: &TempDir) -> String {
        Repository::init_bare(dir.path()).unwrap();
        let url = dir.path().to_str().unwrap().to_string();

        let work = TempDir::new().unwrap();
        let repo = Repository::init(work.path()).unwrap();
        std::fs::write(repo.root().join("base.txt"), "base\n").unwrap();
        repo.add("base.txt").unwrap();
        let base = repo.commit("base", &identity()).unwrap();
        for branch in ["main", "dev", "feature"] {
            repo.push(&base, &url, branch).unwrap();
        }

        // Advance main past the others.
        std::fs::write(repo.root().join("new.txt"), "new\n").unwrap();
        repo.add("new.txt").unwrap();
        let tip = repo.commit("advance main", &identity()).unwrap();
        repo.push(&tip, &url, "main").unwrap();
        url
    }

    #[test]
    fn change_in_root_propagates_through_the_chain() {
        let remote_dir = TempDir::new().unwrap();
        let url = seeded_remote(&remote_dir);
        let repository = Arc::new(InMemoryHostedRepository::new("test/chained", &url));

        let bot = TopologicalBot::new(
            BotName::new("topological"),
            repository,
            vec![edge("dev", "main"), edge("feature", "dev")],
            identity(),
        );

        let scratch = TempDir::new().unwrap();
        for item in bot.periodic_items() {
            item.run(scratch.path()).unwrap();
        }

        // feature now contains main's tip.
        let probe_dir = TempDir::new().unwrap();
        let probe = Repository::init(probe_dir.path()).unwrap();
        let main = probe.fetch(&url, "main").unwrap();
        let feature = probe.fetch(&url, "feature").unwrap();
        assert!(probe.is_ancestor(&main, &feature).unwrap());
    }

    #[test]
    fn cyclic_configuration_fails_the_item() {
        let repository = Arc::new(InMemoryHostedRepository::new("test/cyclic", "unused"));
        let bot = TopologicalBot::new(
            BotName::new("topological"),
            repository,
            vec![edge("a", "b"), edge("b", "a")],
            identity(),
        );

        let scratch = TempDir::new().unwrap();
        let item = bot.periodic_items().pop().unwrap();
        let err = item.run(scratch.path()).err().unwrap();
        assert!(matches!(err, WorkItemError::Invariant(_)));
    }
}
