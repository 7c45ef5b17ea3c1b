//! A hosted repository reached purely through git.
//!
//! Covers the forge operations that need no API client at all: branch
//! listing via `ls-remote` and clone/fetch/push via the URL. Pull
//! request queries are a forge API concern and are not available here.

use chrono::{DateTime, Utc};

use super::{HostError, HostResult, HostedRepository, PullRequest};
use crate::types::{Branch, RepoName};
use crate::vcs;

pub struct GitRemote {
    name: RepoName,
    url: String,
}

impl GitRemote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        GitRemote {
            name: RepoName::new(name),
            url: url.into(),
        }
    }
}

impl HostedRepository for GitRemote {
    fn name(&self) -> &RepoName {
        &self.name
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn pull_requests_updated_after(&self, _floor: DateTime<Utc>) -> HostResult<Vec<PullRequest>> {
        Err(HostError::Permanent(format!(
            "{} is a plain git remote without pull requests",
            self.name
        )))
    }

    fn branches(&self) -> HostResult<Vec<Branch>> {
        // Remote failures are worth retrying on a later pass.
        let heads = vcs::remote_branches(&self.url)
            .map_err(|e| HostError::Transient(e.to_string()))?;
        Ok(heads.into_iter().map(|(name, _)| Branch::new(name)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::{CommitIdentity, Repository};
    use tempfile::TempDir;

    #[test]
    fn branches_reflect_the_remote() {
        let remote_dir = TempDir::new().unwrap();
        Repository::init_bare(remote_dir.path()).unwrap();
        let url = remote_dir.path().to_str().unwrap().to_string();

        let work = TempDir::new().unwrap();
        let repo = Repository::init(work.path()).unwrap();
        std::fs::write(repo.root().join("a.txt"), "hello\n").unwrap();
        repo.add("a.txt").unwrap();
        let hash = repo
            .commit("seed", &CommitIdentity::new("duke", "duke@example.org"))
            .unwrap();
        repo.push(&hash, &url, "main").unwrap();

        let remote = GitRemote::new("test/repo", &url);
        assert_eq!(remote.branches().unwrap(), vec![Branch::new("main")]);
    }

    #[test]
    fn pull_requests_are_unavailable() {
        let remote = GitRemote::new("test/repo", "/nowhere");
        let err = remote.pull_requests_updated_after(Utc::now()).unwrap_err();
        assert!(!err.is_transient());
    }
}
