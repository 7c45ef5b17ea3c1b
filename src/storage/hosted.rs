//! Git-backed storage with optimistic-concurrency push retry.
//!
//! The ledger file lives at a configured ref of a remote repository.
//! `put` commits the merged file locally and pushes; when the push is
//! rejected because another process advanced the ref, the loop fetches
//! the remote head, resets the local working copy onto it, re-applies
//! the merge on top of the other writer's entries, and retries. This
//! merge-then-retry shape is load-bearing: simplifying it to
//! last-writer-wins loses concurrent writers' entries.

use std::path::Path;

use tracing::debug;

use super::file::FileStorage;
use super::{Storage, StorageDefinition, StorageError, StorageResult};
use crate::host::HostedRepository;
use crate::types::CommitHash;
use crate::vcs::{CommitIdentity, Repository, VcsError};

/// Maximum number of non-progressing push attempts before giving up.
const MAX_PUSH_ATTEMPTS: u32 = 10;

/// A ledger mirrored into a ref of a remote git repository.
pub struct HostedStorage<T> {
    url: String,
    refname: String,
    file_name: String,
    author: CommitIdentity,
    message: String,
    local: Repository,
    file: FileStorage<T>,
    /// Entries as of the last state successfully pushed (or fetched).
    synced: Vec<T>,
}

impl<T: Clone + Ord + Send> HostedStorage<T> {
    pub(crate) fn materialize(
        definition: StorageDefinition<T>,
        repository: &dyn HostedRepository,
        refname: String,
        directory: impl AsRef<Path>,
    ) -> StorageResult<Self> {
        let directory = directory.as_ref();
        let url = repository.url();
        let file_name = definition.file_name().to_string();
        let author = definition.author().clone();
        let message = definition.message().to_string();

        let local = match Repository::materialize(directory, &url, &refname) {
            Ok(repo) => repo,
            Err(VcsError::RefNotFound { .. }) => {
                // First materialization: create the ref with an empty
                // ledger. If this push fails the remote is genuinely
                // unusable, which is fatal.
                let repo = Repository::open(directory).ok_or_else(|| {
                    StorageError::Materialize {
                        refname: refname.clone(),
                        reason: "local repository vanished during materialization".to_string(),
                    }
                })?;
                std::fs::write(directory.join(&file_name), "")?;
                repo.add(&file_name)?;
                let first = repo.commit(&message, &author)?;
                repo.push(&first, &url, &refname)
                    .map_err(|e| StorageError::Materialize {
                        refname: refname.clone(),
                        reason: e.to_string(),
                    })?;
                repo
            }
            Err(e) => {
                // Any failure other than "ref doesn't exist" is fatal.
                return Err(StorageError::Materialize {
                    refname,
                    reason: e.to_string(),
                });
            }
        };

        let mut file = FileStorage::materialize(definition, directory)?;
        let synced = file.current()?;
        Ok(HostedStorage {
            url,
            refname,
            file_name,
            author,
            message,
            local,
            file,
            synced,
        })
    }
}

impl<T: Clone + Ord + Send> Storage<T> for HostedStorage<T> {
    fn current(&mut self) -> StorageResult<Vec<T>> {
        self.file.current()
    }

    fn put(&mut self, items: &[T]) -> StorageResult<()> {
        let mut attempts = 0;
        let mut last_remote: Option<CommitHash> = None;

        loop {
            // Merge into the working copy on top of whatever base we
            // currently have.
            let merged = self.file.put_merged(items)?;
            if merged == self.synced {
                // Nothing actually changed relative to the pushed state.
                return Ok(());
            }

            self.local.add(&self.file_name)?;
            let hash = self.local.commit(&self.message, &self.author)?;
            match self.local.push(&hash, &self.url, &self.refname) {
                Ok(()) => {
                    self.synced = merged;
                    return Ok(());
                }
                Err(rejection @ VcsError::PushRejected { .. }) => {
                    debug!(refname = %self.refname, "storage push rejected, fetching remote head");
                    let remote = self.local.fetch(&self.url, &self.refname)?;
                    if last_remote.as_ref() != Some(&remote) {
                        // The remote moved: reset onto it and re-apply the
                        // merge. Catching up with remote changes is
                        // progress, so it does not consume an attempt.
                        self.local.checkout_hard(&remote)?;
                        self.synced = self.file.current()?;
                        last_remote = Some(remote);
                        continue;
                    }
                    attempts += 1;
                    if attempts >= MAX_PUSH_ATTEMPTS {
                        debug!(error = %rejection, "storage push retries exhausted");
                        return Err(StorageError::RetryExhausted { attempts });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
