//! Durable, mergeable persistence of sets of ledger entries.
//!
//! A storage holds a set of entries of type `T`, serialized one entry per
//! line into a single flat file, sorted by key on every rewrite. Updates
//! are merge-by-key: putting entries never discards existing entries with
//! other keys, and re-putting an entry with an existing key replaces it.
//!
//! Two backings exist:
//! - [`FileStorage`]: a plain local file.
//! - [`HostedStorage`]: the same file mirrored into a ref of a remote
//!   git repository, with an optimistic-concurrency retry loop on push
//!   conflicts. The retry loop is the only cross-process coordination
//!   mechanism in the system and must merge, never overwrite: two
//!   processes appending concurrently both keep their entries.
//!
//! A single storage value must not be shared between threads; the work
//! items that own one are mutually non-concurrent by construction.

mod file;
mod hosted;
pub mod marks;

pub use file::FileStorage;
pub use hosted::HostedStorage;

use std::path::Path;

use thiserror::Error;

use crate::host::HostedRepository;
use crate::vcs::{CommitIdentity, VcsError};

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("VCS error: {0}")]
    Vcs(#[from] VcsError),

    #[error("cannot parse ledger line {line:?}: {reason}")]
    Parse { line: String, reason: String },

    /// The optimistic push loop gave up. Fatal for this operation.
    #[error("push retry count exceeded after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// The remote ref could not be materialized or created.
    #[error("cannot materialize storage ref {refname}: {reason}")]
    Materialize { refname: String, reason: String },
}

impl StorageError {
    /// Returns true if retrying the operation later could succeed.
    /// Exhausted push retries are contention and may clear up; a ledger
    /// that fails to parse or materialize will not.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(_) | StorageError::RetryExhausted { .. } => true,
            StorageError::Vcs(e) => e.is_transient(),
            StorageError::Parse { .. } | StorageError::Materialize { .. } => false,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Serializes one entry to one ledger line (without trailing newline).
pub type SerializeFn<T> = fn(&T) -> String;

/// Parses one ledger line into an entry.
pub type DeserializeFn<T> = fn(&str) -> Result<T, String>;

/// Extracts the merge key of an entry. Entries with equal keys replace
/// each other on `put`.
pub type KeyFn<T> = fn(&T) -> String;

/// Immutable description of a ledger: file name, line codec, merge key,
/// and the commit identity used when the ledger is git-backed.
///
/// Constructed fully before use; there is no partially configured state.
#[derive(Clone)]
pub struct StorageDefinition<T> {
    file_name: String,
    key_of: KeyFn<T>,
    serialize: SerializeFn<T>,
    deserialize: DeserializeFn<T>,
    author: CommitIdentity,
    message: String,
}

impl<T: Clone + Ord + Send> StorageDefinition<T> {
    pub fn new(
        file_name: impl Into<String>,
        key_of: KeyFn<T>,
        serialize: SerializeFn<T>,
        deserialize: DeserializeFn<T>,
    ) -> Self {
        StorageDefinition {
            file_name: file_name.into(),
            key_of,
            serialize,
            deserialize,
            author: CommitIdentity::new("forge-fleet", "forge-fleet@localhost"),
            message: "Updated ledger".to_string(),
        }
    }

    /// Sets the commit author and message used for git-backed storage.
    pub fn committed_by(
        mut self,
        name: impl Into<String>,
        email: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.author = CommitIdentity::new(name, email);
        self.message = message.into();
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub(crate) fn author(&self) -> &CommitIdentity {
        &self.author
    }

    pub(crate) fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn key_of(&self, entry: &T) -> String {
        (self.key_of)(entry)
    }

    pub(crate) fn serialize_entries(&self, entries: &[T]) -> String {
        let mut sorted: Vec<&T> = entries.iter().collect();
        sorted.sort();
        let mut text = String::new();
        for entry in sorted {
            text.push_str(&(self.serialize)(entry));
            text.push('\n');
        }
        text
    }

    pub(crate) fn deserialize_text(&self, text: &str) -> StorageResult<Vec<T>> {
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = (self.deserialize)(line).map_err(|reason| StorageError::Parse {
                line: line.to_string(),
                reason,
            })?;
            entries.push(entry);
        }
        entries.sort();
        Ok(entries)
    }

    /// Materializes a purely local storage in `directory`.
    pub fn materialize_local(self, directory: impl AsRef<Path>) -> StorageResult<FileStorage<T>> {
        FileStorage::materialize(self, directory)
    }

    /// Materializes a storage mirrored into `refname` of a remote
    /// repository, with `directory` as the local working copy.
    pub fn materialize_remote(
        self,
        repository: &dyn HostedRepository,
        refname: impl Into<String>,
        directory: impl AsRef<Path>,
    ) -> StorageResult<HostedStorage<T>> {
        HostedStorage::materialize(self, repository, refname.into(), directory)
    }
}

/// Common interface over the storage backings.
pub trait Storage<T>: Send {
    /// The current set of entries, sorted by key.
    fn current(&mut self) -> StorageResult<Vec<T>>;

    /// Merges `items` into the stored set by key and persists the result.
    fn put(&mut self, items: &[T]) -> StorageResult<()>;
}
