//! Ready-made ledger definitions for VCS conversion state.

use std::fmt;
use std::str::FromStr;

use super::StorageDefinition;
use crate::types::{CommitHash, Mark, RepoName, Tag};

/// The ledger of marks produced by an incremental history conversion.
///
/// One line per mark, sorted by sequence key, stored as `marks.txt`.
pub fn mark_ledger() -> StorageDefinition<Mark> {
    StorageDefinition::new(
        "marks.txt",
        |mark: &Mark| mark.key().to_string(),
        |mark: &Mark| mark.to_string(),
        |line: &str| Mark::from_str(line).map_err(|e| e.to_string()),
    )
    .committed_by("duke", "duke@openjdk.org", "Updated marks")
}

/// A converted tag: the tag name and the commit it points at in the
/// destination history space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TagRecord {
    pub tag: Tag,
    pub hash: CommitHash,
}

impl TagRecord {
    pub fn new(tag: Tag, hash: CommitHash) -> Self {
        TagRecord { tag, hash }
    }
}

impl fmt::Display for TagRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tag, self.hash)
    }
}

impl FromStr for TagRecord {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [tag, hash] => Ok(TagRecord::new(
                Tag::new(*tag),
                CommitHash::new(*hash),
            )),
            _ => Err(format!("expected 2 fields, got {}", fields.len())),
        }
    }
}

/// The per-repository ledger of converted tags, stored as
/// `<repo>.tags.txt`.
pub fn tag_ledger(repo: &RepoName) -> StorageDefinition<TagRecord> {
    // Repository names may contain '/', which is not a valid file name.
    let sanitized = repo.as_str().replace('/', "-");
    StorageDefinition::new(
        format!("{}.tags.txt", sanitized),
        |record: &TagRecord| record.tag.as_str().to_string(),
        |record: &TagRecord| record.to_string(),
        |line: &str| TagRecord::from_str(line),
    )
    .committed_by("duke", "duke@openjdk.org", "Updated tags")
}
