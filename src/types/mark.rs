//! Marks: position correspondences between two VCS history spaces.
//!
//! An incremental history conversion (e.g., Mercurial to git) needs to
//! remember where it left off. A mark records that position: a
//! monotonically increasing key plus the commit hash in each history
//! space, optionally with a tag commit hash. Marks are never reused and
//! never deleted; the mark ledger only grows.
//!
//! Ledger line format (space-delimited, sorted by key on rewrite):
//!
//! ```text
//! <key> <hg-hash> <git-hash>
//! <key> <hg-hash> <git-hash> <tag-hash>
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::ids::CommitHash;

/// Error parsing a mark ledger line.
#[derive(Debug, Error)]
pub enum MarkParseError {
    #[error("expected 3 or 4 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid mark key: {0}")]
    InvalidKey(String),
}

/// A correspondence between a position in two version-control history
/// representations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mark {
    key: u64,
    hg: CommitHash,
    git: CommitHash,
    tag: Option<CommitHash>,
}

impl Mark {
    pub fn new(key: u64, hg: CommitHash, git: CommitHash) -> Self {
        Mark {
            key,
            hg,
            git,
            tag: None,
        }
    }

    pub fn with_tag(key: u64, hg: CommitHash, git: CommitHash, tag: CommitHash) -> Self {
        Mark {
            key,
            hg,
            git,
            tag: Some(tag),
        }
    }

    /// The sequence key. Monotonically increasing across a ledger, never
    /// reused.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn hg(&self) -> &CommitHash {
        &self.hg
    }

    pub fn git(&self) -> &CommitHash {
        &self.git
    }

    pub fn tag(&self) -> Option<&CommitHash> {
        self.tag.as_ref()
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{} {} {} {}", self.key, self.hg, self.git, tag),
            None => write!(f, "{} {} {}", self.key, self.hg, self.git),
        }
    }
}

impl FromStr for Mark {
    type Err = MarkParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(MarkParseError::FieldCount(fields.len()));
        }
        let key: u64 = fields[0]
            .parse()
            .map_err(|_| MarkParseError::InvalidKey(fields[0].to_string()))?;
        let hg = CommitHash::new(fields[1]);
        let git = CommitHash::new(fields[2]);
        Ok(match fields.get(3) {
            Some(tag) => Mark::with_tag(key, hg, git, CommitHash::new(*tag)),
            None => Mark::new(key, hg, git),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_field_line() {
        let mark: Mark = "7 aaa bbb".parse().unwrap();
        assert_eq!(mark.key(), 7);
        assert_eq!(mark.hg().as_str(), "aaa");
        assert_eq!(mark.git().as_str(), "bbb");
        assert!(mark.tag().is_none());
    }

    #[test]
    fn parses_tag_field() {
        let mark: Mark = "7 aaa bbb ccc".parse().unwrap();
        assert_eq!(mark.tag().unwrap().as_str(), "ccc");
    }

    #[test]
    fn display_matches_ledger_format() {
        let mark = Mark::new(1, CommitHash::new("aaa"), CommitHash::new("bbb"));
        assert_eq!(mark.to_string(), "1 aaa bbb");

        let tagged = Mark::with_tag(
            2,
            CommitHash::new("aaa"),
            CommitHash::new("bbb"),
            CommitHash::new("ccc"),
        );
        assert_eq!(tagged.to_string(), "2 aaa bbb ccc");
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!("1 aaa".parse::<Mark>().is_err());
        assert!("1 a b c d".parse::<Mark>().is_err());
    }

    #[test]
    fn rejects_non_numeric_key() {
        assert!("x aaa bbb".parse::<Mark>().is_err());
    }

    #[test]
    fn orders_by_key() {
        let a = Mark::new(1, CommitHash::new("zzz"), CommitHash::new("zzz"));
        let b = Mark::new(2, CommitHash::new("aaa"), CommitHash::new("aaa"));
        assert!(a < b);
    }
}
