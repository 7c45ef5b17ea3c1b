//! Core domain types shared across the crate.

mod ids;
mod mark;

pub use ids::{BotName, Branch, CommitHash, IssueId, RepoName, Tag};
pub use mark::{Mark, MarkParseError};
