//! Incremental change detection over externally owned data sources.
//!
//! The backends answer one kind of question: "everything updated at or
//! after T." That query is not trustworthy on its own: timestamps are
//! coarser than real event ordering, reads can lag writes, and a process
//! restart loses the in-memory cursor. The pollers in this module turn
//! that query into "exactly what is logically new since last time":
//!
//! - [`IssuePoller`]: two-phase peek/acknowledge polling with an overlap
//!   pad and a retry set. Safe to call speculatively during scheduling;
//!   nothing is lost if the process dies before the batch is acted on.
//! - [`UpdatedIssuePoller`] / [`UpdatedPullRequestPoller`]: single-phase
//!   high-water-mark polling for bots that act immediately.

mod issues;
mod updated;

pub use issues::IssuePoller;
pub use updated::{UpdatedIssuePoller, UpdatedPullRequestPoller};
