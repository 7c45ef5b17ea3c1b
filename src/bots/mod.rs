//! The concrete bots.
//!
//! Each bot is thin policy code over the poller, storage, and VCS
//! primitives: it diffs some piece of external state and emits work
//! items. Everything effectful lives in the items themselves so that a
//! failed or re-run item never leaves a bot in a half-updated state.

mod issues;
mod mirror;
mod topological;

pub use issues::{IssueBot, IssueWorkItem};
pub use mirror::MirrorBot;
pub use topological::{topo_sort, CycleError, DependencyEdge, TopologicalBot};
