//! A runtime for fleets of forge-automation bots.
//!
//! Bots periodically diff external state (issue trackers, hosted
//! repositories) and emit [`bot::WorkItem`]s; the [`runner`] executes
//! them on a bounded worker pool while serializing items that touch the
//! same external entity. [`poller`] provides at-least-once incremental
//! update detection against eventually consistent backends, and
//! [`storage`] persists small ledgers in git with optimistic
//! concurrency. All effects must be idempotent: the runner keeps no
//! completed-work state, and any item may run again.

pub mod bot;
pub mod bots;
pub mod config;
pub mod host;
pub mod poller;
pub mod runner;
pub mod storage;
pub mod types;
pub mod vcs;
