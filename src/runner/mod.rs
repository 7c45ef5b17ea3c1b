//! The central scheduling loop.
//!
//! Each tick: COLLECT (ask every bot for its ready items) → SERIALIZE
//! (conflicting items are never in flight together) → DISPATCH (onto a
//! fixed-size worker pool, one scratch directory per in-flight item) →
//! AWAIT/REAP (follow-up items feed straight back in; parked items are
//! re-examined whenever something finishes).
//!
//! One scheduler thread drives a pool of blocking worker threads; there
//! is no async runtime, and no item-level cancellation — once dispatched,
//! an item runs to completion or fails. A failure is isolated to its
//! item: it is logged with the bot and item identity, the item's
//! `handle_error` hook runs, and the rest of the tick is unaffected.
//!
//! The runner keeps no record of completed work. The same logical item
//! may be re-derived and re-run on the next tick, so every bot action
//! must be naturally idempotent; only the action layer knows what
//! "already done" means for that action.

mod config;

pub use config::{ConfigError, RunnerConfig};

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bot::{Bot, WorkItem, WorkItemError};

/// `run_once` gave up waiting for in-flight items.
#[derive(Debug, Error)]
#[error("timed out waiting for work items to drain")]
pub struct DrainTimeout;

struct Job {
    token: u64,
    item: Arc<dyn WorkItem>,
}

/// Worker pool messages. Workers themselves hold senders (for follow-up
/// dispatch), so shutdown must be an explicit message rather than
/// channel closure.
enum Message {
    Work(Job),
    Shutdown,
}

struct ActiveItem {
    item: Arc<dyn WorkItem>,
    since: Instant,
}

#[derive(Default)]
struct State {
    /// Items waiting for a conflicting active item to finish.
    pending: Vec<Arc<dyn WorkItem>>,
    /// Items submitted to the pool, keyed by dispatch token.
    active: HashMap<u64, ActiveItem>,
    /// Scratch directories not currently owned by an executing item.
    scratch: VecDeque<PathBuf>,
    next_token: u64,
}

struct Shared {
    state: Mutex<State>,
    /// Signaled whenever pending and active both become empty.
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatches `item` if it conflicts with nothing active, otherwise
    /// parks it pending. A parked item replaces an already pending item
    /// of the same bot and kind that it conflicts with — the newer
    /// candidate obsoletes the older one.
    fn submit_or_schedule(&self, item: Arc<dyn WorkItem>, tx: &Sender<Message>) {
        let mut state = self.lock();
        let conflicting = state
            .active
            .values()
            .any(|active| !active.item.concurrent_with(item.as_ref()));
        if conflicting {
            let key = item.key();
            if let Some(position) = state.pending.iter().position(|pending| {
                let pending_key = pending.key();
                pending_key.bot == key.bot
                    && pending_key.kind == key.kind
                    && !pending.concurrent_with(item.as_ref())
            }) {
                debug!(
                    discarded = %state.pending[position],
                    favored = %item,
                    "discarding obsoleted pending item"
                );
                state.pending.remove(position);
            }
            debug!(item = %item, "parking item until conflicting work finishes");
            state.pending.push(item);
        } else {
            Self::dispatch(&mut state, item, tx);
        }
    }

    fn dispatch(state: &mut State, item: Arc<dyn WorkItem>, tx: &Sender<Message>) {
        let token = state.next_token;
        state.next_token += 1;
        state.active.insert(
            token,
            ActiveItem {
                item: item.clone(),
                since: Instant::now(),
            },
        );
        debug!(item = %item, "submitting item");
        // The channel is unbounded; workers pick jobs up as slots free.
        let _ = tx.send(Message::Work(Job { token, item }));
    }

    /// Reaps a finished item: returns its scratch directory, submits its
    /// follow-ups, and re-examines parked items against the remaining
    /// active set.
    fn complete(
        &self,
        token: u64,
        scratch: PathBuf,
        followups: Vec<Box<dyn WorkItem>>,
        tx: &Sender<Message>,
    ) {
        // Follow-ups first, as the originating item is still marked
        // active: a follow-up conflicting with its originator parks and
        // is promoted below.
        for followup in followups {
            self.submit_or_schedule(Arc::from(followup), tx);
        }

        let mut state = self.lock();
        state.scratch.push_back(scratch);
        state.active.remove(&token);

        // Some parked items may now be eligible.
        let mut index = 0;
        while index < state.pending.len() {
            let eligible = state
                .active
                .values()
                .all(|active| active.item.concurrent_with(state.pending[index].as_ref()));
            if eligible {
                let item = state.pending.remove(index);
                Self::dispatch(&mut state, item, tx);
            } else {
                index += 1;
            }
        }

        if state.pending.is_empty() && state.active.is_empty() {
            self.idle.notify_all();
        }
    }

    /// Reports items that have been active longer than `timeout`. The
    /// timer resets on report so each overdue item is reported once per
    /// timeout period rather than continuously.
    fn watchdog(&self, timeout: Duration) {
        let mut state = self.lock();
        for active in state.active.values_mut() {
            let running_for = active.since.elapsed();
            if running_for > timeout {
                error!(
                    item = %active.item,
                    ?running_for,
                    "item has been active suspiciously long - this may be an error"
                );
                active.since = Instant::now();
            }
        }
    }

    fn drain(&self, timeout: Duration) -> Result<(), DrainTimeout> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !(state.pending.is_empty() && state.active.is_empty()) {
            let now = Instant::now();
            if now >= deadline {
                return Err(DrainTimeout);
            }
            let (next, _) = self
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        Ok(())
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Arc<Mutex<Receiver<Message>>>, tx: Sender<Message>) {
    loop {
        let job = {
            let receiver = rx.lock().unwrap_or_else(PoisonError::into_inner);
            match receiver.recv() {
                Ok(Message::Work(job)) => job,
                Ok(Message::Shutdown) | Err(_) => return,
            }
        };

        // Pool size equals scratch directory count and each running
        // worker owns at most one, so one is always available here.
        let scratch = {
            let mut state = shared.lock();
            match state.scratch.pop_front() {
                Some(path) => path,
                None => {
                    warn!(item = %job.item, "no scratch path available - re-parking item");
                    let item = job.item.clone();
                    state.active.remove(&job.token);
                    state.pending.push(item);
                    continue;
                }
            }
        };

        debug!(item = %job.item, scratch = %scratch.display(), "executing item");
        let outcome = catch_unwind(AssertUnwindSafe(|| job.item.run(&scratch)));
        let followups = match outcome {
            Ok(Ok(followups)) => followups,
            Ok(Err(e)) => {
                error!(item = %job.item, error = %e, "exception during item execution");
                job.item.handle_error(&e);
                Vec::new()
            }
            Err(panic) => {
                let error = WorkItemError::Invariant(panic_message(panic));
                error!(item = %job.item, error = %error, "item panicked");
                job.item.handle_error(&error);
                Vec::new()
            }
        };
        debug!(item = %job.item, "item is now done");

        shared.complete(job.token, scratch, followups, &tx);
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The scheduler: owns the registered bots and the worker pool.
pub struct Runner {
    config: RunnerConfig,
    bots: Vec<Bot>,
    shared: Arc<Shared>,
    tx: Option<Sender<Message>>,
    workers: Vec<JoinHandle<()>>,
}

impl Runner {
    /// Builds a runner: validates the configuration, creates the scratch
    /// directories, and spawns the worker pool.
    pub fn new(config: RunnerConfig, bots: Vec<Bot>) -> Result<Self, RunnerBuildError> {
        config.validate()?;

        let mut scratch = VecDeque::new();
        for index in 0..config.concurrency {
            let path = config.scratch_root.join(format!("scratch-{}", index));
            std::fs::create_dir_all(&path)?;
            scratch.push_back(path);
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                scratch,
                ..State::default()
            }),
            idle: Condvar::new(),
        });

        let (tx, rx) = channel::<Message>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(config.concurrency);
        for index in 0..config.concurrency {
            let shared = shared.clone();
            let rx = rx.clone();
            let tx = tx.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("worker-{}", index))
                    .spawn(move || worker_loop(shared, rx, tx))?,
            );
        }

        Ok(Runner {
            config,
            bots,
            shared,
            tx: Some(tx),
            workers,
        })
    }

    /// Submits a single externally produced item, bypassing the bots.
    pub fn submit(&self, item: Box<dyn WorkItem>) {
        if let Some(tx) = &self.tx {
            self.shared.submit_or_schedule(Arc::from(item), tx);
        }
    }

    /// One COLLECT phase: gathers and submits every bot's ready items.
    fn check_periodic_items(&self) {
        debug!("starting check for periodic items");
        for bot in &self.bots {
            let items = bot.periodic_items();
            debug!(bot = %bot, count = items.len(), "collected periodic items");
            for item in items {
                self.submit(item);
            }
        }
        debug!("done checking periodic items");
    }

    /// Runs forever at the configured interval.
    pub fn run(self) {
        info!(
            interval = ?self.config.interval,
            concurrency = self.config.concurrency,
            "starting runner"
        );
        loop {
            self.check_periodic_items();
            self.shared.watchdog(self.config.watchdog_timeout);
            std::thread::sleep(self.config.interval);
        }
    }

    /// Collects periodic items once and waits for everything (including
    /// follow-ups) to drain.
    pub fn run_once(&self, timeout: Duration) -> Result<(), DrainTimeout> {
        info!(concurrency = self.config.concurrency, "starting single runner pass");
        self.check_periodic_items();
        self.shared.drain(timeout)
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            for _ in &self.workers {
                let _ = tx.send(Message::Shutdown);
            }
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Failure constructing a [`Runner`].
#[derive(Debug, Error)]
pub enum RunnerBuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create scratch directories: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::ItemKey;
    use crate::types::BotName;
    use std::fmt;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Execution trace shared by test items: (entity, enter, exit).
    type Trace = Arc<Mutex<Vec<(String, Instant, Instant)>>>;

    struct TestItem {
        kind: &'static str,
        entity: String,
        busy: Duration,
        trace: Trace,
        followups: Mutex<Vec<TestItem>>,
        fail: bool,
        failures: Option<Arc<AtomicUsize>>,
    }

    impl TestItem {
        fn new(kind: &'static str, entity: &str, trace: &Trace) -> Self {
            TestItem {
                kind,
                entity: entity.to_string(),
                busy: Duration::from_millis(50),
                trace: trace.clone(),
                followups: Mutex::new(Vec::new()),
                fail: false,
                failures: None,
            }
        }
    }

    impl fmt::Display for TestItem {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}@{}", self.kind, self.entity)
        }
    }

    impl WorkItem for TestItem {
        fn key(&self) -> ItemKey {
            ItemKey::new(BotName::new("test"), self.kind, &self.entity)
        }

        fn run(&self, _scratch: &Path) -> Result<Vec<Box<dyn WorkItem>>, WorkItemError> {
            let enter = Instant::now();
            std::thread::sleep(self.busy);
            if self.fail {
                if let Some(failures) = &self.failures {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
                return Err(WorkItemError::Invariant("injected failure".to_string()));
            }
            let exit = Instant::now();
            self.trace
                .lock()
                .unwrap()
                .push((self.entity.clone(), enter, exit));
            let followups = std::mem::take(&mut *self.followups.lock().unwrap());
            Ok(followups
                .into_iter()
                .map(|item| Box::new(item) as Box<dyn WorkItem>)
                .collect())
        }
    }

    fn runner(concurrency: usize, scratch: &TempDir) -> Runner {
        let config = RunnerConfig {
            concurrency,
            ..RunnerConfig::new(scratch.path())
        };
        Runner::new(config, Vec::new()).unwrap()
    }

    #[test]
    fn conflicting_items_never_overlap() {
        let scratch = TempDir::new().unwrap();
        let runner = runner(4, &scratch);
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));

        // Same kind and entity: all mutually conflicting.
        for _ in 0..5 {
            runner.submit(Box::new(TestItem::new("conflict", "repo-a", &trace)));
        }
        runner.run_once(Duration::from_secs(30)).unwrap();

        let trace = trace.lock().unwrap();
        // Obsoleted pending items may have been discarded, but at least
        // the first and one survivor ran.
        assert!(trace.len() >= 2);
        let mut intervals: Vec<(Instant, Instant)> =
            trace.iter().map(|(_, enter, exit)| (*enter, *exit)).collect();
        intervals.sort_by_key(|(enter, _)| *enter);
        for pair in intervals.windows(2) {
            assert!(
                pair[0].1 <= pair[1].0,
                "conflicting executions overlapped in time"
            );
        }
    }

    #[test]
    fn independent_items_run_in_parallel() {
        let scratch = TempDir::new().unwrap();
        let runner = runner(4, &scratch);
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));

        let started = Instant::now();
        for entity in ["a", "b", "c", "d"] {
            let mut item = TestItem::new("independent", entity, &trace);
            item.busy = Duration::from_millis(200);
            runner.submit(Box::new(item));
        }
        runner.run_once(Duration::from_secs(30)).unwrap();

        // Four 200ms items on four workers: far less than serial time.
        assert!(started.elapsed() < Duration::from_millis(700));
        assert_eq!(trace.lock().unwrap().len(), 4);
    }

    #[test]
    fn followups_run_within_the_same_pass() {
        let scratch = TempDir::new().unwrap();
        let runner = runner(2, &scratch);
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));

        let parent = TestItem::new("cascade", "parent", &trace);
        parent
            .followups
            .lock()
            .unwrap()
            .push(TestItem::new("cascade", "child", &trace));
        runner.submit(Box::new(parent));
        runner.run_once(Duration::from_secs(30)).unwrap();

        let entities: Vec<String> = trace
            .lock()
            .unwrap()
            .iter()
            .map(|(entity, _, _)| entity.clone())
            .collect();
        assert_eq!(entities, vec!["parent".to_string(), "child".to_string()]);
    }

    #[test]
    fn conflicting_followup_waits_for_nothing_but_still_runs() {
        let scratch = TempDir::new().unwrap();
        let runner = runner(2, &scratch);
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));

        // Follow-up conflicts with its originator (same kind + entity).
        let parent = TestItem::new("cascade", "same", &trace);
        parent
            .followups
            .lock()
            .unwrap()
            .push(TestItem::new("cascade", "same", &trace));
        runner.submit(Box::new(parent));
        runner.run_once(Duration::from_secs(30)).unwrap();

        assert_eq!(trace.lock().unwrap().len(), 2);
    }

    #[test]
    fn failure_is_isolated_to_the_failing_item() {
        let scratch = TempDir::new().unwrap();
        let runner = runner(2, &scratch);
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(AtomicUsize::new(0));

        let mut failing = TestItem::new("flaky", "bad", &trace);
        failing.fail = true;
        failing.failures = Some(failures.clone());
        runner.submit(Box::new(failing));
        runner.submit(Box::new(TestItem::new("solid", "good", &trace)));
        runner.run_once(Duration::from_secs(30)).unwrap();

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        let trace = trace.lock().unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].0, "good");
    }

    #[test]
    fn watchdog_reports_overdue_items_and_resets_their_timer() {
        let scratch = TempDir::new().unwrap();
        let runner = runner(1, &scratch);
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));

        let mut slow = TestItem::new("slow", "overdue", &trace);
        slow.busy = Duration::from_millis(500);
        runner.submit(Box::new(slow));
        // Let the item run well past the timeout.
        std::thread::sleep(Duration::from_millis(100));

        {
            let state = runner.shared.lock();
            let active = state.active.values().next().unwrap();
            assert!(active.since.elapsed() >= Duration::from_millis(100));
        }

        runner.shared.watchdog(Duration::from_millis(10));

        // Reporting resets the timer, so an overdue item is reported
        // once per timeout period instead of continuously.
        {
            let state = runner.shared.lock();
            let active = state.active.values().next().unwrap();
            assert!(active.since.elapsed() < Duration::from_millis(90));
        }

        runner.run_once(Duration::from_secs(30)).unwrap();
    }

    #[test]
    fn run_once_times_out_on_stuck_work() {
        let scratch = TempDir::new().unwrap();
        let runner = runner(1, &scratch);
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));

        let mut slow = TestItem::new("slow", "x", &trace);
        slow.busy = Duration::from_secs(5);
        runner.submit(Box::new(slow));

        assert!(runner.run_once(Duration::from_millis(100)).is_err());
    }
}
