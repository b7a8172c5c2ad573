use crate::pipeline::ProcessorAlgo;
use crate::queue::{InsertStatus, TokenQueue, TryGetStatus, TryInsertStatus};
use crate::timing::{IntervalReport, IntervalTimer};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{error, trace};

/// Lifecycle of a processing unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Outcome of a non-blocking insert into a unit
#[derive(Debug)]
pub enum UnitInsertStatus<T> {
    Accepted,
    /// Input queue at capacity; the token is handed back
    Full(T),
    /// Input queue lock contended; the token is handed back
    Busy(T),
    /// The unit cannot take tokens (not running, or shut down)
    Failed(T),
}

/// Outcome of a non-blocking result poll from a unit
#[derive(Debug)]
pub enum UnitResultStatus<R> {
    Result(R),
    Empty,
    Busy,
}

/// Condvar pairing the state changes of a unit's two queues, so the
/// coordinator can sleep until either an input slot frees up or a result
/// (or the drained marker) appears.
struct UnblockSignal {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl UnblockSignal {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Wake waiters; takes the signal lock briefly so a waiter that has just
    /// checked its predicate cannot miss the notification.
    fn notify(&self) {
        drop(self.lock.lock().expect("unblock signal lock poisoned"));
        self.condvar.notify_all();
    }

    fn wait_until(&self, predicate: impl Fn() -> bool) {
        let mut guard = self.lock.lock().expect("unblock signal lock poisoned");
        while !predicate() {
            guard = self
                .condvar
                .wait(guard)
                .expect("unblock signal lock poisoned");
        }
    }
}

/// One worker owning a [`ProcessorAlgo`] plus its input and output queues.
///
/// In async mode (the default) the algo lives on a dedicated thread; in
/// synchronous mode (allowed only for single-unit pipelines) the algo runs on
/// the caller's thread and both queues are skipped.
///
/// Owners must `shut_down()` and then spin `try_stop()` to `true` before
/// dropping the unit; dropping a unit that is still running is a bug and
/// fails fast.
pub struct ProcessingUnit<A: ProcessorAlgo> {
    synchronous: bool,
    collect_timings: bool,
    state: UnitState,
    token_queue: Arc<TokenQueue<A::Token>>,
    result_queue: Arc<TokenQueue<A::Result>>,
    unblock: Arc<UnblockSignal>,
    timer: Arc<IntervalTimer>,
    worker: Option<JoinHandle<()>>,
    /// the algo itself, in synchronous mode only
    sync_algo: Option<A>,
}

impl<A: ProcessorAlgo> ProcessingUnit<A> {
    /// Create a unit with the given per-queue capacities (0 means unbounded).
    pub fn new(
        synchronous: bool,
        collect_timings: bool,
        token_capacity: usize,
        result_capacity: usize,
    ) -> Self {
        Self {
            synchronous,
            collect_timings,
            state: UnitState::Idle,
            token_queue: Arc::new(TokenQueue::new(token_capacity)),
            result_queue: Arc::new(TokenQueue::new(result_capacity)),
            unblock: Arc::new(UnblockSignal::new()),
            timer: Arc::new(IntervalTimer::new()),
            worker: None,
            sync_algo: None,
        }
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Construct the algo and transition `Idle -> Running`.
    ///
    /// In async mode the algo is built inside the spawned worker thread so
    /// its state never crosses threads after construction.
    pub fn start(&mut self, pack: A::Pack) {
        assert!(
            self.state == UnitState::Idle,
            "processing unit started twice"
        );

        if self.synchronous {
            self.sync_algo = Some(A::new(pack));
        } else {
            let token_queue = Arc::clone(&self.token_queue);
            let result_queue = Arc::clone(&self.result_queue);
            let unblock = Arc::clone(&self.unblock);
            let timer = Arc::clone(&self.timer);
            let collect_timings = self.collect_timings;

            self.worker = Some(thread::spawn(move || {
                worker_loop::<A>(
                    pack,
                    token_queue,
                    result_queue,
                    unblock,
                    timer,
                    collect_timings,
                );
            }));
        }

        self.state = UnitState::Running;
    }

    /// Offer a token without blocking.
    pub fn try_insert(&mut self, token: A::Token) -> UnitInsertStatus<A::Token> {
        if self.state != UnitState::Running {
            return UnitInsertStatus::Failed(token);
        }

        if self.synchronous {
            let algo = self.sync_algo.as_mut().expect("sync unit missing its algo");
            let start = self.collect_timings.then(Instant::now);
            algo.insert(token);
            if let Some(start) = start {
                self.timer.add_interval(start);
            }
            return UnitInsertStatus::Accepted;
        }

        // a result queue that shut down while the unit is still running means
        // the worker died abnormally; refuse the token so the owner aborts
        if self.result_queue.is_shutting_down() {
            return UnitInsertStatus::Failed(token);
        }

        match self.token_queue.try_insert(token) {
            TryInsertStatus::Accepted => UnitInsertStatus::Accepted,
            TryInsertStatus::Full(token) => UnitInsertStatus::Full(token),
            TryInsertStatus::Busy(token) => UnitInsertStatus::Busy(token),
            TryInsertStatus::ShutDown(token) => UnitInsertStatus::Failed(token),
        }
    }

    /// Poll for a result without blocking.
    pub fn try_get_result(&mut self) -> UnitResultStatus<A::Result> {
        if self.synchronous {
            return match self.sync_algo.as_mut() {
                Some(algo) => match algo.try_get_result() {
                    Some(result) => UnitResultStatus::Result(result),
                    None => UnitResultStatus::Empty,
                },
                None => UnitResultStatus::Empty,
            };
        }

        match self.result_queue.try_get() {
            TryGetStatus::Token(result) => UnitResultStatus::Result(result),
            TryGetStatus::Empty => UnitResultStatus::Empty,
            TryGetStatus::Busy => UnitResultStatus::Busy,
        }
    }

    /// Stop accepting tokens and begin draining.
    ///
    /// Async: shuts the input queue down; the worker drains the algo, force
    /// inserts its final results and shuts the output queue down. Sync:
    /// notifies the algo directly.
    pub fn shut_down(&mut self) {
        if self.state != UnitState::Running {
            return;
        }

        if self.synchronous {
            if let Some(algo) = self.sync_algo.as_mut() {
                algo.notify_no_more_tokens();
            }
        } else {
            self.token_queue.shut_down();
        }

        self.state = UnitState::Draining;
    }

    /// Attempt to observe the unit fully stopped.
    ///
    /// Returns `true` only when the worker has terminated and the output
    /// queue is shut down and empty (async), or the algo has no further
    /// results (sync). Idempotent once stopped.
    pub fn try_stop(&mut self) -> bool {
        match self.state {
            UnitState::Stopped => true,
            UnitState::Draining => {
                if self.synchronous {
                    let done = self
                        .sync_algo
                        .as_ref()
                        .map(|algo| !algo.has_results())
                        .unwrap_or(true);
                    if done {
                        self.sync_algo = None;
                        self.state = UnitState::Stopped;
                    }
                    return done;
                }

                let worker_done = self
                    .worker
                    .as_ref()
                    .map(|worker| worker.is_finished())
                    .unwrap_or(true);

                if worker_done
                    && self.result_queue.is_shutting_down()
                    && self.result_queue.is_empty()
                {
                    if let Some(worker) = self.worker.take() {
                        if let Err(panic) = worker.join() {
                            // a panicking algo is fatal; propagate on join
                            error!("Processing unit worker panicked");
                            std::panic::resume_unwind(panic);
                        }
                    }
                    self.state = UnitState::Stopped;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Sleep until an input slot frees up, a result appears, or the unit
    /// enters its terminal drain. Returns immediately in sync mode.
    pub fn wait_for_unblocking_event(&self) {
        if self.synchronous || self.state == UnitState::Stopped {
            return;
        }

        let token_queue = Arc::clone(&self.token_queue);
        let result_queue = Arc::clone(&self.result_queue);
        self.unblock.wait_until(move || {
            token_queue.is_open()
                || token_queue.is_shutting_down()
                || !result_queue.is_empty()
                || result_queue.is_shutting_down()
        });
    }

    /// Sleep until a result appears or the output queue shuts down. Returns
    /// immediately in sync mode.
    pub fn wait_for_result(&self) {
        if self.synchronous || self.state == UnitState::Stopped {
            return;
        }

        let result_queue = Arc::clone(&self.result_queue);
        self.unblock
            .wait_until(move || !result_queue.is_empty() || result_queue.is_shutting_down());
    }

    /// Accumulated per-token ingestion timings
    pub fn timing_report(&self) -> IntervalReport {
        self.timer.report()
    }
}

fn worker_loop<A: ProcessorAlgo>(
    pack: A::Pack,
    token_queue: Arc<TokenQueue<A::Token>>,
    result_queue: Arc<TokenQueue<A::Result>>,
    unblock: Arc<UnblockSignal>,
    timer: Arc<IntervalTimer>,
    collect_timings: bool,
) {
    // the output queue must shut down even when the algo panics, so an owner
    // sleeping on the unblock condvar always wakes up to observe the death
    struct ShutdownGuard<R: Send + 'static> {
        result_queue: Arc<TokenQueue<R>>,
        unblock: Arc<UnblockSignal>,
    }

    impl<R: Send + 'static> Drop for ShutdownGuard<R> {
        fn drop(&mut self) {
            self.result_queue.shut_down();
            self.unblock.notify();
        }
    }

    let _guard = ShutdownGuard {
        result_queue: Arc::clone(&result_queue),
        unblock: Arc::clone(&unblock),
    };

    let mut algo = A::new(pack);

    while let Some(token) = token_queue.get() {
        // an input slot just freed up
        unblock.notify();

        let start = collect_timings.then(Instant::now);
        algo.insert(token);
        if let Some(start) = start {
            timer.add_interval(start);
        }

        while let Some(result) = algo.try_get_result() {
            // may block on result-queue capacity; the coordinator's
            // alternation between try_insert and try_get_result guarantees
            // this drains
            if let InsertStatus::ShutDown(_) = result_queue.insert(result) {
                error!("Unit result queue shut down while the worker was running");
                return;
            }
            unblock.notify();
        }
    }

    trace!("Unit token queue drained; collecting final results");
    algo.notify_no_more_tokens();

    while let Some(result) = algo.try_get_result() {
        // force insert so the final result cannot deadlock against an owner
        // that has stopped draining
        let _ = result_queue.force_insert(result);
    }

    // the guard shuts the output queue down and notifies on the way out
}

impl<A: ProcessorAlgo> Drop for ProcessingUnit<A> {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }

        assert!(
            matches!(self.state, UnitState::Idle | UnitState::Stopped),
            "processing unit dropped while {:?}; owners must shut_down() then spin try_stop()",
            self.state
        );
    }
}
