//! The batch-oriented token pipeline core.
//!
//! A pipeline stage is a [`TokenProcess`] pulling batches from a
//! [`BatchGenerator`], routing each batch slot to the [`ProcessingUnit`] of
//! the same index, and draining results into a [`BatchConsumer`]. Stages are
//! chained through a [`BatchIntermediary`], which is a consumer for the
//! upstream stage and a generator for the downstream one.

pub mod generator;
pub mod intermediary;
pub mod process;
pub mod unit;

pub use generator::ThreadedBatchGenerator;
pub use intermediary::BatchIntermediary;
pub use process::TokenProcess;
pub use unit::{ProcessingUnit, UnitInsertStatus, UnitResultStatus, UnitState};

use crate::timing::IntervalReport;

/// An ordered set of batch slots.
///
/// Position `i` is the routing key: the token in slot `i` is always handled
/// by processing unit `i`. A terminal batch may leave trailing slots vacant
/// (`None`); an empty `Vec` is the sentinel for "generator exhausted".
pub type Batch<T> = Vec<Option<T>>;

/// A pluggable batch source driven from its own thread.
///
/// Implementations are stateful and single-threaded per instance; a
/// [`ThreadedBatchGenerator`] spawns one thread per instance.
pub trait GeneratorAlgo: Send {
    type Token: Send + 'static;

    /// Produce the next batch; an empty batch means permanently exhausted.
    fn next_batch(&mut self) -> Batch<Self::Token>;
}

/// The generator side of a pipeline stage, shared with the coordinator.
pub trait BatchGenerator<T: Send>: Send + Sync {
    /// Number of slots per batch
    fn batch_size(&self) -> usize;

    /// Dequeue one batch; empty once the source is exhausted.
    fn next_batch(&self) -> Batch<T>;

    /// Restore the generator for another run (called by the coordinator
    /// after each run).
    fn reset(&self);

    /// Accumulated per-batch production timings
    fn timing_report(&self) -> IntervalReport {
        IntervalReport::default()
    }
}

/// A pluggable per-token transform owned by one processing unit.
///
/// Algorithms are single-threaded; the surrounding unit supplies the
/// concurrency. After `notify_no_more_tokens`, `insert` must not be called
/// and `try_get_result` keeps returning results until it returns `None`.
pub trait ProcessorAlgo: Send + 'static {
    type Token: Send + 'static;
    type Result: Send + 'static;
    /// Construction parameters, moved into the worker thread
    type Pack: Send + 'static;

    fn new(pack: Self::Pack) -> Self;

    /// Accept a token; zero or more results may become pending.
    fn insert(&mut self, token: Self::Token);

    /// Non-blocking result poll
    fn try_get_result(&mut self) -> Option<Self::Result>;

    /// No more tokens will be inserted; remaining results must be prepared.
    fn notify_no_more_tokens(&mut self);

    /// Whether a result is currently pending
    fn has_results(&self) -> bool;
}

/// The sink side of a pipeline stage, shared with the coordinator.
pub trait BatchConsumer<T: Send>: Send + Sync {
    /// Terminal result produced once all tokens are consumed
    type Final;

    /// Number of slots per batch
    fn batch_size(&self) -> usize;

    /// Consume one per-unit result from the given batch slot
    fn consume(&self, token: T, batch_index: usize);

    /// Produce the terminal result and reset consumer state
    fn finalize(&self) -> Self::Final;

    /// Accumulated per-consume timings
    fn timing_report(&self) -> IntervalReport {
        IntervalReport::default()
    }
}

/// Resolve a thread budget: 0 means hardware concurrency, never below 1.
pub fn thread_budget(max_threads: usize) -> usize {
    if max_threads > 0 {
        return max_threads;
    }

    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
