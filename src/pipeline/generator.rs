use crate::pipeline::{Batch, BatchGenerator, GeneratorAlgo};
use crate::queue::{InsertStatus, TokenQueue};
use crate::timing::{IntervalReport, IntervalTimer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Runs one or more [`GeneratorAlgo`] instances in their own threads,
/// funnelling the batches they produce into a shared bounded queue.
///
/// The last worker to exhaust its algo shuts the queue down, so
/// [`BatchGenerator::next_batch`] returns an empty batch exactly when every
/// source is done. `reset` joins the workers, recovers their (rewound) algos
/// and respawns them so the generator can feed another run.
pub struct ThreadedBatchGenerator<G: GeneratorAlgo> {
    batch_size: usize,
    collect_timings: bool,
    queue: Arc<TokenQueue<Batch<G::Token>>>,
    workers: Mutex<Vec<JoinHandle<G>>>,
    active_workers: Arc<AtomicUsize>,
    timer: Arc<IntervalTimer>,
}

impl<G: GeneratorAlgo + 'static> ThreadedBatchGenerator<G> {
    /// Create a generator for `batch_size`-slot batches with a bounded
    /// internal queue (`queue_capacity` 0 means unbounded).
    pub fn new(batch_size: usize, collect_timings: bool, queue_capacity: usize) -> Self {
        assert!(batch_size > 0, "batch size must be greater than zero");

        Self {
            batch_size,
            collect_timings,
            queue: Arc::new(TokenQueue::new(queue_capacity)),
            workers: Mutex::new(Vec::new()),
            active_workers: Arc::new(AtomicUsize::new(0)),
            timer: Arc::new(IntervalTimer::new()),
        }
    }

    /// Spawn one worker thread per generator algo.
    ///
    /// Panics if the generator was already started without an intervening
    /// exhaustion + `reset` (single-owner discipline, misuse is fail-fast).
    pub fn start(&self, algos: Vec<G>) {
        assert!(!algos.is_empty(), "cannot start a generator with no algos");

        let mut workers = self.workers.lock().expect("generator worker list poisoned");
        assert!(
            workers.is_empty(),
            "generator started while workers are still registered"
        );
        assert!(
            self.queue.is_empty(),
            "generator started with tokens left over from a previous run"
        );

        debug!("Starting {} generator worker(s)", algos.len());
        self.active_workers.store(algos.len(), Ordering::SeqCst);

        for algo in algos {
            let queue = Arc::clone(&self.queue);
            let active = Arc::clone(&self.active_workers);
            let timer = Arc::clone(&self.timer);
            let collect_timings = self.collect_timings;

            workers.push(thread::spawn(move || {
                worker_loop(algo, queue, active, timer, collect_timings)
            }));
        }
    }
}

fn worker_loop<G: GeneratorAlgo>(
    mut algo: G,
    queue: Arc<TokenQueue<Batch<G::Token>>>,
    active: Arc<AtomicUsize>,
    timer: Arc<IntervalTimer>,
    collect_timings: bool,
) -> G {
    loop {
        let start = timer.now();
        let batch = algo.next_batch();

        if collect_timings && !batch.is_empty() {
            timer.add_interval(start);
        }

        if batch.is_empty() {
            // last worker standing closes the queue
            if active.fetch_sub(1, Ordering::SeqCst) == 1 {
                trace!("Last generator worker finished; shutting batch queue down");
                queue.shut_down();
            }
            return algo;
        }

        if let InsertStatus::ShutDown(_) = queue.insert(batch) {
            warn!("Generator batch queue shut down while a worker was still producing");
            active.fetch_sub(1, Ordering::SeqCst);
            return algo;
        }
    }
}

impl<G: GeneratorAlgo + 'static> BatchGenerator<G::Token> for ThreadedBatchGenerator<G> {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn next_batch(&self) -> Batch<G::Token> {
        self.queue.get().unwrap_or_default()
    }

    fn reset(&self) {
        let mut workers = self.workers.lock().expect("generator worker list poisoned");
        if workers.is_empty() {
            return;
        }

        // workers only exit once their algo is exhausted, so joining here
        // cannot block on a live queue
        let mut algos = Vec::with_capacity(workers.len());
        for worker in workers.drain(..) {
            match worker.join() {
                Ok(algo) => algos.push(algo),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }

        assert!(
            self.queue.is_empty(),
            "generator reset before its batches were drained"
        );
        assert_eq!(self.active_workers.load(Ordering::SeqCst), 0);

        // the exhausted algos have rewound themselves; rearm for the next run
        self.queue.reopen();
        self.active_workers.store(algos.len(), Ordering::SeqCst);

        debug!("Restarting {} generator worker(s) after reset", algos.len());
        for algo in algos {
            let queue = Arc::clone(&self.queue);
            let active = Arc::clone(&self.active_workers);
            let timer = Arc::clone(&self.timer);
            let collect_timings = self.collect_timings;

            workers.push(thread::spawn(move || {
                worker_loop(algo, queue, active, timer, collect_timings)
            }));
        }
    }

    fn timing_report(&self) -> IntervalReport {
        self.timer.report()
    }
}

impl<G: GeneratorAlgo> Drop for ThreadedBatchGenerator<G> {
    fn drop(&mut self) {
        // unblock and detach any still-running workers; their queue inserts
        // will be refused and they will exit
        self.queue.shut_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts up to `limit` in singleton batches, rewinding on exhaustion.
    struct CountingAlgo {
        next: u64,
        limit: u64,
    }

    impl CountingAlgo {
        fn new(limit: u64) -> Self {
            Self { next: 0, limit }
        }
    }

    impl GeneratorAlgo for CountingAlgo {
        type Token = u64;

        fn next_batch(&mut self) -> Batch<u64> {
            if self.next >= self.limit {
                self.next = 0;
                return Vec::new();
            }

            let batch = vec![Some(self.next)];
            self.next += 1;
            batch
        }
    }

    fn drain(generator: &ThreadedBatchGenerator<CountingAlgo>) -> Vec<u64> {
        let mut tokens = Vec::new();
        loop {
            let batch = generator.next_batch();
            if batch.is_empty() {
                return tokens;
            }
            tokens.extend(batch.into_iter().flatten());
        }
    }

    #[test]
    fn test_single_worker_produces_all_batches() {
        let generator = ThreadedBatchGenerator::new(1, false, 2);
        generator.start(vec![CountingAlgo::new(20)]);

        let mut tokens = drain(&generator);
        tokens.sort_unstable();
        assert_eq!(tokens, (0..20).collect::<Vec<_>>());

        // exhausted: subsequent calls keep returning empty
        assert!(generator.next_batch().is_empty());
    }

    #[test]
    fn test_multiple_workers_funnel_into_one_queue() {
        let generator = ThreadedBatchGenerator::new(1, false, 4);
        generator.start(vec![CountingAlgo::new(10), CountingAlgo::new(10)]);

        let tokens = drain(&generator);
        assert_eq!(tokens.len(), 20);
    }

    #[test]
    fn test_reset_supports_a_second_identical_run() {
        let generator = ThreadedBatchGenerator::new(1, false, 2);
        generator.start(vec![CountingAlgo::new(5)]);

        let mut first = drain(&generator);
        generator.reset();
        let mut second = drain(&generator);

        first.sort_unstable();
        second.sort_unstable();
        assert_eq!(first, second);
    }

    #[test]
    fn test_timing_collection() {
        let generator = ThreadedBatchGenerator::new(1, true, 2);
        generator.start(vec![CountingAlgo::new(8)]);
        drain(&generator);
        generator.reset();

        assert_eq!(generator.timing_report().intervals, 8);
    }

    #[test]
    fn test_reset_before_start_is_a_no_op() {
        let generator: ThreadedBatchGenerator<CountingAlgo> =
            ThreadedBatchGenerator::new(1, false, 2);
        generator.reset();
        assert_eq!(generator.batch_size(), 1);
    }
}
