use crate::error::{FramepipeError, PipelineError, Result};
use crate::pipeline::{
    BatchConsumer, BatchGenerator, ProcessingUnit, ProcessorAlgo, UnitInsertStatus,
    UnitResultStatus,
};
use crate::timing::{IntervalReport, IntervalTimer};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Coordinator for one pipeline stage.
///
/// Owns N processing units (N = batch size), pulls batches from a shared
/// [`BatchGenerator`], routes the token in slot i to unit i, drains results
/// into a shared [`BatchConsumer`], then shuts the stage down and returns the
/// consumer's final result.
///
/// A process is created once and `run` any number of times; concurrent `run`
/// calls are rejected. Between runs the generator and consumer are reset.
pub struct TokenProcess<A: ProcessorAlgo, F> {
    worker_thread_limit: usize,
    synchronous_allowed: bool,
    collect_timings: bool,
    token_capacity: usize,
    result_capacity: usize,
    batch_size: usize,
    generator: Arc<dyn BatchGenerator<A::Token>>,
    consumer: Arc<dyn BatchConsumer<A::Result, Final = F>>,
    /// single-run enforcement; `run` try-locks this
    run_lock: Mutex<()>,
    /// per-batch pump interval timings
    timer: IntervalTimer,
    /// per-unit ingestion reports harvested at stop time
    unit_reports: Mutex<Vec<IntervalReport>>,
}

impl<A: ProcessorAlgo, F> TokenProcess<A, F> {
    /// Create a coordinator over a generator/consumer pair.
    ///
    /// Fails if the generator and consumer disagree on batch size or the
    /// batch size exceeds the worker thread limit.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_thread_limit: usize,
        synchronous_allowed: bool,
        collect_timings: bool,
        token_capacity: usize,
        result_capacity: usize,
        generator: Arc<dyn BatchGenerator<A::Token>>,
        consumer: Arc<dyn BatchConsumer<A::Result, Final = F>>,
    ) -> Result<Self> {
        let batch_size = generator.batch_size();

        if batch_size != consumer.batch_size() {
            return Err(PipelineError::BatchSizeMismatch {
                generator: batch_size,
                consumer: consumer.batch_size(),
            }
            .into());
        }

        if batch_size == 0 || batch_size > worker_thread_limit {
            return Err(PipelineError::InvalidBatchSize {
                batch_size,
                worker_limit: worker_thread_limit,
            }
            .into());
        }

        Ok(Self {
            worker_thread_limit,
            synchronous_allowed,
            collect_timings,
            token_capacity,
            result_capacity,
            batch_size,
            generator,
            consumer,
            run_lock: Mutex::new(()),
            timer: IntervalTimer::new(),
            unit_reports: Mutex::new(Vec::new()),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn worker_thread_limit(&self) -> usize {
        self.worker_thread_limit
    }

    /// Run the stage to completion with one processor pack per unit.
    pub fn run(&self, packs: Vec<A::Pack>) -> Result<F> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| FramepipeError::from(PipelineError::AlreadyRunning))?;

        if packs.len() != self.batch_size {
            return Err(PipelineError::PackCountMismatch {
                expected: self.batch_size,
                actual: packs.len(),
            }
            .into());
        }

        let synchronous = self.synchronous_allowed && self.batch_size == 1;
        debug!(
            batch_size = self.batch_size,
            synchronous, "Starting token process run"
        );

        let mut units: Vec<ProcessingUnit<A>> = Vec::with_capacity(self.batch_size);
        for pack in packs {
            let mut unit = ProcessingUnit::new(
                synchronous,
                self.collect_timings,
                self.token_capacity,
                self.result_capacity,
            );
            unit.start(pack);
            units.push(unit);
        }

        let pump_result = self.pump(&mut units);

        // shutdown + drain runs on both the success and the error path so
        // units never reach Drop in a running state
        for unit in units.iter_mut() {
            unit.shut_down();
        }
        let drain_result = self.drain(&mut units, pump_result.is_ok());

        if pump_result.is_err() {
            // wind the generator down to exhaustion so reset cannot block on
            // still-producing workers
            while !self.generator.next_batch().is_empty() {}
        }

        let final_result = self.consumer.finalize();
        self.generator.reset();

        pump_result?;
        drain_result?;

        if self.collect_timings {
            info!("{}", self.timing_summary());
        }

        Ok(final_result)
    }

    /// Main pump: deliver batches until the generator is exhausted.
    fn pump(&self, units: &mut [ProcessingUnit<A>]) -> Result<()> {
        let mut interval_start = self.timer.now();

        loop {
            let batch = self.generator.next_batch();
            if batch.is_empty() {
                debug!("Generator exhausted; leaving pump loop");
                return Ok(());
            }

            if batch.len() != self.batch_size {
                return Err(PipelineError::MalformedBatch {
                    expected: self.batch_size,
                    actual: batch.len(),
                }
                .into());
            }

            let mut slots = batch;
            let mut remaining = slots.iter().filter(|slot| slot.is_some()).count();

            // delivery round: spin the try-pair over all slots, sleeping on
            // the last unit stuck on a full queue (Alternation Rule)
            while remaining > 0 {
                remaining = 0;
                let mut last_full: Option<usize> = None;

                for (index, unit) in units.iter_mut().enumerate() {
                    if let Some(token) = slots[index].take() {
                        match unit.try_insert(token) {
                            UnitInsertStatus::Accepted => {}
                            UnitInsertStatus::Full(token) => {
                                slots[index] = Some(token);
                                remaining += 1;
                                last_full = Some(index);
                            }
                            UnitInsertStatus::Busy(token) => {
                                slots[index] = Some(token);
                                remaining += 1;
                            }
                            UnitInsertStatus::Failed(_) => {
                                return Err(PipelineError::UnitFailure {
                                    unit: index,
                                    details: "token refused during delivery".to_string(),
                                }
                                .into());
                            }
                        }
                    }

                    if let UnitResultStatus::Result(result) = unit.try_get_result() {
                        self.consumer.consume(result, index);
                    }
                }

                if let Some(index) = last_full {
                    units[index].wait_for_unblocking_event();
                }
            }

            if self.collect_timings {
                interval_start = self.timer.add_interval(interval_start);
            }
        }
    }

    /// Spin the units down, feeding stragglers to the consumer.
    fn drain(&self, units: &mut [ProcessingUnit<A>], consume: bool) -> Result<()> {
        let mut reports = vec![None; units.len()];
        let mut remaining_alive = units.len();

        while remaining_alive > 0 {
            remaining_alive = 0;
            let mut last_alive: Option<usize> = None;

            for (index, unit) in units.iter_mut().enumerate() {
                if !unit.try_stop() {
                    if let UnitResultStatus::Result(result) = unit.try_get_result() {
                        if consume {
                            self.consumer.consume(result, index);
                        } else {
                            warn!(unit = index, "Discarding result from an aborted run");
                        }
                    }

                    remaining_alive += 1;
                    last_alive = Some(index);
                } else if reports[index].is_none() {
                    reports[index] = Some(unit.timing_report());
                }
            }

            if let Some(index) = last_alive {
                units[index].wait_for_result();
            }
        }

        if self.collect_timings {
            *self.unit_reports.lock().expect("unit report lock poisoned") =
                reports.into_iter().flatten().collect();
        }

        Ok(())
    }

    /// Multi-line timing summary for the last completed run, then reset.
    pub fn timing_summary(&self) -> String {
        let mut summary = String::new();
        let batch_timing = self.timer.report();

        if batch_timing.intervals > 0 {
            summary.push_str(&format!(
                "Batch loading: {} on time between generated batches\n",
                batch_timing
            ));
        }

        let generator_timing = self.generator.timing_report();
        if generator_timing.intervals > 0 {
            summary.push_str(&format!(
                "Batch gen: {} on generating batches\n",
                generator_timing
            ));
        }

        let consumer_timing = self.consumer.timing_report();
        if consumer_timing.intervals > 0 {
            summary.push_str(&format!(
                "Result consume: {} on handling results\n",
                consumer_timing
            ));
        }

        let reports = self.unit_reports.lock().expect("unit report lock poisoned");
        for (index, report) in reports.iter().enumerate() {
            if report.intervals == 0 {
                continue;
            }
            summary.push_str(&format!(
                "Unit [{}]: {} on ingesting tokens\n",
                index + 1,
                report
            ));
        }

        self.timer.reset();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Batch, GeneratorAlgo, ThreadedBatchGenerator};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Yields `count` tokens in batches of `batch_size`, tagged with a
    /// sequence number; rewinds when exhausted.
    struct SequenceAlgo {
        batch_size: usize,
        count: u64,
        next: u64,
    }

    impl SequenceAlgo {
        fn new(batch_size: usize, count: u64) -> Self {
            Self {
                batch_size,
                count,
                next: 0,
            }
        }
    }

    impl GeneratorAlgo for SequenceAlgo {
        type Token = u64;

        fn next_batch(&mut self) -> Batch<u64> {
            if self.next >= self.count {
                self.next = 0;
                return Vec::new();
            }

            let mut batch = vec![None; self.batch_size];
            for slot in batch.iter_mut() {
                if self.next >= self.count {
                    break;
                }
                *slot = Some(self.next);
                self.next += 1;
            }
            batch
        }
    }

    /// Tags each token with the unit that processed it (via its pack).
    struct TaggingAlgo {
        unit_tag: u64,
        pending: std::collections::VecDeque<(u64, u64)>,
        delay: Duration,
    }

    impl ProcessorAlgo for TaggingAlgo {
        type Token = u64;
        type Result = (u64, u64);
        type Pack = (u64, Duration);

        fn new((unit_tag, delay): (u64, Duration)) -> Self {
            Self {
                unit_tag,
                pending: Default::default(),
                delay,
            }
        }

        fn insert(&mut self, token: u64) {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.pending.push_back((self.unit_tag, token));
        }

        fn try_get_result(&mut self) -> Option<(u64, u64)> {
            self.pending.pop_front()
        }

        fn notify_no_more_tokens(&mut self) {}

        fn has_results(&self) -> bool {
            !self.pending.is_empty()
        }
    }

    /// Collects (unit_tag, token) results per batch slot.
    struct SlotRecorder {
        batch_size: usize,
        results: Mutex<HashMap<usize, Vec<(u64, u64)>>>,
        consumed: AtomicUsize,
    }

    impl SlotRecorder {
        fn new(batch_size: usize) -> Self {
            Self {
                batch_size,
                results: Mutex::new(HashMap::new()),
                consumed: AtomicUsize::new(0),
            }
        }
    }

    impl BatchConsumer<(u64, u64)> for SlotRecorder {
        type Final = HashMap<usize, Vec<(u64, u64)>>;

        fn batch_size(&self) -> usize {
            self.batch_size
        }

        fn consume(&self, token: (u64, u64), batch_index: usize) {
            self.consumed.fetch_add(1, Ordering::Relaxed);
            self.results
                .lock()
                .unwrap()
                .entry(batch_index)
                .or_default()
                .push(token);
        }

        fn finalize(&self) -> Self::Final {
            std::mem::take(&mut *self.results.lock().unwrap())
        }
    }

    fn build_process(
        batch_size: usize,
        count: u64,
        queue_capacity: usize,
        synchronous_allowed: bool,
    ) -> (
        TokenProcess<TaggingAlgo, HashMap<usize, Vec<(u64, u64)>>>,
        Arc<ThreadedBatchGenerator<SequenceAlgo>>,
    ) {
        let generator = Arc::new(ThreadedBatchGenerator::new(batch_size, false, 2));
        generator.start(vec![SequenceAlgo::new(batch_size, count)]);
        let consumer: Arc<dyn BatchConsumer<(u64, u64), Final = HashMap<usize, Vec<(u64, u64)>>>> =
            Arc::new(SlotRecorder::new(batch_size));

        let process = TokenProcess::new(
            batch_size.max(2),
            synchronous_allowed,
            false,
            queue_capacity,
            queue_capacity,
            Arc::clone(&generator) as Arc<dyn BatchGenerator<u64>>,
            consumer,
        )
        .unwrap();

        (process, generator)
    }

    fn packs(batch_size: usize, delay: Duration) -> Vec<(u64, Duration)> {
        (0..batch_size as u64).map(|tag| (tag, delay)).collect()
    }

    #[test]
    fn test_every_token_lands_on_its_slot_unit() {
        let batch_size = 4;
        let (process, _generator) = build_process(batch_size, 40, 2, false);

        let results = process.run(packs(batch_size, Duration::ZERO)).unwrap();

        let mut total = 0;
        for (slot, tokens) in &results {
            total += tokens.len();
            for (unit_tag, token) in tokens {
                // slot-affinity: unit i only ever sees slot-i tokens
                assert_eq!(*unit_tag as usize, *slot);
                assert_eq!(*token as usize % batch_size, *slot);
            }
        }
        assert_eq!(total, 40);
    }

    #[test]
    fn test_per_slot_results_arrive_in_insertion_order() {
        let batch_size = 2;
        let (process, _generator) = build_process(batch_size, 30, 2, false);

        let results = process.run(packs(batch_size, Duration::ZERO)).unwrap();

        for tokens in results.values() {
            let sequence: Vec<u64> = tokens.iter().map(|(_, token)| *token).collect();
            let mut sorted = sequence.clone();
            sorted.sort_unstable();
            assert_eq!(sequence, sorted);
        }
    }

    #[test]
    fn test_backpressure_with_tiny_queues_completes() {
        let batch_size = 2;
        let count = 100;
        let delay = Duration::from_millis(1);
        let (process, _generator) = build_process(batch_size, count, 2, false);

        let started = Instant::now();
        let results = process.run(packs(batch_size, delay)).unwrap();
        let elapsed = started.elapsed();

        // both units process exactly half the tokens, and the per-token delay
        // bounds the wall time from below
        assert_eq!(results[&0].len(), 50);
        assert_eq!(results[&1].len(), 50);
        assert!(elapsed >= delay * (count as u32 / batch_size as u32));
    }

    #[test]
    fn test_two_sequential_runs_produce_identical_results() {
        let batch_size = 3;
        let (process, _generator) = build_process(batch_size, 21, 2, false);

        let first = process.run(packs(batch_size, Duration::ZERO)).unwrap();
        let second = process.run(packs(batch_size, Duration::ZERO)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_exhausted_generator_yields_empty_final() {
        let (process, _generator) = build_process(1, 0, 2, false);
        let results = process.run(packs(1, Duration::ZERO)).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_synchronous_path_taken_for_singleton_batches() {
        let (process, _generator) = build_process(1, 12, 2, true);
        let results = process.run(packs(1, Duration::ZERO)).unwrap();
        assert_eq!(results[&0].len(), 12);
    }

    #[test]
    fn test_pack_count_mismatch_is_rejected() {
        let (process, _generator) = build_process(2, 4, 2, false);
        let err = process.run(packs(3, Duration::ZERO)).unwrap_err();
        assert!(matches!(
            err,
            FramepipeError::Pipeline(PipelineError::PackCountMismatch {
                expected: 2,
                actual: 3
            })
        ));
        // the run slot is free again afterwards
        let results = process.run(packs(2, Duration::ZERO)).unwrap();
        assert_eq!(results.values().map(Vec::len).sum::<usize>(), 4);
    }

    #[test]
    fn test_mismatched_batch_sizes_rejected_at_construction() {
        let generator = Arc::new(ThreadedBatchGenerator::new(2, false, 2));
        generator.start(vec![SequenceAlgo::new(2, 2)]);
        let consumer: Arc<dyn BatchConsumer<(u64, u64), Final = HashMap<usize, Vec<(u64, u64)>>>> =
            Arc::new(SlotRecorder::new(3));

        let result = TokenProcess::<TaggingAlgo, _>::new(
            4,
            false,
            false,
            2,
            2,
            Arc::clone(&generator) as Arc<dyn BatchGenerator<u64>>,
            consumer,
        );
        let err = match result {
            Ok(_) => panic!("expected a batch size mismatch"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            FramepipeError::Pipeline(PipelineError::BatchSizeMismatch { .. })
        ));

        // construction failed, so the generator must be wound down by hand
        while !generator.next_batch().is_empty() {}
    }

    #[test]
    fn test_batch_size_over_worker_limit_rejected() {
        let generator = Arc::new(ThreadedBatchGenerator::new(4, false, 2));
        generator.start(vec![SequenceAlgo::new(4, 4)]);
        let consumer: Arc<dyn BatchConsumer<(u64, u64), Final = HashMap<usize, Vec<(u64, u64)>>>> =
            Arc::new(SlotRecorder::new(4));

        let result = TokenProcess::<TaggingAlgo, _>::new(
            2,
            false,
            false,
            2,
            2,
            Arc::clone(&generator) as Arc<dyn BatchGenerator<u64>>,
            consumer,
        );
        let err = match result {
            Ok(_) => panic!("expected an invalid batch size"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            FramepipeError::Pipeline(PipelineError::InvalidBatchSize { .. })
        ));

        while !generator.next_batch().is_empty() {}
    }

    #[test]
    fn test_timing_summary_after_timed_run() {
        let batch_size = 2;
        let generator = Arc::new(ThreadedBatchGenerator::new(batch_size, true, 2));
        generator.start(vec![SequenceAlgo::new(batch_size, 10)]);
        let consumer: Arc<dyn BatchConsumer<(u64, u64), Final = HashMap<usize, Vec<(u64, u64)>>>> =
            Arc::new(SlotRecorder::new(batch_size));

        let process = TokenProcess::<TaggingAlgo, _>::new(
            batch_size,
            false,
            true,
            2,
            2,
            Arc::clone(&generator) as Arc<dyn BatchGenerator<u64>>,
            consumer,
        )
        .unwrap();

        process.run(packs(batch_size, Duration::ZERO)).unwrap();
        let summary = process.timing_summary();
        assert!(summary.contains("Unit [1]"));
        assert!(summary.contains("Batch gen"));
    }
}
