use crate::pipeline::{Batch, BatchConsumer, BatchGenerator};
use crate::queue::{InsertStatus, TokenQueue};
use crate::timing::{IntervalReport, IntervalTimer};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use tracing::warn;

/// Adapter standing between two token processes.
///
/// For the upstream process it is a [`BatchConsumer`] with N slots; for the
/// downstream process it is a [`BatchGenerator`] emitting singleton batches
/// whose one token is the combined `Vec<T>` of one element from every slot.
/// Combined tokens travel through a bounded shuttle queue, so the upstream
/// stage feels backpressure from the downstream one.
///
/// The upstream coordinator calls `finalize()` once its units have drained;
/// that flushes any partially-assembled leftovers (best effort, possibly
/// ragged across slots) and shuts the shuttle down, which terminates the
/// downstream generator.
pub struct BatchIntermediary<T: Send> {
    consumer_batch_size: usize,
    pending: Mutex<Vec<VecDeque<T>>>,
    shuttle: TokenQueue<Vec<T>>,
    collect_timings: bool,
    timer: IntervalTimer,
}

impl<T: Send> BatchIntermediary<T> {
    /// Create an intermediary consuming `consumer_batch_size`-slot batches
    /// with a bounded shuttle queue between the stages.
    pub fn new(consumer_batch_size: usize, shuttle_capacity: usize, collect_timings: bool) -> Self {
        assert!(
            consumer_batch_size > 0,
            "consumer batch size must be greater than zero"
        );

        Self {
            consumer_batch_size,
            pending: Mutex::new(
                (0..consumer_batch_size)
                    .map(|_| VecDeque::new())
                    .collect(),
            ),
            shuttle: TokenQueue::new(shuttle_capacity),
            collect_timings,
            timer: IntervalTimer::new(),
        }
    }

    /// Pop one element from every non-empty slot and ship the combined token.
    ///
    /// Returns false once every slot is empty. Shipping with some slots empty
    /// is only done by `finalize`, where raggedness is acceptable.
    fn send_combined(&self, pending: &mut [VecDeque<T>]) -> bool {
        let mut combined = Vec::with_capacity(pending.len());
        for slot in pending.iter_mut() {
            if let Some(token) = slot.pop_front() {
                combined.push(token);
            }
        }

        if combined.is_empty() {
            return false;
        }

        if let InsertStatus::ShutDown(_) = self.shuttle.insert(combined) {
            warn!("Intermediary shuttle shut down with tokens still arriving");
            return false;
        }

        true
    }
}

impl<T: Send> BatchConsumer<T> for BatchIntermediary<T> {
    type Final = ();

    fn batch_size(&self) -> usize {
        self.consumer_batch_size
    }

    fn consume(&self, token: T, batch_index: usize) {
        let start = self.collect_timings.then(Instant::now);

        let mut pending = self.pending.lock().expect("intermediary slot lock poisoned");
        assert!(
            batch_index < pending.len(),
            "batch index {batch_index} out of range"
        );

        pending[batch_index].push_back(token);

        // at most one combined token can have become ready
        if pending.iter().all(|slot| !slot.is_empty()) {
            self.send_combined(&mut pending);
        }
        drop(pending);

        if let Some(start) = start {
            self.timer.add_interval(start);
        }
    }

    fn finalize(&self) {
        let mut pending = self.pending.lock().expect("intermediary slot lock poisoned");
        while self.send_combined(&mut pending) {}
        drop(pending);

        self.shuttle.shut_down();
    }

    fn timing_report(&self) -> IntervalReport {
        self.timer.report()
    }
}

impl<T: Send> BatchGenerator<Vec<T>> for BatchIntermediary<T> {
    fn batch_size(&self) -> usize {
        1
    }

    fn next_batch(&self) -> Batch<Vec<T>> {
        match self.shuttle.get() {
            Some(combined) => vec![Some(combined)],
            None => Vec::new(),
        }
    }

    fn reset(&self) {
        // called by the downstream coordinator after its run; the upstream
        // finalize has already shut the shuttle down
        self.shuttle.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_combines_one_token_per_slot() {
        let intermediary: BatchIntermediary<u32> = BatchIntermediary::new(3, 4, false);

        intermediary.consume(10, 0);
        intermediary.consume(20, 1);
        assert!(intermediary.shuttle.is_empty());

        intermediary.consume(30, 2);
        let batch = BatchGenerator::next_batch(&intermediary);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].as_deref(), Some(&[10, 20, 30][..]));
    }

    #[test]
    fn test_slots_buffer_independently() {
        let intermediary: BatchIntermediary<u32> = BatchIntermediary::new(2, 4, false);

        // slot 0 runs ahead by two tokens
        intermediary.consume(1, 0);
        intermediary.consume(2, 0);
        intermediary.consume(3, 0);
        intermediary.consume(10, 1);

        let batch = BatchGenerator::next_batch(&intermediary);
        assert_eq!(batch[0], Some(vec![1, 10]));

        intermediary.consume(20, 1);
        let batch = BatchGenerator::next_batch(&intermediary);
        assert_eq!(batch[0], Some(vec![2, 20]));
    }

    #[test]
    fn test_finalize_flushes_ragged_leftovers_and_shuts_down() {
        let intermediary: BatchIntermediary<u32> = BatchIntermediary::new(2, 4, false);

        intermediary.consume(1, 0);
        intermediary.consume(2, 0);
        BatchConsumer::finalize(&intermediary);

        // two ragged singletons, then exhaustion
        assert_eq!(BatchGenerator::next_batch(&intermediary)[0], Some(vec![1]));
        assert_eq!(BatchGenerator::next_batch(&intermediary)[0], Some(vec![2]));
        assert!(BatchGenerator::next_batch(&intermediary).is_empty());
    }

    #[test]
    fn test_downstream_blocks_until_token_arrives() {
        let intermediary: Arc<BatchIntermediary<u32>> = Arc::new(BatchIntermediary::new(1, 2, false));

        let downstream = {
            let intermediary = Arc::clone(&intermediary);
            thread::spawn(move || BatchGenerator::next_batch(&*intermediary))
        };

        thread::sleep(std::time::Duration::from_millis(20));
        intermediary.consume(42, 0);

        let batch = downstream.join().unwrap();
        assert_eq!(batch[0], Some(vec![42]));
    }

    #[test]
    fn test_shuttle_capacity_applies_backpressure() {
        let intermediary: Arc<BatchIntermediary<u32>> = Arc::new(BatchIntermediary::new(1, 1, false));

        intermediary.consume(1, 0);

        // the second combined token cannot fit until the first is taken
        let producer = {
            let intermediary = Arc::clone(&intermediary);
            thread::spawn(move || intermediary.consume(2, 0))
        };

        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!producer.is_finished());

        assert_eq!(BatchGenerator::next_batch(&*intermediary)[0], Some(vec![1]));
        producer.join().unwrap();
        assert_eq!(BatchGenerator::next_batch(&*intermediary)[0], Some(vec![2]));
    }

    #[test]
    fn test_reset_reopens_for_a_second_run() {
        let intermediary: BatchIntermediary<u32> = BatchIntermediary::new(1, 2, false);

        intermediary.consume(1, 0);
        BatchConsumer::finalize(&intermediary);
        assert_eq!(BatchGenerator::next_batch(&intermediary)[0], Some(vec![1]));
        assert!(BatchGenerator::next_batch(&intermediary).is_empty());

        BatchGenerator::reset(&intermediary);
        intermediary.consume(2, 0);
        assert_eq!(BatchGenerator::next_batch(&intermediary)[0], Some(vec![2]));
    }

    #[test]
    fn test_consume_timing() {
        let intermediary: BatchIntermediary<u32> = BatchIntermediary::new(1, 2, true);
        intermediary.consume(1, 0);
        let _ = BatchGenerator::next_batch(&intermediary);
        intermediary.consume(2, 0);
        let _ = BatchGenerator::next_batch(&intermediary);

        assert_eq!(BatchConsumer::timing_report(&intermediary).intervals, 2);
    }
}
