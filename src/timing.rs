use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Snapshot of accumulated interval timings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalReport {
    /// Total time spent across all recorded intervals
    pub total: Duration,
    /// Number of intervals recorded
    pub intervals: u64,
}

impl IntervalReport {
    /// Mean interval duration (zero when nothing was recorded)
    pub fn average(&self) -> Duration {
        if self.intervals == 0 {
            Duration::ZERO
        } else {
            self.total / self.intervals as u32
        }
    }
}

impl std::fmt::Display for IntervalReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} ({} intervals; {:?} avg)",
            self.total,
            self.intervals,
            self.average()
        )
    }
}

/// One accumulated (duration, count) record
#[derive(Debug, Clone, Copy, Default)]
struct IntervalPair {
    total: Duration,
    intervals: u64,
}

/// Thread-safe accumulator of (duration, count) interval pairs
///
/// The pair is updated and snapshotted as a unit, so a reader never observes
/// an interval count without its matching duration. Safe to share across
/// concurrent writers; no updates are lost.
#[derive(Debug, Default)]
pub struct IntervalTimer {
    record: Mutex<IntervalPair>,
}

impl IntervalTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current instant, for starting an interval
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Record the interval since `start` and return the new interval start
    pub fn add_interval(&self, start: Instant) -> Instant {
        let current = Instant::now();
        let elapsed = current.duration_since(start);

        let mut record = self.record.lock().expect("interval timer lock poisoned");
        record.total += elapsed;
        record.intervals += 1;

        current
    }

    /// Zero the accumulator
    pub fn reset(&self) {
        *self.record.lock().expect("interval timer lock poisoned") = IntervalPair::default();
    }

    /// Snapshot the accumulated timings
    pub fn report(&self) -> IntervalReport {
        let record = *self.record.lock().expect("interval timer lock poisoned");

        IntervalReport {
            total: record.total,
            intervals: record.intervals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_empty() {
        let timer = IntervalTimer::new();
        let report = timer.report();
        assert_eq!(report.intervals, 0);
        assert_eq!(report.total, Duration::ZERO);
        assert_eq!(report.average(), Duration::ZERO);
    }

    #[test]
    fn test_accumulates_intervals() {
        let timer = IntervalTimer::new();
        let mut start = timer.now();

        for _ in 0..3 {
            thread::sleep(Duration::from_millis(2));
            start = timer.add_interval(start);
        }

        let report = timer.report();
        assert_eq!(report.intervals, 3);
        assert!(report.total >= Duration::from_millis(6));
        assert!(report.average() >= Duration::from_millis(2));
    }

    #[test]
    fn test_reset_zeroes_accumulator() {
        let timer = IntervalTimer::new();
        let start = timer.now();
        timer.add_interval(start);
        assert_eq!(timer.report().intervals, 1);

        timer.reset();
        let report = timer.report();
        assert_eq!(report.intervals, 0);
        assert_eq!(report.total, Duration::ZERO);
    }

    #[test]
    fn test_concurrent_writers_count_every_interval() {
        let timer = Arc::new(IntervalTimer::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let timer = Arc::clone(&timer);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let start = timer.now();
                    timer.add_interval(start);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(timer.report().intervals, 400);
    }

    #[test]
    fn test_report_sees_matched_pairs_while_writers_run() {
        let timer = Arc::new(IntervalTimer::new());
        let floor = Duration::from_millis(1);
        let mut writers = Vec::new();

        // every recorded interval lasts at least `floor`, so any snapshot
        // whose total is shorter than floor x count is a torn pair
        for _ in 0..4 {
            let timer = Arc::clone(&timer);
            writers.push(thread::spawn(move || {
                for _ in 0..50 {
                    let start = timer.now();
                    thread::sleep(floor);
                    timer.add_interval(start);
                }
            }));
        }

        while writers.iter().any(|writer| !writer.is_finished()) {
            let report = timer.report();
            assert!(
                report.total >= floor * report.intervals as u32,
                "torn snapshot: {} interval(s) but only {:?} total",
                report.intervals,
                report.total
            );
        }

        for writer in writers {
            writer.join().unwrap();
        }

        let report = timer.report();
        assert_eq!(report.intervals, 200);
        assert!(report.total >= floor * 200);
    }

    #[test]
    fn test_report_display() {
        let report = IntervalReport {
            total: Duration::from_millis(10),
            intervals: 2,
        };
        let text = report.to_string();
        assert!(text.contains("2 intervals"));
    }
}
