use crate::algos::highlight::{HighlightObjectsAlgo, HighlightObjectsPack};
use crate::algos::tracker::{ObjectTracker, TrackerAlgo};
use crate::error::{AlgoError, Result};
use crate::frame::{Frame, PixelRect};
use crate::pipeline::{
    thread_budget, BatchConsumer, BatchGenerator, BatchIntermediary, ThreadedBatchGenerator,
    TokenProcess,
};
use crate::timing::{IntervalReport, IntervalTimer};
use crate::video::generator::{FrameGeneratorConfig, VideoFrameGenerator};
use crate::video::source::FrameSource;
use crate::video::tiles::Fragment;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

/// Options for [`track_objects`].
#[derive(Debug, Clone)]
pub struct TrackingOptions {
    /// Cap on frames to process (<= 0 means all frames)
    pub frame_limit: i64,
    /// First frame to process (0-indexed)
    pub start_frame: u64,
    /// Upper bound on worker threads (0 means hardware concurrency)
    pub max_threads: usize,
    /// Convert frames to single-channel luma before processing
    pub grayscale: bool,
    /// Source frames are grayscale already (first channel fast path)
    pub source_is_grayscale: bool,
    /// Crop rectangle (None means the whole frame)
    pub crop: Option<PixelRect>,
    /// Per-queue token capacity inside each processing unit
    pub token_storage_limit: usize,
    /// Shuttle queue capacity between the two stages
    pub shuttle_capacity: usize,
    /// Collect and log interval timing reports
    pub collect_timings: bool,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            frame_limit: 0,
            start_frame: 0,
            max_threads: 0,
            grayscale: true,
            source_is_grayscale: false,
            crop: None,
            token_storage_limit: 10,
            shuttle_capacity: 4,
            collect_timings: false,
        }
    }
}

/// Collects the tracker stage's single archive-table result.
struct ArchiveCollector<R: Send> {
    archives: Mutex<Vec<HashMap<u64, R>>>,
    collect_timings: bool,
    timer: IntervalTimer,
}

impl<R: Send> ArchiveCollector<R> {
    fn new(collect_timings: bool) -> Self {
        Self {
            archives: Mutex::new(Vec::new()),
            collect_timings,
            timer: IntervalTimer::new(),
        }
    }
}

impl<R: Send> BatchConsumer<HashMap<u64, R>> for ArchiveCollector<R> {
    type Final = HashMap<u64, R>;

    fn batch_size(&self) -> usize {
        1
    }

    fn consume(&self, archive: HashMap<u64, R>, _batch_index: usize) {
        let start = self.collect_timings.then(Instant::now);
        self.archives
            .lock()
            .expect("archive collector lock poisoned")
            .push(archive);
        if let Some(start) = start {
            self.timer.add_interval(start);
        }
    }

    fn finalize(&self) -> HashMap<u64, R> {
        let mut archives = self
            .archives
            .lock()
            .expect("archive collector lock poisoned");

        if archives.is_empty() {
            return HashMap::new();
        }
        let result = archives.drain(..).next().unwrap_or_default();
        result
    }

    fn timing_report(&self) -> IntervalReport {
        self.timer.report()
    }
}

/// Track objects through a video: background-subtract and threshold frames
/// in parallel, then feed the masks sequentially to a caller-supplied
/// tracker.
///
/// Two token processes are chained through a [`BatchIntermediary`]: the
/// highlight stage runs one unit per thread-budget slot; its per-slot masks
/// are recombined in frame order into lists that the single synchronous
/// tracker unit consumes. The upstream stage runs on a spawned thread; this
/// call returns when the downstream stage has archived every object.
pub fn track_objects<K: ObjectTracker>(
    source: Box<dyn FrameSource>,
    highlight: HighlightObjectsPack,
    tracker: K,
    options: &TrackingOptions,
) -> Result<HashMap<u64, K::Record>> {
    let (frame_width, frame_height) = source.dimensions();
    let total_frames = source.frame_count();

    let crop = match options.crop {
        Some(rect) => rect,
        None => PixelRect::new(0, 0, frame_width, frame_height),
    };

    // frame cropping must match the background image passed in
    let (bg_width, bg_height) = highlight.background.dimensions();
    if (bg_width, bg_height) != (crop.width, crop.height) {
        return Err(AlgoError::BackgroundMismatch {
            background_width: bg_width,
            background_height: bg_height,
            frame_width: crop.width,
            frame_height: crop.height,
        }
        .into());
    }

    let window = total_frames.saturating_sub(options.start_frame);
    let frames_to_process = if options.frame_limit > 0 {
        window.min(options.frame_limit as u64)
    } else {
        window
    };

    // number of frames highlighted in parallel
    let batch_size = thread_budget(options.max_threads);

    info!(
        "Tracking objects over {} frame(s) with {} highlight unit(s)",
        frames_to_process, batch_size
    );

    let generator_config = FrameGeneratorConfig {
        frames_in_batch: batch_size,
        chunks_per_frame: 1,
        start_frame: options.start_frame,
        last_frame: options.start_frame + frames_to_process,
        crop: Some(crop),
        convert_to_grayscale: options.grayscale,
        source_is_grayscale: options.source_is_grayscale,
        horizontal_buffer: 0,
        vertical_buffer: 0,
    };
    let generator_algo = VideoFrameGenerator::new(source, generator_config)?;

    let frame_generator = Arc::new(ThreadedBatchGenerator::new(
        batch_size,
        options.collect_timings,
        options.token_storage_limit,
    ));
    frame_generator.start(vec![generator_algo]);

    // the intermediary consumes per-slot masks and generates mask lists
    let intermediary = Arc::new(BatchIntermediary::<Frame>::new(
        batch_size,
        options.shuttle_capacity,
        options.collect_timings,
    ));

    let highlight_process = TokenProcess::<HighlightObjectsAlgo, ()>::new(
        batch_size,
        true,
        options.collect_timings,
        options.token_storage_limit,
        options.token_storage_limit,
        Arc::clone(&frame_generator) as Arc<dyn BatchGenerator<Fragment>>,
        Arc::clone(&intermediary) as Arc<dyn BatchConsumer<Frame, Final = ()>>,
    )?;

    let archive_collector: Arc<dyn BatchConsumer<HashMap<u64, K::Record>, Final = HashMap<u64, K::Record>>> =
        Arc::new(ArchiveCollector::new(options.collect_timings));

    // the tracker is inherently sequential: one synchronous unit
    let tracker_process = TokenProcess::<TrackerAlgo<K>, HashMap<u64, K::Record>>::new(
        1,
        true,
        options.collect_timings,
        options.token_storage_limit,
        options.token_storage_limit,
        Arc::clone(&intermediary) as Arc<dyn BatchGenerator<Vec<Frame>>>,
        archive_collector,
    )?;

    let highlight_packs: Vec<HighlightObjectsPack> =
        (0..batch_size).map(|_| highlight.clone()).collect();

    let archive = thread::scope(|scope| -> Result<HashMap<u64, K::Record>> {
        // the highlight stage runs on its own thread; the tracker stage runs
        // here and returns once the intermediary shuts down
        let upstream = scope.spawn(|| highlight_process.run(highlight_packs));

        let archive = tracker_process.run(vec![tracker]);

        match upstream.join() {
            Ok(result) => result?,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        archive
    })?;

    debug!("Tracking archived {} object(s)", archive.len());

    if options.collect_timings {
        info!(
            "Highlight objects timing report:\n{}",
            highlight_process.timing_summary()
        );
        info!(
            "Assign objects timing report:\n{}",
            tracker_process.timing_summary()
        );
    }

    Ok(archive)
}
