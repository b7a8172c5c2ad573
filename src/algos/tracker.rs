use crate::error::AlgoError;
use crate::frame::Frame;
use crate::pipeline::ProcessorAlgo;
use std::collections::HashMap;
use tracing::{debug, error};

/// Caller-supplied per-frame tracking routine.
///
/// The framework owns the `live` (in-progress) and `archive` (completed)
/// object tables and threads them through every call, together with the
/// running frame index and the next free object ID; the routine returns the
/// updated next ID. The record shape is entirely the tracker's business.
///
/// No framework locks are held across a call, so implementations are free to
/// synchronize with whatever runtime they bridge to.
pub trait ObjectTracker: Send + 'static {
    type Record: Send + 'static;

    fn track(
        &mut self,
        frame: &Frame,
        frame_index: u64,
        live: &mut HashMap<u64, Self::Record>,
        archive: &mut HashMap<u64, Self::Record>,
        next_id: u64,
    ) -> Result<u64, AlgoError>;
}

/// Bridges an [`ObjectTracker`] into the pipeline.
///
/// Tokens are lists of frames (one combined token per intermediary layer);
/// frames are handed to the tracker one at a time, in order. Empty frames
/// are skipped. On `notify_no_more_tokens` the archive table becomes the
/// single emitted result and the live table is discarded.
///
/// A tracker error is terminal for the run: it is logged, later frames are
/// ignored, and the archive gathered so far is still delivered.
pub struct TrackerAlgo<K: ObjectTracker> {
    tracker: K,
    live: Option<HashMap<u64, K::Record>>,
    archive: Option<HashMap<u64, K::Record>>,
    frames_processed: u64,
    next_id: u64,
    failed: bool,
    result: Option<HashMap<u64, K::Record>>,
}

impl<K: ObjectTracker> ProcessorAlgo for TrackerAlgo<K> {
    type Token = Vec<Frame>;
    type Result = HashMap<u64, K::Record>;
    type Pack = K;

    fn new(tracker: K) -> Self {
        Self {
            tracker,
            live: None,
            archive: None,
            frames_processed: 0,
            next_id: 0,
            failed: false,
            result: None,
        }
    }

    fn insert(&mut self, frames: Vec<Frame>) {
        if frames.is_empty() || self.failed {
            return;
        }

        // tables are created lazily on the first frames
        let live = self.live.get_or_insert_with(HashMap::new);
        let archive = self.archive.get_or_insert_with(HashMap::new);

        for frame in &frames {
            if frame.is_empty() {
                continue;
            }

            match self.tracker.track(
                frame,
                self.frames_processed,
                live,
                archive,
                self.next_id,
            ) {
                Ok(next_id) => {
                    self.next_id = next_id;
                    self.frames_processed += 1;
                }
                Err(e) => {
                    error!("Object tracker failed: {}", e);
                    self.failed = true;
                    return;
                }
            }
        }
    }

    fn try_get_result(&mut self) -> Option<HashMap<u64, K::Record>> {
        self.result.take()
    }

    fn notify_no_more_tokens(&mut self) {
        debug!(
            "Tracker drained after {} frame(s); archiving results",
            self.frames_processed
        );

        // the archive becomes the result; in-progress objects are dropped
        self.result = Some(self.archive.take().unwrap_or_default());
        self.live = None;
        self.frames_processed = 0;
        self.next_id = 0;
        self.failed = false;
    }

    fn has_results(&self) -> bool {
        self.result.is_some()
    }
}
