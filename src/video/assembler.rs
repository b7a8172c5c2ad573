use crate::frame::Frame;
use crate::pipeline::BatchConsumer;
use crate::timing::{IntervalReport, IntervalTimer};
use crate::video::tiles::Fragment;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use tracing::warn;

struct AssemblerState {
    /// per-slot fragment backlog
    slots: Vec<VecDeque<Fragment>>,
    /// completed images, oldest first
    layers: Vec<Frame>,
}

/// [`BatchConsumer`] that reassembles full images from fragment streams.
///
/// Fragments arrive per batch slot; whenever every slot has produced at least
/// one fragment, one is popped from each and its inner rect is pasted back
/// into a canvas at its source position (the inverse tile operation). Each
/// completed canvas is appended to the layer list returned by `finalize`.
pub struct FragmentAssembler {
    batch_size: usize,
    frame_width: u32,
    frame_height: u32,
    state: Mutex<AssemblerState>,
    collect_timings: bool,
    timer: IntervalTimer,
}

impl FragmentAssembler {
    pub fn new(
        batch_size: usize,
        frame_width: u32,
        frame_height: u32,
        collect_timings: bool,
    ) -> Self {
        assert!(batch_size > 0, "batch size must be greater than zero");
        assert!(
            frame_width > 0 && frame_height > 0,
            "assembled frames must have a nonzero size"
        );

        Self {
            batch_size,
            frame_width,
            frame_height,
            state: Mutex::new(AssemblerState {
                slots: (0..batch_size).map(|_| VecDeque::new()).collect(),
                layers: Vec::new(),
            }),
            collect_timings,
            timer: IntervalTimer::new(),
        }
    }

    fn assemble_layer(&self, fragments: Vec<Fragment>) -> Option<Frame> {
        let channels = fragments.first().map(|f| f.image.channels())?;

        let mut canvas = match Frame::zeroed(self.frame_width, self.frame_height, channels) {
            Ok(canvas) => canvas,
            Err(e) => {
                warn!("Creating the assembly canvas failed: {}", e);
                return None;
            }
        };

        for fragment in &fragments {
            let inner = match fragment.inner_pixels() {
                Ok(inner) => inner,
                Err(e) => {
                    warn!("Combining image fragments failed unexpectedly: {}", e);
                    return None;
                }
            };
            if let Err(e) = canvas.paste(&inner, fragment.inner.x, fragment.inner.y) {
                warn!("Combining image fragments failed unexpectedly: {}", e);
                return None;
            }
        }

        Some(canvas)
    }
}

impl BatchConsumer<Fragment> for FragmentAssembler {
    type Final = Vec<Frame>;

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn consume(&self, fragment: Fragment, batch_index: usize) {
        let start = self.collect_timings.then(Instant::now);

        let mut state = self.state.lock().expect("assembler state lock poisoned");
        assert!(
            batch_index < state.slots.len(),
            "batch index {batch_index} out of range"
        );

        state.slots[batch_index].push_back(fragment);

        // a layer completes once every slot has a fragment waiting
        if state.slots.iter().all(|slot| !slot.is_empty()) {
            let fragments: Vec<Fragment> = state
                .slots
                .iter_mut()
                .map(|slot| slot.pop_front().expect("slot emptiness checked above"))
                .collect();

            if let Some(layer) = self.assemble_layer(fragments) {
                state.layers.push(layer);
            }
        }
        drop(state);

        if let Some(start) = start {
            self.timer.add_interval(start);
        }
    }

    fn finalize(&self) -> Vec<Frame> {
        let mut state = self.state.lock().expect("assembler state lock poisoned");

        // leftover fragments from a ragged terminal batch are dropped
        for slot in state.slots.iter_mut() {
            slot.clear();
        }

        std::mem::take(&mut state.layers)
    }

    fn timing_report(&self) -> IntervalReport {
        self.timer.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::tiles::{tile_frame, tile_layout};

    fn numbered_frame(width: u32, height: u32) -> Frame {
        let data = (0..width * height).map(|i| (i % 249) as u8).collect();
        Frame::new(width, height, 1, data).unwrap()
    }

    #[test]
    fn test_reassembles_one_layer_from_all_slots() {
        let frame = numbered_frame(8, 4);
        let layout = tile_layout(8, 4, 4, 1, 1, 0).unwrap();
        let fragments = tile_frame(&frame, &layout).unwrap();

        let assembler = FragmentAssembler::new(4, 8, 4, false);
        for (index, fragment) in fragments.into_iter().enumerate() {
            assembler.consume(fragment, index);
        }

        let layers = assembler.finalize();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0], frame);
    }

    #[test]
    fn test_layers_complete_only_when_every_slot_has_a_fragment() {
        let frame = numbered_frame(6, 6);
        let layout = tile_layout(6, 6, 2, 1, 0, 0).unwrap();
        let fragments = tile_frame(&frame, &layout).unwrap();

        let assembler = FragmentAssembler::new(2, 6, 6, false);
        assembler.consume(fragments[0].clone(), 0);

        // nothing assembled yet; finalize drops the straggler
        assert!(assembler.finalize().is_empty());

        // a complete pair assembles
        let fragments = tile_frame(&frame, &layout).unwrap();
        for (index, fragment) in fragments.into_iter().enumerate() {
            assembler.consume(fragment, index);
        }
        assert_eq!(assembler.finalize().len(), 1);
    }

    #[test]
    fn test_multiple_layers_in_arrival_order() {
        let first = numbered_frame(4, 4);
        let mut second = numbered_frame(4, 4);
        second.data_mut()[0] = 77;

        let layout = tile_layout(4, 4, 2, 1, 0, 0).unwrap();
        let assembler = FragmentAssembler::new(2, 4, 4, false);

        // slot 0 receives both of its fragments before slot 1 sees any
        let first_frags = tile_frame(&first, &layout).unwrap();
        let second_frags = tile_frame(&second, &layout).unwrap();
        assembler.consume(first_frags[0].clone(), 0);
        assembler.consume(second_frags[0].clone(), 0);
        assembler.consume(first_frags[1].clone(), 1);
        assembler.consume(second_frags[1].clone(), 1);

        let layers = assembler.finalize();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0], first);
        assert_eq!(layers[1], second);
    }

    #[test]
    fn test_identity_pipeline_preserves_frames() {
        use crate::frame::PixelRect;
        use crate::pipeline::{BatchGenerator, ProcessorAlgo, ThreadedBatchGenerator, TokenProcess};
        use crate::video::generator::{FrameGeneratorConfig, VideoFrameGenerator};
        use crate::video::source::FrameVecSource;
        use std::sync::Arc;

        /// Passes fragments through untouched.
        struct IdentityAlgo {
            pending: VecDeque<Fragment>,
        }

        impl ProcessorAlgo for IdentityAlgo {
            type Token = Fragment;
            type Result = Fragment;
            type Pack = ();

            fn new(_pack: ()) -> Self {
                Self {
                    pending: VecDeque::new(),
                }
            }

            fn insert(&mut self, fragment: Fragment) {
                self.pending.push_back(fragment);
            }

            fn try_get_result(&mut self) -> Option<Fragment> {
                self.pending.pop_front()
            }

            fn notify_no_more_tokens(&mut self) {}

            fn has_results(&self) -> bool {
                !self.pending.is_empty()
            }
        }

        let frames: Vec<Frame> = (0..3u32)
            .map(|offset| {
                let data = (0..24u32).map(|i| ((i * 7 + offset) % 256) as u8).collect();
                Frame::new(6, 4, 1, data).unwrap()
            })
            .collect();

        let config = FrameGeneratorConfig {
            frames_in_batch: 1,
            chunks_per_frame: 2,
            last_frame: 3,
            crop: Some(PixelRect::new(0, 0, 6, 4)),
            horizontal_buffer: 1,
            vertical_buffer: 1,
            ..Default::default()
        };
        let generator_algo =
            VideoFrameGenerator::new(Box::new(FrameVecSource::new(frames.clone())), config)
                .unwrap();

        let generator = Arc::new(ThreadedBatchGenerator::new(2, false, 2));
        generator.start(vec![generator_algo]);

        let consumer: Arc<dyn BatchConsumer<Fragment, Final = Vec<Frame>>> =
            Arc::new(FragmentAssembler::new(2, 6, 4, false));

        let process = TokenProcess::<IdentityAlgo, Vec<Frame>>::new(
            2,
            false,
            false,
            2,
            2,
            Arc::clone(&generator) as Arc<dyn BatchGenerator<Fragment>>,
            consumer,
        )
        .unwrap();

        let layers = process.run(vec![(), ()]).unwrap();
        assert_eq!(layers, frames);
    }

    #[test]
    fn test_finalize_resets_for_reuse() {
        let frame = numbered_frame(4, 4);
        let layout = tile_layout(4, 4, 2, 1, 0, 0).unwrap();

        let assembler = FragmentAssembler::new(2, 4, 4, false);
        for (index, fragment) in tile_frame(&frame, &layout).unwrap().into_iter().enumerate() {
            assembler.consume(fragment, index);
        }
        assert_eq!(assembler.finalize().len(), 1);
        assert!(assembler.finalize().is_empty());
    }
}
