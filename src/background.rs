use crate::algos::median::{HistogramCounter, HistogramMedianAlgo};
use crate::error::{AlgoError, FramepipeError, Result};
use crate::frame::{Frame, PixelRect};
use crate::pipeline::{thread_budget, BatchConsumer, BatchGenerator, ThreadedBatchGenerator, TokenProcess};
use crate::video::assembler::FragmentAssembler;
use crate::video::generator::{FrameGeneratorConfig, VideoFrameGenerator};
use crate::video::source::FrameSource;
use crate::video::tiles::Fragment;
use std::sync::Arc;
use tracing::{debug, info};

/// Options for [`extract_background`].
#[derive(Debug, Clone)]
pub struct BackgroundOptions {
    /// Cap on frames to analyze (<= 0 means all frames)
    pub frame_limit: i64,
    /// First frame to analyze (0-indexed)
    pub start_frame: u64,
    /// Upper bound on worker threads (0 means hardware concurrency)
    pub max_threads: usize,
    /// Convert frames to single-channel luma before processing
    pub grayscale: bool,
    /// Source frames are grayscale already (first channel fast path)
    pub source_is_grayscale: bool,
    /// Crop rectangle (None means the whole frame)
    pub crop: Option<PixelRect>,
    /// Per-tile horizontal overlap buffer in pixels
    pub horizontal_buffer: u32,
    /// Per-tile vertical overlap buffer in pixels
    pub vertical_buffer: u32,
    /// Per-queue token capacity inside each processing unit
    pub token_storage_limit: usize,
    /// Collect and log interval timing reports
    pub collect_timings: bool,
}

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self {
            frame_limit: 0,
            start_frame: 0,
            max_threads: 0,
            grayscale: true,
            source_is_grayscale: false,
            crop: None,
            horizontal_buffer: 0,
            vertical_buffer: 0,
            token_storage_limit: 10,
            collect_timings: false,
        }
    }
}

/// Compute the per-pixel temporal median of a video.
///
/// Each frame is tiled into one vertical strip per processing unit, every
/// unit accumulates the histogram median of its strip, and the resulting
/// fragments are reassembled into one background image. The histogram
/// counter width is chosen from the number of frames to analyze, since the
/// table costs 256 bins per pixel per unit.
pub fn extract_background(
    source: Box<dyn FrameSource>,
    options: &BackgroundOptions,
) -> Result<Frame> {
    let (frame_width, frame_height) = source.dimensions();
    let total_frames = source.frame_count();

    let crop = match options.crop {
        Some(rect) => rect,
        None => PixelRect::new(0, 0, frame_width, frame_height),
    };

    info!(
        "Frames: {}; Res: {}x{} ({}x{} cropped); analyzing from frame {}",
        total_frames, frame_width, frame_height, crop.width, crop.height, options.start_frame
    );

    // figure out how many frames will be analyzed
    let window = total_frames.saturating_sub(options.start_frame);
    let frames_to_analyze = if options.frame_limit > 0 {
        window.min(options.frame_limit as u64)
    } else {
        window
    };

    // one vertical strip per worker; strips cannot be thinner than a pixel
    let batch_size = thread_budget(options.max_threads).min(crop.width.max(1) as usize);

    // use the cheapest counter that can hold the frame count
    if frames_to_analyze <= u8::LIMIT {
        background_with_counter::<u8>(source, options, crop, batch_size, frames_to_analyze)
    } else if frames_to_analyze <= u16::LIMIT {
        background_with_counter::<u16>(source, options, crop, batch_size, frames_to_analyze)
    } else if frames_to_analyze <= u32::LIMIT {
        background_with_counter::<u32>(source, options, crop, batch_size, frames_to_analyze)
    } else {
        Err(AlgoError::TooManyFrames {
            frames: frames_to_analyze,
        }
        .into())
    }
}

fn background_with_counter<C: HistogramCounter>(
    source: Box<dyn FrameSource>,
    options: &BackgroundOptions,
    crop: PixelRect,
    batch_size: usize,
    frames_to_analyze: u64,
) -> Result<Frame> {
    debug!(
        "Histogram median with {}-bit counters over {} frame(s), {} strip(s)",
        std::mem::size_of::<C>() * 8,
        frames_to_analyze,
        batch_size
    );

    let generator_config = FrameGeneratorConfig {
        frames_in_batch: 1,
        chunks_per_frame: batch_size,
        start_frame: options.start_frame,
        last_frame: options.start_frame + frames_to_analyze,
        crop: Some(crop),
        convert_to_grayscale: options.grayscale,
        source_is_grayscale: options.source_is_grayscale,
        horizontal_buffer: options.horizontal_buffer,
        vertical_buffer: options.vertical_buffer,
    };
    let generator_algo = VideoFrameGenerator::new(source, generator_config)?;

    let generator = Arc::new(ThreadedBatchGenerator::new(
        batch_size,
        options.collect_timings,
        options.token_storage_limit,
    ));
    generator.start(vec![generator_algo]);

    let consumer: Arc<dyn BatchConsumer<Fragment, Final = Vec<Frame>>> =
        Arc::new(FragmentAssembler::new(
            batch_size,
            crop.width,
            crop.height,
            options.collect_timings,
        ));

    let process = TokenProcess::<HistogramMedianAlgo<C>, Vec<Frame>>::new(
        batch_size,
        true,
        options.collect_timings,
        options.token_storage_limit,
        options.token_storage_limit,
        Arc::clone(&generator) as Arc<dyn BatchGenerator<Fragment>>,
        consumer,
    )?;

    let layers = process.run(vec![(); batch_size])?;

    layers
        .into_iter()
        .next_back()
        .ok_or_else(|| FramepipeError::system("video produced no frames to analyze"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::source::FrameVecSource;

    fn solid_frame(value: u8, width: u32, height: u32) -> Frame {
        Frame::new(width, height, 1, vec![value; (width * height) as usize]).unwrap()
    }

    fn options_with_threads(max_threads: usize) -> BackgroundOptions {
        BackgroundOptions {
            max_threads,
            ..Default::default()
        }
    }

    #[test]
    fn test_trivial_median_background() {
        let source = Box::new(FrameVecSource::new(vec![
            solid_frame(0, 2, 2),
            solid_frame(255, 2, 2),
            solid_frame(128, 2, 2),
        ]));

        let background = extract_background(source, &options_with_threads(1)).unwrap();
        assert_eq!(background.data(), &[128, 128, 128, 128]);
    }

    #[test]
    fn test_tiled_median_matches_untiled() {
        // per-pixel gradient so every strip carries distinct values
        let frames: Vec<Frame> = (0..5u32)
            .map(|offset| {
                let data = (0..64u32).map(|i| ((i + offset * 3) % 256) as u8).collect();
                Frame::new(8, 8, 1, data).unwrap()
            })
            .collect();

        let untiled = extract_background(
            Box::new(FrameVecSource::new(frames.clone())),
            &options_with_threads(1),
        )
        .unwrap();

        let tiled = extract_background(
            Box::new(FrameVecSource::new(frames)),
            &options_with_threads(4),
        )
        .unwrap();

        assert_eq!(untiled, tiled);
    }

    #[test]
    fn test_frame_limit_bounds_the_analysis() {
        // with the limit, only the two dark frames are seen
        let source = Box::new(FrameVecSource::new(vec![
            solid_frame(10, 4, 4),
            solid_frame(10, 4, 4),
            solid_frame(200, 4, 4),
            solid_frame(200, 4, 4),
            solid_frame(200, 4, 4),
        ]));

        let options = BackgroundOptions {
            frame_limit: 2,
            max_threads: 2,
            ..Default::default()
        };
        let background = extract_background(source, &options).unwrap();
        assert_eq!(background.data()[0], 10);
    }

    #[test]
    fn test_crop_limits_the_output_shape() {
        let source = Box::new(FrameVecSource::new(vec![solid_frame(7, 8, 6); 3]));

        let options = BackgroundOptions {
            crop: Some(PixelRect::new(2, 1, 4, 3)),
            max_threads: 2,
            ..Default::default()
        };
        let background = extract_background(source, &options).unwrap();
        assert_eq!(background.dimensions(), (4, 3));
        assert!(background.data().iter().all(|&pixel| pixel == 7));
    }

    #[test]
    fn test_empty_source_is_an_error() {
        let source = Box::new(FrameVecSource::new(Vec::new()));
        assert!(extract_background(source, &options_with_threads(1)).is_err());
    }

    #[test]
    fn test_overlap_buffers_do_not_change_the_result() {
        let frames: Vec<Frame> = (0..3u32)
            .map(|offset| {
                let data = (0..48u32).map(|i| ((i * 5 + offset * 40) % 256) as u8).collect();
                Frame::new(8, 6, 1, data).unwrap()
            })
            .collect();

        let plain = extract_background(
            Box::new(FrameVecSource::new(frames.clone())),
            &options_with_threads(4),
        )
        .unwrap();

        let options = BackgroundOptions {
            max_threads: 4,
            horizontal_buffer: 2,
            vertical_buffer: 1,
            ..Default::default()
        };
        let buffered =
            extract_background(Box::new(FrameVecSource::new(frames)), &options).unwrap();

        assert_eq!(plain, buffered);
    }
}
