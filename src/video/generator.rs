use crate::error::{FrameError, FramepipeError, Result};
use crate::frame::PixelRect;
use crate::pipeline::{Batch, GeneratorAlgo};
use crate::video::source::FrameSource;
use crate::video::tiles::{tile_frame, tile_layout, Fragment, TileRect};
use tracing::{debug, warn};

/// Configuration for a [`VideoFrameGenerator`].
#[derive(Debug, Clone)]
pub struct FrameGeneratorConfig {
    /// Number of frames read per batch
    pub frames_in_batch: usize,
    /// Tiles per frame (1 means no tiling)
    pub chunks_per_frame: usize,
    /// First frame to read (0-indexed); seeked to before the first read
    pub start_frame: u64,
    /// Exclusive upper bound on frames read
    pub last_frame: u64,
    /// Sub-rectangle of each decoded frame (None means the whole frame)
    pub crop: Option<PixelRect>,
    /// Convert color frames to single-channel luma
    pub convert_to_grayscale: bool,
    /// Source frames are grayscale already: extract the first channel
    pub source_is_grayscale: bool,
    /// Horizontal per-tile overlap buffer in pixels
    pub horizontal_buffer: u32,
    /// Vertical per-tile overlap buffer in pixels
    pub vertical_buffer: u32,
}

impl Default for FrameGeneratorConfig {
    fn default() -> Self {
        Self {
            frames_in_batch: 1,
            chunks_per_frame: 1,
            start_frame: 0,
            last_frame: u64::MAX,
            crop: None,
            convert_to_grayscale: false,
            source_is_grayscale: false,
            horizontal_buffer: 0,
            vertical_buffer: 0,
        }
    }
}

/// [`GeneratorAlgo`] that reads frames from a [`FrameSource`], optionally
/// crops and grayscales them, tiles each frame into fragments and emits
/// batches of `frames_in_batch x chunks_per_frame` tokens (column-major tile
/// order within each frame).
///
/// The terminal batch is filled only with the frames actually read, leaving
/// the trailing slots vacant. Once no frames can be read the generator
/// returns an empty batch and rewinds to `start_frame`, so a subsequent run
/// sees the same frames again. A decode failure terminates generation at the
/// current count.
pub struct VideoFrameGenerator {
    source: Box<dyn FrameSource>,
    config: FrameGeneratorConfig,
    crop: PixelRect,
    layout: Vec<TileRect>,
    frames_consumed: u64,
}

impl VideoFrameGenerator {
    pub fn new(mut source: Box<dyn FrameSource>, config: FrameGeneratorConfig) -> Result<Self> {
        if config.frames_in_batch == 0 || config.chunks_per_frame == 0 {
            return Err(FramepipeError::system(
                "frames_in_batch and chunks_per_frame must be greater than zero",
            ));
        }

        let (frame_width, frame_height) = source.dimensions();

        let crop = match config.crop {
            Some(rect) => {
                if !rect.fits_in(frame_width, frame_height) {
                    return Err(FrameError::RectOutOfBounds {
                        x: rect.x,
                        y: rect.y,
                        width: rect.width,
                        height: rect.height,
                        frame_width,
                        frame_height,
                    }
                    .into());
                }
                rect
            }
            None => PixelRect::new(0, 0, frame_width, frame_height),
        };

        if config.start_frame > source.frame_count() {
            return Err(FramepipeError::system(format!(
                "start frame {} is past the end of the source ({} frames)",
                config.start_frame,
                source.frame_count()
            )));
        }

        // tiles split the cropped frame into vertical strips
        let layout = tile_layout(
            crop.width,
            crop.height,
            config.chunks_per_frame as u32,
            1,
            config.horizontal_buffer,
            config.vertical_buffer,
        )?;

        source.seek(config.start_frame)?;

        debug!(
            "Frame generator over frames {}..{} ({} chunk(s) per frame, crop {:?})",
            config.start_frame, config.last_frame, config.chunks_per_frame, crop
        );

        Ok(Self {
            source,
            config,
            crop,
            layout,
            frames_consumed: 0,
        })
    }

    /// Total slots per emitted batch
    pub fn batch_size(&self) -> usize {
        self.config.frames_in_batch * self.config.chunks_per_frame
    }

    fn frame_window(&self) -> u64 {
        self.config.last_frame.saturating_sub(self.config.start_frame)
    }
}

impl GeneratorAlgo for VideoFrameGenerator {
    type Token = Fragment;

    fn next_batch(&mut self) -> Batch<Fragment> {
        let batch_size = self.batch_size();
        let mut batch: Batch<Fragment> = Vec::new();
        let mut filled = 0;

        for _ in 0..self.config.frames_in_batch {
            if self.frames_consumed >= self.frame_window() {
                break;
            }

            let frame = match self.source.read_frame() {
                Ok(Some(frame)) if !frame.is_empty() => frame,
                Ok(Some(_)) | Ok(None) => break,
                Err(e) => {
                    warn!(
                        "Frame decode failed after {} frame(s): {}",
                        self.frames_consumed, e
                    );
                    break;
                }
            };

            // we will produce data, so lay out the full batch (first frame)
            if batch.is_empty() {
                batch.resize_with(batch_size, || None);
            }

            let cropped = match frame.crop(self.crop) {
                Ok(cropped) => cropped,
                Err(e) => {
                    warn!(
                        "Frame {} does not fit the crop window: {}",
                        self.config.start_frame + self.frames_consumed,
                        e
                    );
                    break;
                }
            };

            let prepared = if self.config.source_is_grayscale && cropped.channels() > 1 {
                match cropped.extract_channel(0) {
                    Ok(gray) => gray,
                    Err(e) => {
                        warn!("Grayscale fast path failed: {}", e);
                        break;
                    }
                }
            } else if self.config.convert_to_grayscale {
                cropped.to_luma()
            } else {
                cropped
            };

            match tile_frame(&prepared, &self.layout) {
                Ok(fragments) => {
                    for fragment in fragments {
                        batch[filled] = Some(fragment);
                        filled += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "Breaking frame {} into chunks failed unexpectedly: {}",
                        self.frames_consumed + 1,
                        e
                    );
                    break;
                }
            }

            self.frames_consumed += 1;
        }

        // rewind if no frames/chunks could be produced
        if batch.is_empty() {
            if let Err(e) = self.source.seek(self.config.start_frame) {
                warn!("Rewinding frame source failed: {}", e);
            }
            self.frames_consumed = 0;
        }

        batch
    }
}
