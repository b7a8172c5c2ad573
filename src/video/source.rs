use crate::error::SourceError;
use crate::frame::Frame;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Seam for the host's video decoder.
///
/// The pipeline never touches a container format directly; frames enter
/// through this trait one at a time, in order, with random seeking by frame
/// index.
pub trait FrameSource: Send {
    /// Total number of frames in the source
    fn frame_count(&self) -> u64;

    /// Width and height of decoded frames
    fn dimensions(&self) -> (u32, u32);

    /// Channel count of decoded frames
    fn channels(&self) -> u8;

    /// Position the cursor so the next read returns `frame_index`
    fn seek(&mut self, frame_index: u64) -> Result<(), SourceError>;

    /// Decode the next frame; `Ok(None)` past the end of the source
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// In-memory frame source, mostly for synthetic inputs and tests.
pub struct FrameVecSource {
    frames: Vec<Frame>,
    cursor: usize,
}

impl FrameVecSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames, cursor: 0 }
    }
}

impl FrameSource for FrameVecSource {
    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn dimensions(&self) -> (u32, u32) {
        self.frames
            .first()
            .map(|frame| frame.dimensions())
            .unwrap_or((0, 0))
    }

    fn channels(&self) -> u8 {
        self.frames.first().map(|frame| frame.channels()).unwrap_or(1)
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), SourceError> {
        if frame_index > self.frames.len() as u64 {
            return Err(SourceError::SeekOutOfRange {
                requested: frame_index,
                available: self.frames.len() as u64,
            });
        }
        self.cursor = frame_index as usize;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        match self.frames.get(self.cursor) {
            Some(frame) => {
                self.cursor += 1;
                Ok(Some(frame.clone()))
            }
            None => Ok(None),
        }
    }
}

/// Frame source over a directory of numbered still images.
///
/// Files are decoded with the `image` crate in lexicographic order; every
/// frame must match the dimensions of the first one.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    width: u32,
    height: u32,
    channels: u8,
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];

impl ImageSequenceSource {
    /// Scan `dir` for image files and probe the first one for geometry.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| SourceError::Open {
            path: dir.display().to_string(),
            details: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(SourceError::EmptySequence {
                path: dir.display().to_string(),
            });
        }

        let probe = image::open(&paths[0]).map_err(|e| SourceError::Open {
            path: paths[0].display().to_string(),
            details: e.to_string(),
        })?;

        let width = probe.width();
        let height = probe.height();
        let channels = if probe.color().has_color() { 3 } else { 1 };

        info!(
            "Opened image sequence {} ({} frames, {}x{}, {} channel(s))",
            dir.display(),
            paths.len(),
            width,
            height,
            channels
        );

        Ok(Self {
            paths,
            cursor: 0,
            width,
            height,
            channels,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn frame_count(&self) -> u64 {
        self.paths.len() as u64
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), SourceError> {
        if frame_index > self.paths.len() as u64 {
            return Err(SourceError::SeekOutOfRange {
                requested: frame_index,
                available: self.paths.len() as u64,
            });
        }
        self.cursor = frame_index as usize;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let frame_index = self.cursor as u64;

        debug!("Decoding frame {} from {}", frame_index, path.display());
        let decoded = image::open(path).map_err(|e| SourceError::Decode {
            frame: frame_index,
            details: e.to_string(),
        })?;

        if decoded.width() != self.width || decoded.height() != self.height {
            return Err(SourceError::Decode {
                frame: frame_index,
                details: format!(
                    "frame is {}x{}, expected {}x{}",
                    decoded.width(),
                    decoded.height(),
                    self.width,
                    self.height
                ),
            });
        }

        let frame = if self.channels == 1 {
            Frame::from_gray(decoded.into_luma8())
        } else {
            let rgb = decoded.into_rgb8();
            let (width, height) = rgb.dimensions();
            Frame::new(width, height, 3, rgb.into_raw()).map_err(|e| SourceError::Decode {
                frame: frame_index,
                details: e.to_string(),
            })?
        };

        self.cursor += 1;
        Ok(Some(frame))
    }
}
