use thiserror::Error;

/// Main error type for the framepipe system
#[derive(Error, Debug)]
pub enum FramepipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Algorithm error: {0}")]
    Algo(#[from] AlgoError),

    #[error("System error: {message}")]
    System { message: String },
}

/// Frame construction / geometry error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Buffer length {actual} does not match {width}x{height}x{channels}")]
    BufferMismatch {
        width: u32,
        height: u32,
        channels: u8,
        actual: usize,
    },

    #[error("Unsupported channel count: {channels} (expected 1-4)")]
    UnsupportedChannels { channels: u8 },

    #[error("Rectangle {x},{y} {width}x{height} exceeds frame {frame_width}x{frame_height}")]
    RectOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("Channel index {index} out of range for {channels}-channel frame")]
    ChannelOutOfRange { index: u8, channels: u8 },

    #[error("Expected a single-channel frame, got {channels} channels")]
    NotGrayscale { channels: u8 },
}

/// Frame source error types
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open frame source {path}: {details}")]
    Open { path: String, details: String },

    #[error("No decodable frames found in {path}")]
    EmptySequence { path: String },

    #[error("Failed to decode frame {frame}: {details}")]
    Decode { frame: u64, details: String },

    #[error("Seek to frame {requested} out of range (source has {available} frames)")]
    SeekOutOfRange { requested: u64, available: u64 },
}

/// Pipeline coordination error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Token process is already running on another thread")]
    AlreadyRunning,

    #[error("Batch size {batch_size} is invalid (must be 1..={worker_limit})")]
    InvalidBatchSize {
        batch_size: usize,
        worker_limit: usize,
    },

    #[error("Generator batch size {generator} does not match consumer batch size {consumer}")]
    BatchSizeMismatch { generator: usize, consumer: usize },

    #[error("Expected {expected} processor packs, got {actual}")]
    PackCountMismatch { expected: usize, actual: usize },

    #[error("Generator produced a batch of {actual} slots, expected {expected}")]
    MalformedBatch { expected: usize, actual: usize },

    #[error("Processing unit {unit} failed: {details}")]
    UnitFailure { unit: usize, details: String },
}

/// Algorithm error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgoError {
    #[error("Background image is {background_width}x{background_height} but frames are {frame_width}x{frame_height}")]
    BackgroundMismatch {
        background_width: u32,
        background_height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("Unknown background algorithm: {name}")]
    UnknownAlgorithm { name: String },

    #[error("Video too long for any histogram counter width: {frames} frames")]
    TooManyFrames { frames: u64 },

    #[error("Object tracker failed on frame {frame}: {details}")]
    Tracker { frame: u64, details: String },
}

impl FramepipeError {
    /// Create a system error with a message
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, FramepipeError>;
