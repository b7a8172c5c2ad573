pub mod algos;
pub mod background;
pub mod config;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod queue;
pub mod timing;
pub mod tracking;
pub mod video;

pub use background::{extract_background, BackgroundOptions};
pub use config::{
    BackgroundConfig, FramepipeConfig, HighlightConfig, PipelineConfig, VideoConfig,
};
pub use error::{AlgoError, FrameError, FramepipeError, PipelineError, Result, SourceError};
pub use frame::{Frame, PixelRect};
pub use pipeline::{
    thread_budget, Batch, BatchConsumer, BatchGenerator, BatchIntermediary, GeneratorAlgo,
    ProcessingUnit, ProcessorAlgo, ThreadedBatchGenerator, TokenProcess, UnitInsertStatus,
    UnitResultStatus, UnitState,
};
pub use queue::{InsertStatus, TokenQueue, TryGetStatus, TryInsertStatus};
pub use timing::{IntervalReport, IntervalTimer};
pub use tracking::{track_objects, TrackingOptions};
pub use video::{
    tile_frame, tile_layout, FragmentAssembler, Fragment, FrameGeneratorConfig, FrameSource,
    FrameVecSource, ImageSequenceSource, TileRect, VideoFrameGenerator,
};
pub use algos::{
    HighlightObjectsAlgo, HighlightObjectsPack, HistogramCounter, HistogramMedianAlgo,
    ObjectTracker, TrackerAlgo,
};
