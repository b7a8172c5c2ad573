//! Processor algorithm implementations for the two exemplar pipelines.

pub mod highlight;
pub mod median;
pub mod tracker;

pub use highlight::{HighlightObjectsAlgo, HighlightObjectsPack};
pub use median::{HistogramCounter, HistogramMedianAlgo};
pub use tracker::{ObjectTracker, TrackerAlgo};
