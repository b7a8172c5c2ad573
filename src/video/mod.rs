//! Video-frame tokenization: sources, tiling, batch generation, reassembly.

pub mod assembler;
pub mod generator;
pub mod source;
pub mod tiles;

pub use assembler::FragmentAssembler;
pub use generator::{FrameGeneratorConfig, VideoFrameGenerator};
pub use source::{FrameSource, FrameVecSource, ImageSequenceSource};
pub use tiles::{tile_frame, tile_layout, Fragment, TileRect};
