use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FramepipeConfig {
    pub video: VideoConfig,
    pub pipeline: PipelineConfig,
    pub background: BackgroundConfig,
    pub highlight: HighlightConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VideoConfig {
    /// Path to the source video (a directory of numbered frame images)
    #[serde(default = "default_video_path")]
    pub path: String,

    /// First frame to analyze (0-indexed)
    #[serde(default = "default_start_frame")]
    pub start_frame: u64,

    /// Cap on frames to process (<= 0 means all frames)
    #[serde(default = "default_frame_limit")]
    pub frame_limit: i64,

    /// Convert frames to single-channel grayscale before processing
    #[serde(default = "default_grayscale")]
    pub grayscale: bool,

    /// Source frames are already grayscale (first channel is extracted directly)
    #[serde(default = "default_source_is_grayscale")]
    pub source_is_grayscale: bool,

    /// Crop rectangle x offset in pixels
    #[serde(default)]
    pub crop_x: u32,

    /// Crop rectangle y offset in pixels
    #[serde(default)]
    pub crop_y: u32,

    /// Crop rectangle width (0 means to the frame edge)
    #[serde(default)]
    pub crop_width: u32,

    /// Crop rectangle height (0 means to the frame edge)
    #[serde(default)]
    pub crop_height: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Upper bound on worker threads (0 means hardware concurrency)
    #[serde(default)]
    pub max_threads: usize,

    /// Per-queue token capacity inside each processing unit
    #[serde(default = "default_token_storage_limit")]
    pub token_storage_limit: usize,

    /// Shuttle queue capacity between chained token processes
    #[serde(default = "default_shuttle_capacity")]
    pub shuttle_capacity: usize,

    /// Collect and log interval timing reports
    #[serde(default)]
    pub collect_timings: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackgroundConfig {
    /// Background extraction algorithm ("histogram" is the only codified one)
    #[serde(default = "default_bg_algorithm")]
    pub algorithm: String,

    /// Per-tile horizontal overlap buffer in pixels
    #[serde(default)]
    pub horizontal_buffer: u32,

    /// Per-tile vertical overlap buffer in pixels
    #[serde(default)]
    pub vertical_buffer: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HighlightConfig {
    /// Coarse binary threshold (-1 selects Otsu's method)
    #[serde(default = "default_threshold")]
    pub threshold: i32,

    /// Hysteresis low threshold
    #[serde(default = "default_threshold_lo")]
    pub threshold_lo: u8,

    /// Hysteresis high threshold
    #[serde(default = "default_threshold_hi")]
    pub threshold_hi: u8,

    /// Minimum object area (pixels) kept by the coarse pass
    #[serde(default = "default_min_size_threshold")]
    pub min_size_threshold: u32,

    /// Minimum object area (pixels) kept by the hysteresis pass
    #[serde(default = "default_min_size_hyst")]
    pub min_size_hyst: u32,

    /// Radius of the square structuring element for morphological opening
    #[serde(default = "default_kernel_radius")]
    pub kernel_radius: u8,
}

impl FramepipeConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("framepipe.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("video.path", default_video_path())?
            .set_default("video.start_frame", default_start_frame() as i64)?
            .set_default("video.frame_limit", default_frame_limit())?
            .set_default("video.grayscale", default_grayscale())?
            .set_default("video.source_is_grayscale", default_source_is_grayscale())?
            .set_default("video.crop_x", 0i64)?
            .set_default("video.crop_y", 0i64)?
            .set_default("video.crop_width", 0i64)?
            .set_default("video.crop_height", 0i64)?
            .set_default("pipeline.max_threads", 0i64)?
            .set_default(
                "pipeline.token_storage_limit",
                default_token_storage_limit() as i64,
            )?
            .set_default(
                "pipeline.shuttle_capacity",
                default_shuttle_capacity() as i64,
            )?
            .set_default("pipeline.collect_timings", false)?
            .set_default("background.algorithm", default_bg_algorithm())?
            .set_default("background.horizontal_buffer", 0i64)?
            .set_default("background.vertical_buffer", 0i64)?
            .set_default("highlight.threshold", default_threshold() as i64)?
            .set_default("highlight.threshold_lo", default_threshold_lo() as i64)?
            .set_default("highlight.threshold_hi", default_threshold_hi() as i64)?
            .set_default(
                "highlight.min_size_threshold",
                default_min_size_threshold() as i64,
            )?
            .set_default("highlight.min_size_hyst", default_min_size_hyst() as i64)?
            .set_default("highlight.kernel_radius", default_kernel_radius() as i64)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with FRAMEPIPE_ prefix
            .add_source(Environment::with_prefix("FRAMEPIPE").separator("_"))
            .build()?;

        let config: FramepipeConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video.path.is_empty() {
            return Err(ConfigError::Message(
                "Video path must not be empty".to_string(),
            ));
        }

        if self.background.algorithm != "histogram" {
            return Err(ConfigError::Message(format!(
                "Unknown background algorithm: {}",
                self.background.algorithm
            )));
        }

        if self.pipeline.shuttle_capacity == 0 {
            return Err(ConfigError::Message(
                "shuttle_capacity must be greater than 0".to_string(),
            ));
        }

        if self.highlight.threshold < -1 || self.highlight.threshold > 255 {
            return Err(ConfigError::Message(
                "highlight threshold must be in -1..=255".to_string(),
            ));
        }

        if self.highlight.threshold_lo > self.highlight.threshold_hi {
            return Err(ConfigError::Message(
                "threshold_lo must not exceed threshold_hi".to_string(),
            ));
        }

        if self.highlight.kernel_radius == 0 {
            return Err(ConfigError::Message(
                "kernel_radius must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for FramepipeConfig {
    fn default() -> Self {
        Self {
            video: VideoConfig {
                path: default_video_path(),
                start_frame: default_start_frame(),
                frame_limit: default_frame_limit(),
                grayscale: default_grayscale(),
                source_is_grayscale: default_source_is_grayscale(),
                crop_x: 0,
                crop_y: 0,
                crop_width: 0,
                crop_height: 0,
            },
            pipeline: PipelineConfig {
                max_threads: 0,
                token_storage_limit: default_token_storage_limit(),
                shuttle_capacity: default_shuttle_capacity(),
                collect_timings: false,
            },
            background: BackgroundConfig {
                algorithm: default_bg_algorithm(),
                horizontal_buffer: 0,
                vertical_buffer: 0,
            },
            highlight: HighlightConfig {
                threshold: default_threshold(),
                threshold_lo: default_threshold_lo(),
                threshold_hi: default_threshold_hi(),
                min_size_threshold: default_min_size_threshold(),
                min_size_hyst: default_min_size_hyst(),
                kernel_radius: default_kernel_radius(),
            },
        }
    }
}

// Default value functions
fn default_video_path() -> String {
    "./frames".to_string()
}
fn default_start_frame() -> u64 {
    0
}
fn default_frame_limit() -> i64 {
    0
}
fn default_grayscale() -> bool {
    true
}
fn default_source_is_grayscale() -> bool {
    false
}

fn default_token_storage_limit() -> usize {
    10
}
fn default_shuttle_capacity() -> usize {
    4
}

fn default_bg_algorithm() -> String {
    "histogram".to_string()
}

fn default_threshold() -> i32 {
    -1
}
fn default_threshold_lo() -> u8 {
    20
}
fn default_threshold_hi() -> u8 {
    40
}
fn default_min_size_threshold() -> u32 {
    40
}
fn default_min_size_hyst() -> u32 {
    8
}
fn default_kernel_radius() -> u8 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FramepipeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.background.algorithm, "histogram");
        assert_eq!(config.pipeline.max_threads, 0);
    }

    #[test]
    fn test_config_validation_rejects_bad_values() {
        let mut config = FramepipeConfig::default();

        config.background.algorithm = "triframe".to_string();
        assert!(config.validate().is_err());
        config.background.algorithm = "histogram".to_string();
        assert!(config.validate().is_ok());

        config.highlight.threshold_lo = 200;
        config.highlight.threshold_hi = 100;
        assert!(config.validate().is_err());
        config.highlight.threshold_lo = 20;
        config.highlight.threshold_hi = 40;

        config.video.path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = FramepipeConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: FramepipeConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.highlight.threshold, config.highlight.threshold);
        assert_eq!(parsed.video.path, config.video.path);
    }
}
