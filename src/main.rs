use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use framepipe::video::source::ImageSequenceSource;
use framepipe::{extract_background, BackgroundOptions, FramepipeConfig, PixelRect};

#[derive(Parser, Debug)]
#[command(name = "framepipe")]
#[command(about = "Parallel per-frame video analysis: temporal-median background extraction")]
#[command(version)]
#[command(
    long_about = "Computes the per-pixel temporal median of a video (a directory of numbered \
frame images) using a bounded multi-stage token pipeline that spreads the per-frame histogram \
work across worker threads."
)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "framepipe.toml",
        help = "Path to TOML configuration file"
    )]
    config: String,

    /// Override the video path from the configuration
    #[arg(long, value_name = "DIR", help = "Directory of numbered frame images")]
    video: Option<String>,

    /// Where to write the extracted background image
    #[arg(
        short,
        long,
        default_value = "background.png",
        help = "Output path for the background image (PNG)"
    )]
    output: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without running")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(
        long,
        value_name = "FORMAT",
        help = "Log output format: json, pretty, or compact"
    )]
    log_format: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config();
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting framepipe v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let mut config = match FramepipeConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(video) = args.video {
        config.video.path = video;
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    // Open the frame source and run the background pipeline
    let source = ImageSequenceSource::open(&config.video.path).map_err(|e| {
        error!("Failed to open video {}: {}", config.video.path, e);
        framepipe::FramepipeError::from(e)
    })?;

    let options = background_options(&config);
    let background = extract_background(Box::new(source), &options).map_err(|e| {
        error!("Background extraction failed: {}", e);
        e
    })?;

    // Persist the result
    save_background(&background, &args.output)?;
    info!("Background image written to {}", args.output);
    println!("✓ Background written to {}", args.output);

    Ok(())
}

/// Write a background frame out as an image file
fn save_background(background: &framepipe::Frame, path: &str) -> Result<()> {
    match background.channels() {
        1 => {
            let image = background
                .to_gray()
                .map_err(framepipe::FramepipeError::from)?;
            image.save(path)?;
        }
        3 => {
            let image = image::RgbImage::from_raw(
                background.width(),
                background.height(),
                background.data().to_vec(),
            )
            .ok_or_else(|| anyhow::anyhow!("background buffer does not match its dimensions"))?;
            image.save(path)?;
        }
        channels => {
            anyhow::bail!("cannot save a {channels}-channel background image");
        }
    }
    Ok(())
}

/// Translate the configuration surface into driver options
fn background_options(config: &FramepipeConfig) -> BackgroundOptions {
    let crop = if config.video.crop_width > 0 || config.video.crop_height > 0 {
        Some(PixelRect::new(
            config.video.crop_x,
            config.video.crop_y,
            config.video.crop_width,
            config.video.crop_height,
        ))
    } else {
        None
    };

    BackgroundOptions {
        frame_limit: config.video.frame_limit,
        start_frame: config.video.start_frame,
        max_threads: config.pipeline.max_threads,
        grayscale: config.video.grayscale,
        source_is_grayscale: config.video.source_is_grayscale,
        crop,
        horizontal_buffer: config.background.horizontal_buffer,
        vertical_buffer: config.background.vertical_buffer,
        token_storage_limit: config.pipeline.token_storage_limit,
        collect_timings: config.pipeline.collect_timings,
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{
        fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    };

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("framepipe={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Framepipe Configuration File");
    println!("# These are the built-in defaults; override in TOML or env vars");
    println!();

    let default_config = FramepipeConfig::default();
    match toml::to_string_pretty(&default_config) {
        Ok(toml_str) => println!("{}", toml_str),
        Err(e) => eprintln!("Failed to render default config: {}", e),
    }
}
