use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbaImage;
use log::{debug, info, warn};

use thumbq::cli::{
    CliArgs, Command, CompressionLevel, InitConfigArgs, RenderArgs, ScaleArgs, ThumbnailFormat,
};
use thumbq::config::{CompressConfig, LoadedConfig, Settings, ThumbConfig, save_config};
use thumbq::dispatch::offline_placeholder;
use thumbq::output::{save_thumbnail, thumbnail_paths};
use thumbq::picture::{FilePicture, PictureId, Size, collect_pictures};
use thumbq::queue::{Priority, RequestorId};
use thumbq::scale::{ImageScaler, ScalablePicture, ScaleMode};
use thumbq::service::ThumbnailService;

#[allow(clippy::print_stderr)]
fn main() {
    if let Err(e) = run() {
        // Use eprintln instead of error! because logger may not be initialized
        // (e.g., config loading fails before logger init)
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = CliArgs::parse();

    match &cli.command {
        Command::Render(args) => {
            // Load config if specified and merge with CLI args
            let merged = merge_config_with_args(args)?;
            init_logging(merged.verbose);
            render(merged)
        }
        Command::Scale(args) => {
            init_logging(args.verbose);
            scale(args)
        }
        Command::InitConfig(args) => {
            init_logging(false);
            init_config(args)
        }
    }
}

fn init_logging(verbose: bool) {
    env_logger::Builder::new()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// A callback result waiting to be written out.
enum Finished {
    Ready(RequestorId, Arc<RgbaImage>),
    Failed(RequestorId, String),
}

fn render(merged: MergedConfig) -> Result<()> {
    info!("thumbq v{}", env!("CARGO_PKG_VERSION"));

    // Create output directory if it doesn't exist
    if !merged.output.exists() {
        fs::create_dir_all(&merged.output)?;
    }

    let pictures = collect_pictures(&merged.input)?;
    info!(
        "Rendering {} thumbnails with {} worker(s)",
        pictures.len(),
        merged.settings.workers
    );

    let targets = thumbnail_paths(&merged.output, &pictures, merged.format);

    let mut service = ThumbnailService::new(Arc::new(merged.settings.clone()))?;
    let size = service.default_size();

    let finished = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&finished);
    service.on_thumbnail_ready(move |requestor, bitmap| {
        sink.borrow_mut().push(Finished::Ready(requestor, bitmap));
    });
    let sink = Rc::clone(&finished);
    service.on_thumbnail_error(move |requestor, err| {
        sink.borrow_mut()
            .push(Finished::Failed(requestor, err.to_string()));
    });

    // The requestor id doubles as the index into `pictures` and `targets`
    for (index, path) in pictures.iter().enumerate() {
        let priority = if index < merged.visible {
            Priority::High
        } else {
            Priority::Low
        };
        let id = index as u64;
        service.request_thumbnail_creation(
            RequestorId(id),
            Arc::new(FilePicture::new(PictureId(id), path)),
            priority,
            size,
        );
    }

    let mut remaining = pictures.len();
    let mut written = 0usize;
    let mut failed = 0usize;
    while remaining > 0 {
        let dispatched = service.dispatch_timeout(Duration::from_millis(100));
        let batch: Vec<Finished> = finished.borrow_mut().drain(..).collect();

        for event in batch {
            remaining = remaining.saturating_sub(1);
            match event {
                Finished::Ready(requestor, bitmap) => {
                    let Some(path) = indexed(&targets, requestor) else {
                        continue;
                    };
                    save_thumbnail(
                        &bitmap,
                        path,
                        merged.format,
                        merged.jpeg_quality,
                        merged.compress,
                    )?;
                    debug!("Saved {}", path.display());
                    written += 1;
                }
                Finished::Failed(requestor, message) => {
                    failed += 1;
                    let (Some(source), Some(path)) =
                        (indexed(&pictures, requestor), indexed(&targets, requestor))
                    else {
                        continue;
                    };
                    warn!("Skipping {}: {}", source.display(), message);
                    write_placeholder(&merged, path, size)?;
                }
            }
        }

        if dispatched == 0 && service.is_idle() && finished.borrow().is_empty() {
            service.dispatch_pending();
            if finished.borrow().is_empty() {
                break;
            }
        }
    }

    if remaining > 0 {
        warn!("{} thumbnail(s) never finished", remaining);
    }

    let cache = service.cache_stats();
    let pool = service.pool_stats();
    debug!(
        "Cache: {} entries, {} hits, {} misses; pool: {} processed, {} discarded",
        cache.entries, cache.hits, cache.misses, pool.processed, pool.discarded
    );
    service.shutdown();

    info!("Wrote {} thumbnail(s), {} failed", written, failed);
    Ok(())
}

/// Look up the per-picture entry a requestor id stands for.
fn indexed(paths: &[PathBuf], requestor: RequestorId) -> Option<&PathBuf> {
    usize::try_from(requestor.0)
        .ok()
        .and_then(|index| paths.get(index))
}

fn write_placeholder(merged: &MergedConfig, path: &Path, size: Size) -> Result<()> {
    save_thumbnail(
        &offline_placeholder(size),
        path,
        merged.format,
        merged.jpeg_quality,
        None,
    )?;
    debug!("Wrote placeholder {}", path.display());
    Ok(())
}

fn scale(args: &ScaleArgs) -> Result<()> {
    let mode = if args.fast {
        ScaleMode::Fast
    } else {
        ScaleMode::Quality
    };
    let defaults = ThumbConfig::default();
    let mut picture =
        ScalablePicture::new(ImageScaler::new(mode, args.steps), defaults.max_image_bytes);
    picture.set_scale_factor(args.factor);

    picture
        .load_picture(&args.input, args.rotation)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let (width, height) = picture.original_size();
    picture
        .scale_picture()
        .with_context(|| format!("failed to scale {}", args.input.display()))?;
    let (scaled_width, scaled_height) = picture.scaled_size();
    let image = picture
        .take_scaled()
        .context("scaled picture was not produced")?;

    let format = args
        .output
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ThumbnailFormat::from_config)
        .unwrap_or_default();
    save_thumbnail(&image, &args.output, format, defaults.jpeg_quality, None)?;

    info!(
        "Scaled {} from {}x{} to {}x{} in {:?}: {}",
        args.input.display(),
        width,
        height,
        scaled_width,
        scaled_height,
        picture.load_time(),
        args.output.display()
    );
    Ok(())
}

fn init_config(args: &InitConfigArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            args.path.display()
        );
    }
    save_config(&ThumbConfig::default(), &args.path)?;
    info!("Wrote default config to {}", args.path.display());
    Ok(())
}

/// Merged configuration from CLI args and optional config file.
struct MergedConfig {
    input: Vec<PathBuf>,
    output: PathBuf,
    settings: Settings,
    visible: usize,
    format: ThumbnailFormat,
    jpeg_quality: u8,
    compress: Option<CompressionLevel>,
    verbose: bool,
}

/// Merge config file values with CLI arguments.
/// CLI arguments always take precedence over config values.
fn merge_config_with_args(args: &RenderArgs) -> Result<MergedConfig> {
    // Load config if specified
    let loaded_config = if let Some(config_path) = &args.config {
        Some(
            LoadedConfig::load(config_path)
                .with_context(|| format!("failed to load config: {}", config_path.display()))?,
        )
    } else {
        None
    };

    // Determine input files: CLI args override config
    let input = if !args.input.is_empty() {
        args.input.clone()
    } else if let Some(ref lc) = loaded_config {
        lc.resolve_inputs()
            .context("failed to resolve input files from config")?
    } else {
        // This shouldn't happen due to clap's required_unless_present
        Vec::new()
    };

    // Determine output directory: CLI > config > default
    let output = args.output.clone().unwrap_or_else(|| {
        loaded_config
            .as_ref()
            .map(|lc| lc.resolve_output_dir())
            .unwrap_or_else(|| PathBuf::from("."))
    });

    // Start from the config file (or defaults) and apply CLI overrides
    let mut config = loaded_config
        .as_ref()
        .map(|lc| lc.config.clone())
        .unwrap_or_default();

    if let Some(size) = args.size {
        config.thumbnail_size = size;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(steps) = args.steps {
        config.scale_steps = steps;
    }
    if let Some(quality) = args.jpeg_quality {
        config.jpeg_quality = quality;
    }

    // Boolean flags: CLI presence overrides config
    if args.fast {
        config.fast_scale = true;
    }
    if args.enlarge {
        config.dont_enlarge_small_images = false;
    }

    let settings = Settings::from_config(&config).context("invalid thumbnail settings")?;

    // Format: CLI > config > default
    let format = if let Some(f) = args.format {
        f
    } else {
        ThumbnailFormat::from_config(&config.format).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown format '{}' in config file. Valid values: png, jpeg",
                config.format
            )
        })?
    };

    // Compress: CLI option overrides config
    let compress = if args.compress.is_some() {
        args.compress
    } else {
        config.compress.as_ref().map(|c| match c {
            CompressConfig::Level(n) => CompressionLevel::Level(*n),
            CompressConfig::Max(_) => CompressionLevel::Max,
        })
    };

    Ok(MergedConfig {
        input,
        output,
        settings,
        visible: args.visible,
        format,
        jpeg_quality: config.jpeg_quality,
        compress,
        verbose: args.verbose,
    })
}
