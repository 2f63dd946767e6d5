//! deepzoom - Tile scheduling and caching for deep-zoom images.
//!
//! `inspect` prints the pyramid of a DZI descriptor; `simulate` drives a
//! scripted viewer session against the real tile store.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deepzoom::{
    config::{Cli, Command, InspectArgs, SimulateArgs, SourceArgs},
    io::{FsTileLoader, HttpTileLoader, S3TileLoader, TileLoader},
    pyramid::{DziTileSource, TileSource},
    viewer::Viewer,
    viewport::Point,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Inspect(args) => run_inspect(args).await,
        Command::Simulate(args) => run_simulate(args).await,
    }
}

/// Filter used when `DEEPZOOM_LOG` is unset. The AWS and HTTP stacks stay at
/// `warn` so per-tile requests don't drown the frame log.
fn default_log_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("warn,deepzoom={level}")
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("DEEPZOOM_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(verbose))
        .init();
}

// =============================================================================
// Source Resolution
// =============================================================================

/// Pick a loader for the descriptor location and fetch the descriptor.
///
/// Returns the loader together with the parsed tile source.
async fn open_source(args: &SourceArgs) -> Result<(Arc<dyn TileLoader>, DziTileSource), String> {
    let descriptor = args.descriptor.as_str();

    let (loader, address): (Arc<dyn TileLoader>, String) = if descriptor.starts_with("s3://") {
        let url = url::Url::parse(descriptor).map_err(|e| format!("{}: {}", descriptor, e))?;
        let bucket = url
            .host_str()
            .ok_or_else(|| format!("{}: missing bucket", descriptor))?
            .to_string();
        let loader = S3TileLoader::connect(&args.s3_settings(), bucket, "").await;
        (Arc::new(loader), descriptor.to_string())
    } else if descriptor.starts_with("http://") || descriptor.starts_with("https://") {
        let loader = HttpTileLoader::new().map_err(|e| e.to_string())?;
        (Arc::new(loader), descriptor.to_string())
    } else {
        let path = Path::new(descriptor);
        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => ".".into(),
        };
        let name = path
            .file_name()
            .ok_or_else(|| format!("{}: not a file", descriptor))?
            .to_string_lossy()
            .into_owned();
        (Arc::new(FsTileLoader::new(root)), name)
    };

    let bytes = loader
        .load(&address, None)
        .await
        .map_err(|e| format!("failed to fetch descriptor: {}", e))?;
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|e| format!("descriptor is not UTF-8: {}", e))?;
    let source = DziTileSource::from_descriptor(&address, &text).map_err(|e| e.to_string())?;

    Ok((loader, source))
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(args: InspectArgs) -> ExitCode {
    let (loader, source) = match open_source(&args.source).await {
        Ok(opened) => opened,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let descriptor = source.descriptor();
    println!("Descriptor: {}", args.source.descriptor);
    println!("Loader:     {}", loader.identifier());
    println!("Size:       {} x {}", source.width(), source.height());
    println!(
        "Tiles:      {} px, overlap {}, {}",
        descriptor.tile_size, descriptor.overlap, descriptor.format
    );
    println!("Tiles URL:  {}", source.tiles_url());
    if !descriptor.display_rects.is_empty() {
        println!("Sparse:     {} display rect(s)", descriptor.display_rects.len());
    }
    println!();
    println!("level   scale          width x height    tiles");
    println!("─────────────────────────────────────────────────────");

    let mut total = 0u64;
    for level in source.min_level()..=source.max_level() {
        let dims = source.level_dimensions(level);
        let (cols, rows) = source.num_tiles(level);
        let count = (0..rows)
            .flat_map(|y| (0..cols).map(move |x| (x, y)))
            .filter(|&(x, y)| source.tile_exists(level, x, y))
            .count() as u64;
        total += count;
        println!(
            "{:>5}   {:<12}   {:>7} x {:<7}   {} ({} x {})",
            level,
            format!("1/{}", 1u64 << (source.max_level() - level).min(63)),
            dims.x.ceil() as u64,
            dims.y.ceil() as u64,
            count,
            cols,
            rows
        );
    }
    println!();
    println!("Total: {} tile(s)", total);

    ExitCode::SUCCESS
}

// =============================================================================
// Simulate Command
// =============================================================================

async fn run_simulate(args: SimulateArgs) -> ExitCode {
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let (loader, source) = match open_source(&args.source).await {
        Ok(opened) => opened,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = args.viewer.to_config();
    info!("Configuration:");
    info!("  Loader: {}", loader.identifier());
    info!(
        "  Scheduler: {} concurrent, {}ms timeout",
        config.scheduler.concurrency_limit, config.scheduler.timeout_ms
    );
    info!("  Cache: {} entries", config.cache.max_entries);
    info!("  Container: {} x {}", args.width, args.height);

    let mut viewer = Viewer::new(
        config,
        Arc::new(source),
        Point::new(args.width, args.height),
        loader,
    );

    let script = Script::new(args.frames, args.zoom_step);
    let mut now = 0u64;
    for frame_index in 0..args.frames {
        script.apply(frame_index, &mut viewer);

        let frame = viewer.tick(now);
        if args.report_every > 0 && frame_index % args.report_every == 0 {
            let stats = viewer.stats();
            info!(
                frame = frame_index,
                now,
                zoom = viewer.viewport().zoom(true),
                drawn = frame.tile_count(),
                pending = frame.pending_count(),
                running = stats.scheduler.running,
                queued = stats.scheduler.queued,
                cached = stats.cache.entries,
                "frame"
            );
        }

        tokio::time::sleep(Duration::from_millis(args.frame_ms)).await;
        now += args.frame_ms;
    }

    // Let in-flight jobs settle so the summary reflects them
    while viewer.wait_for_activity().await {
        now += args.frame_ms;
        viewer.tick(now);
    }
    let frame = viewer.tick(now);

    let stats = viewer.stats();
    info!("");
    info!("Summary after {} frame(s), {}ms simulated:", args.frames, now);
    info!(
        "  Jobs: {} submitted, {} deduplicated, {} completed, {} failed ({} timed out), {} cancelled, {} discarded",
        stats.scheduler.submitted,
        stats.scheduler.deduplicated,
        stats.scheduler.completed,
        stats.scheduler.failed,
        stats.scheduler.timed_out,
        stats.scheduler.cancelled,
        stats.scheduler.discarded
    );
    info!(
        "  Cache: {} / {} entries, {} evicted",
        stats.cache.entries, stats.cache.max_entries, stats.cache.evictions
    );
    for (id, layer) in &stats.layers {
        info!(
            "  {}: level {}, {} ready, {} failed",
            id, layer.target_level, layer.ready, layer.failed
        );
    }
    if frame.pending_count() > 0 {
        warn!("{} wanted tile(s) never loaded", frame.pending_count());
    }

    ExitCode::SUCCESS
}

/// Scripted navigation: zoom in toward a point off center, pan across,
/// then zoom back out to the home view.
struct Script {
    zoom_in_at: u32,
    pan_at: u32,
    home_at: u32,
    zoom_step: f64,
}

impl Script {
    fn new(frames: u32, zoom_step: f64) -> Self {
        Self {
            zoom_in_at: frames / 8,
            pan_at: frames * 3 / 8,
            home_at: frames * 5 / 8,
            zoom_step,
        }
    }

    fn apply(&self, frame: u32, viewer: &mut Viewer) {
        let viewport = viewer.viewport_mut();
        if frame == self.zoom_in_at {
            let bounds = viewport.get_bounds(false);
            let anchor = bounds.top_left() + bounds.size() * 0.3;
            viewport.zoom_by(self.zoom_step * self.zoom_step, Some(anchor));
            viewport.apply_constraints(false);
        } else if frame == self.pan_at {
            let bounds = viewport.get_bounds(false);
            viewport.pan_by(Point::new(bounds.width * 0.5, bounds.height * 0.25), false);
            viewport.apply_constraints(false);
        } else if frame == self.home_at {
            viewport.go_home(false);
        }
    }
}
