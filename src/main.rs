//! CLI entry point for the congestion heatmap generator.
//!
//! Provides subcommands for running the full trace-to-frames pipeline,
//! recomputing the slow-point cache, and clearing it.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use congestion_heatmap::config::Config;
use congestion_heatmap::render::PlottersRenderer;
use congestion_heatmap::speed::SlowPoint;
use congestion_heatmap::{batch, cache, density, frames};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Seed for the optional down-sampling step, fixed so reruns are comparable.
const SAMPLE_SEED: u64 = 42;

#[derive(Parser)]
#[command(name = "congestion_heatmap")]
#[command(about = "Renders time-sliced congestion heatmaps from vehicle GPS traces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: ingest (or load the cache), then render frames
    Generate {
        #[command(flatten)]
        opts: PipelineOpts,
    },
    /// Recompute the slow points and write the cache, without rendering
    Ingest {
        #[command(flatten)]
        opts: PipelineOpts,
    },
    /// Delete the slow-point cache artifact
    ClearCache {
        /// Cache artifact to delete
        #[arg(long, default_value = "cached_slow_points.bin")]
        cache_file: PathBuf,
    },
}

#[derive(clap::Args)]
struct PipelineOpts {
    /// Directory containing per-vehicle trace files (*.txt)
    #[arg(short, long, default_value = "taxi_log_2008_by_id")]
    data_dir: PathBuf,

    /// Directory to write rendered frames to
    #[arg(short, long, default_value = "heatmaps_output")]
    output_dir: PathBuf,

    /// Width of each heatmap time bucket, in hours
    #[arg(long, default_value_t = 1)]
    interval_hours: u32,

    /// Keep points moving slower than this many km/h
    #[arg(long, default_value_t = 20.0)]
    speed_threshold: f64,

    /// Longest report gap (seconds) over which a speed is still derived
    #[arg(long, default_value_t = 600.0)]
    max_time_delta: f64,

    /// Discard samples faster than this many km/h as GPS errors
    #[arg(long, default_value_t = 150.0)]
    max_speed: f64,

    /// Number of trace files per ingestion batch
    #[arg(long, default_value_t = 500)]
    batch_size: usize,

    /// Slow-point cache artifact, resolved in the working directory
    #[arg(long, default_value = "cached_slow_points.bin")]
    cache_file: PathBuf,

    /// Uniform down-sampling fraction in (0, 1]
    #[arg(long, default_value_t = 1.0)]
    sample_fraction: f64,
}

impl PipelineOpts {
    fn into_config(self) -> Result<Config> {
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            bail!(
                "sample fraction must be in (0, 1], got {}",
                self.sample_fraction
            );
        }
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        Ok(Config {
            data_dir: self.data_dir,
            output_dir: self.output_dir,
            time_interval_hours: self.interval_hours,
            speed_threshold_kmh: self.speed_threshold,
            max_time_delta_seconds: self.max_time_delta,
            max_speed_kmh: self.max_speed,
            batch_size: self.batch_size,
            cache_filename: self.cache_file,
            map_bounds: Config::default().map_bounds,
            sample_fraction: self.sample_fraction,
        })
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/congestion_heatmap.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("congestion_heatmap.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { opts } => {
            let config = opts.into_config()?;
            run_generate(&config)?;
        }
        Commands::Ingest { opts } => {
            let config = opts.into_config()?;
            run_ingest(&config)?;
        }
        Commands::ClearCache { cache_file } => {
            if cache_file.exists() {
                std::fs::remove_file(&cache_file)?;
                info!(cache = %cache_file.display(), "Cache artifact deleted");
            } else {
                info!(cache = %cache_file.display(), "No cache artifact to delete");
            }
        }
    }

    Ok(())
}

/// Full pipeline: slow points (cached or recomputed), one range pass, one
/// render pass.
fn run_generate(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir)?;

    let slow_points = processed_slow_points(config)?;
    let global = density::compute_global_density_range(&slow_points, config)?;

    let renderer = PlottersRenderer::new();
    let generated = frames::render_frames(&slow_points, &global, config, &renderer)?;

    info!(
        slow_points = slow_points.len(),
        generated,
        output_dir = %config.output_dir.display(),
        "Pipeline complete"
    );
    Ok(())
}

/// Recomputes the slow points from the trace files and rewrites the cache.
fn run_ingest(config: &Config) -> Result<()> {
    let slow_points = batch::collect_slow_points(config)?;
    if slow_points.is_empty() {
        bail!("no slow points found in any batch");
    }
    cache::save(&config.cache_filename, &slow_points);
    Ok(())
}

/// Returns the slow points for this run: a cache hit bypasses ingestion
/// entirely; a miss runs the batch loop and saves the result. The optional
/// down-sampling applies to either path.
fn processed_slow_points(config: &Config) -> Result<Vec<SlowPoint>> {
    let slow_points = match cache::load(&config.cache_filename) {
        Some(points) => points,
        None => {
            let points = batch::collect_slow_points(config)?;
            cache::save(&config.cache_filename, &points);
            points
        }
    };

    if slow_points.is_empty() {
        bail!("no slow points found in any batch; nothing to render");
    }

    Ok(sample_points(slow_points, config.sample_fraction))
}

fn sample_points(points: Vec<SlowPoint>, fraction: f64) -> Vec<SlowPoint> {
    if fraction >= 1.0 {
        return points;
    }

    let keep = ((points.len() as f64) * fraction).round() as usize;
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let sampled: Vec<SlowPoint> = points.choose_multiple(&mut rng, keep).cloned().collect();

    info!(
        total = points.len(),
        sampled = sampled.len(),
        fraction,
        "Down-sampled slow points"
    );
    sampled
}
