//! gridpath-bench: CLI tool for toolpath conversion and pipeline diagnostics.
//!
//! Reads an endpoint CSV (`X,Y,Z` header, consecutive rows pair into
//! segments), runs the conversion pipeline with configurable parameters,
//! and prints detailed per-stage diagnostics. Useful for:
//!
//! - Comparing neighbor search backends (`linear` vs `rtree`)
//! - Tuning cell size and 2-opt stopping parameters
//! - Measuring per-stage durations on large drawings
//! - Producing the key record and tour CSV for a drawing
//! - Rebuilding toolpaths from a key record file (`--from-keys`)
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin gridpath-bench -- [OPTIONS] <CSV_PATH>
//! cargo run --release --bin gridpath-bench -- [OPTIONS] --from-keys <PATH>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use gridpath_export::KeyRecord;
use gridpath_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use gridpath_pipeline::{
    BoundsPolicy, NeighborSearch, PipelineConfig, Segment, StagedResult, TourBuilder,
    TourRefinerKind,
};
use tracing_subscriber::EnvFilter;

/// Toolpath conversion and diagnostics for gridpath.
///
/// Rasterizes the segments of an endpoint CSV onto the build plate grid,
/// orders the occupied cells into a closed toolpath, and prints per-stage
/// timing and count diagnostics.
#[derive(Parser)]
#[command(name = "gridpath-bench", version)]
struct Cli {
    /// Path to the endpoint CSV.
    #[arg(required_unless_present = "from_keys")]
    csv_path: Option<PathBuf>,

    /// Rebuild toolpaths from a key record (JSON Lines) file instead of
    /// converting a drawing.
    ///
    /// The grid comes from each record; the search and refinement flags
    /// (or `--config-json`) select how the tour is built.
    #[arg(long, conflicts_with_all = ["csv_path", "keys", "endpoints", "runs"])]
    from_keys: Option<PathBuf>,

    /// Grid cell size in millimetres.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CELL_SIZE)]
    cell_size: f64,

    /// Build plate side length in millimetres.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BUILD_DIM)]
    build_dim: f64,

    /// Handling of endpoints that fall outside the grid.
    #[arg(long, value_enum, default_value_t = Bounds::Reject)]
    bounds: Bounds,

    /// Nearest-neighbor search backend.
    #[arg(long, value_enum, default_value_t = Search::Linear)]
    search: Search,

    /// Tour refinement strategy.
    #[arg(long, value_enum, default_value_t = Refiner::TwoOpt)]
    refiner: Refiner,

    /// Stop 2-opt once a pass shortens the tour by less than this fraction.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_IMPROVEMENT_THRESHOLD)]
    improvement_threshold: f64,

    /// Upper bound on 2-opt passes.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_REFINE_PASSES)]
    max_refine_passes: u32,

    /// Write the key record (JSON) to file.
    #[arg(long)]
    keys: Option<PathBuf>,

    /// Write the closed tour (CSV) to file.
    ///
    /// With `--from-keys` the file must hold exactly one record.
    #[arg(long)]
    tour: Option<PathBuf>,

    /// Write the parsed segments back out as a normalized endpoint CSV.
    #[arg(long)]
    endpoints: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
    )]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization; missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Out-of-bounds endpoint handling.
#[derive(Clone, Copy, ValueEnum)]
enum Bounds {
    /// Fail the conversion.
    Reject,
    /// Clamp onto the nearest edge cell.
    Clamp,
}

/// Nearest-neighbor search backend selection.
#[derive(Clone, Copy, ValueEnum)]
enum Search {
    /// Linear scan per step.
    Linear,
    /// R*-tree of unvisited points.
    Rtree,
}

/// Tour refinement selection.
#[derive(Clone, Copy, ValueEnum)]
enum Refiner {
    /// 2-opt local search.
    TwoOpt,
    /// Keep the nearest-neighbor tour.
    Disabled,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        cell_size: cli.cell_size,
        build_dim: cli.build_dim,
        bounds: match cli.bounds {
            Bounds::Reject => BoundsPolicy::Reject,
            Bounds::Clamp => BoundsPolicy::Clamp,
        },
        neighbor_search: match cli.search {
            Search::Linear => NeighborSearch::Linear,
            Search::Rtree => NeighborSearch::RTree,
        },
        refiner: match cli.refiner {
            Refiner::TwoOpt => TourRefinerKind::TwoOpt,
            Refiner::Disabled => TourRefinerKind::Disabled,
        },
        improvement_threshold: cli.improvement_threshold,
        max_refine_passes: cli.max_refine_passes,
    })
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            tracing::error!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    match (&cli.from_keys, &cli.csv_path) {
        (Some(path), _) => decode_key_file(&cli, &config, path),
        (None, Some(path)) => convert_drawing(&cli, &config, path),
        // clap requires one of the two.
        (None, None) => ExitCode::FAILURE,
    }
}

/// Convert the drawing at `csv_path`, printing diagnostics per run.
fn convert_drawing(cli: &Cli, config: &PipelineConfig, csv_path: &Path) -> ExitCode {
    let text = match std::fs::read_to_string(csv_path) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Error reading {}: {e}", csv_path.display());
            return ExitCode::FAILURE;
        }
    };

    let segments = match gridpath_export::parse_endpoint_csv(&text) {
        Ok(segments) => segments,
        Err(e) => {
            tracing::error!("Error parsing {}: {e}", csv_path.display());
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        path = %csv_path.display(),
        segments = segments.len(),
        runs = cli.runs,
        "loaded drawing",
    );
    tracing::debug!(?config, "pipeline config");

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            tracing::info!("run {}/{}", run + 1, cli.runs);
        }

        match gridpath_pipeline::process_staged_with_diagnostics(&segments, config, &StdClock) {
            Ok((staged, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            tracing::error!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Write artifacts on the first run only.
                if run == 0 {
                    write_artifacts(cli, config, csv_path, &segments, staged);
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                tracing::error!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Decode every record in the key file at `path` and report its tour.
fn decode_key_file(cli: &Cli, config: &PipelineConfig, path: &Path) -> ExitCode {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Error reading {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let records = match gridpath_export::parse_key_records(&text) {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("Error parsing {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(path = %path.display(), records = records.len(), "loaded key records");
    if cli.tour.is_some() && records.len() != 1 {
        tracing::error!(
            "--tour needs exactly one record, {} holds {}",
            path.display(),
            records.len(),
        );
        return ExitCode::FAILURE;
    }

    let builder = TourBuilder::from_config(config);
    for (i, record) in records.iter().enumerate() {
        let name = record.name.as_deref().unwrap_or("<unnamed>");
        let tour = match record.decode(&builder) {
            Ok(tour) => tour,
            Err(e) => {
                tracing::error!("Error decoding record {} ({name}): {e}", i + 1);
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            let summary = serde_json::json!({
                "name": record.name,
                "keys": record.keys.len(),
                "points": tour.len(),
                "length_mm": tour.length(),
            });
            println!("{summary}");
        } else {
            println!(
                "{name}: {} keys, {} points, {:.3}mm",
                record.keys.len(),
                tour.len(),
                tour.length(),
            );
        }

        if let Some(ref tour_path) = cli.tour {
            write_file(tour_path, "tour CSV", &gridpath_export::to_tour_csv(&tour));
        }
    }

    ExitCode::SUCCESS
}

/// Write whichever of `--keys`, `--tour` and `--endpoints` were requested.
///
/// Write failures are logged and do not abort the run.
fn write_artifacts(
    cli: &Cli,
    config: &PipelineConfig,
    csv_path: &Path,
    segments: &[Segment],
    staged: StagedResult,
) {
    if let Some(ref path) = cli.endpoints {
        write_file(path, "endpoint CSV", &gridpath_export::to_endpoint_csv(segments));
    }

    if let Some(ref path) = cli.tour {
        write_file(path, "tour CSV", &gridpath_export::to_tour_csv(staged.final_tour()));
    }

    if let Some(ref path) = cli.keys {
        let name = csv_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_owned);
        let record = KeyRecord::new(name, &staged.into_conversion(), config);
        match gridpath_export::to_key_record_json(&record) {
            Ok(json) => write_file(path, "key record", &format!("{json}\n")),
            Err(e) => tracing::error!("Error serializing key record: {e}"),
        }
    }
}

fn write_file(path: &Path, what: &str, contents: &str) {
    match std::fs::write(path, contents) {
        Ok(()) => tracing::info!(
            "{what} written to {} ({} bytes)",
            path.display(),
            contents.len(),
        ),
        Err(e) => tracing::error!("Error writing {what} to {}: {e}", path.display()),
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Validate", |d| Some(d.validate.duration)),
        ("Rasterize", |d| Some(d.rasterize.duration)),
        ("Collect Keys", |d| Some(d.collect_keys.duration)),
        ("Construct", |d| Some(d.construct.duration)),
        ("Refine", |d| d.refine.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
