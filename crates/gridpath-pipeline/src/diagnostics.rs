//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for tuning
//! cell size and refinement parameters. The pipeline itself has no
//! notion of wall-clock time; callers provide a [`Clock`] so this crate
//! stays free of platform time sources.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;
use crate::tour::{NeighborSearch, RefineStats, TourRefinerKind};
use crate::types::{PipelineConfig, PipelineError, Segment, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Time source used to measure stage durations.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Capture the current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 0: configuration validation and grid sizing.
    pub validate: StageDiagnostics,
    /// Stage 1: segment rasterization.
    pub rasterize: StageDiagnostics,
    /// Stage 2: occupied key enumeration.
    pub collect_keys: StageDiagnostics,
    /// Stage 3: nearest-neighbor construction.
    pub construct: StageDiagnostics,
    /// Stage 4: refinement (only when a refiner is enabled).
    pub refine: Option<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Validation metrics.
    Validate {
        /// Grid rows.
        rows: usize,
        /// Grid columns.
        cols: usize,
        /// Cell size in millimetres.
        cell_size: f64,
    },
    /// Rasterization metrics.
    Rasterize {
        /// Segments painted.
        segment_count: usize,
        /// Cells produced by the rasterizer, counting repeats.
        cells_visited: usize,
        /// Distinct cells marked.
        cells_marked: usize,
        /// Endpoints clamped onto the grid.
        clamped_endpoints: usize,
    },
    /// Key enumeration metrics.
    CollectKeys {
        /// Occupied cells.
        occupied_count: usize,
        /// Total cells in the grid.
        cell_count: usize,
    },
    /// Construction metrics.
    Construct {
        /// Search backend used.
        search: NeighborSearch,
        /// Points toured.
        point_count: usize,
        /// Closed tour length in millimetres.
        tour_length: f64,
    },
    /// Refinement metrics.
    Refine {
        /// Refiner used.
        strategy: TourRefinerKind,
        /// Passes run.
        passes: u32,
        /// Reversals applied.
        swaps: usize,
        /// Length before refinement.
        length_before: f64,
        /// Length after refinement.
        length_after: f64,
    },
}

/// High-level summary for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Grid rows.
    pub rows: usize,
    /// Grid columns.
    pub cols: usize,
    /// Input segments.
    pub segment_count: usize,
    /// Occupied cells.
    pub occupied_count: usize,
    /// Points in the final tour, including the closing repeat.
    pub final_point_count: usize,
    /// Final closed tour length in millimetres.
    pub final_tour_length: f64,
}

/// Run the staged pipeline, timing each stage with `clock`.
///
/// # Errors
///
/// Same as [`crate::process_staged`].
pub fn process_staged_with_diagnostics<C: Clock>(
    segments: &[Segment],
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let run_start = clock.now();

    let t = clock.now();
    let validated = Pipeline::new(segments.to_vec(), config.clone()).validate()?;
    let dims = validated.index().dimensions();
    let validate = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Validate {
            rows: dims.rows,
            cols: dims.cols,
            cell_size: config.cell_size,
        },
    };

    let t = clock.now();
    let rasterized = validated.rasterize()?;
    let paint = rasterized.paint_stats();
    let rasterize = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Rasterize {
            segment_count: paint.segments,
            cells_visited: paint.cells_visited,
            cells_marked: paint.cells_marked,
            clamped_endpoints: paint.clamped_endpoints,
        },
    };

    let t = clock.now();
    let collected = rasterized.collect_keys();
    let collect_keys = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::CollectKeys {
            occupied_count: collected.keys().len(),
            cell_count: dims.cell_count(),
        },
    };

    let t = clock.now();
    let constructed = collected.construct();
    let construct = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Construct {
            search: config.neighbor_search,
            point_count: constructed.tour().open_points().len(),
            tour_length: constructed.tour().length(),
        },
    };

    let t = clock.now();
    let refined = constructed.refine();
    let refine_duration = clock.elapsed(&t);
    let refine = refined.refine_stats().map(|stats| StageDiagnostics {
        duration: refine_duration,
        metrics: StageMetrics::Refine {
            strategy: config.refiner,
            passes: stats.passes,
            swaps: stats.swaps,
            length_before: stats.length_before,
            length_after: stats.length_after,
        },
    });

    let staged = refined.into_result();
    let total_duration = clock.elapsed(&run_start);

    let summary = PipelineSummary {
        rows: dims.rows,
        cols: dims.cols,
        segment_count: segments.len(),
        occupied_count: staged.keys.len(),
        final_point_count: staged.final_tour().len(),
        final_tour_length: staged.final_tour().length(),
    };

    Ok((
        staged,
        PipelineDiagnostics {
            validate,
            rasterize,
            collect_keys,
            construct,
            refine,
            total_duration,
            summary,
        },
    ))
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Grid: {}x{}  |  Segments: {}",
            self.summary.cols, self.summary.rows, self.summary.segment_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        let mut stages: Vec<(&str, &StageDiagnostics)> = vec![
            ("Validate", &self.validate),
            ("Rasterize", &self.rasterize),
            ("Collect Keys", &self.collect_keys),
            ("Construct", &self.construct),
        ];
        if let Some(ref r) = self.refine {
            stages.push(("Refine", r));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Occupied cells: {}  |  Tour points: {}  |  Tour length: {:.3}mm",
            self.summary.occupied_count,
            self.summary.final_point_count,
            self.summary.final_tour_length,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Validate {
            rows,
            cols,
            cell_size,
        } => format!("{cols}x{rows} cells of {cell_size}mm"),
        StageMetrics::Rasterize {
            segment_count,
            cells_visited,
            cells_marked,
            clamped_endpoints,
        } => {
            let mut s = format!(
                "{segment_count} segments, {cells_visited} visited, {cells_marked} marked"
            );
            if *clamped_endpoints > 0 {
                s.push_str(&format!(", {clamped_endpoints} clamped"));
            }
            s
        }
        StageMetrics::CollectKeys {
            occupied_count,
            cell_count,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *cell_count > 0 {
                *occupied_count as f64 / *cell_count as f64 * 100.0
            } else {
                0.0
            };
            format!("{occupied_count} occupied ({density:.2}%)")
        }
        StageMetrics::Construct {
            search,
            point_count,
            tour_length,
        } => format!("{search:?} {point_count} pts, length={tour_length:.3}mm"),
        StageMetrics::Refine {
            strategy,
            passes,
            swaps,
            length_before,
            length_after,
        } => {
            let stats = RefineStats {
                passes: *passes,
                swaps: *swaps,
                length_before: *length_before,
                length_after: *length_after,
            };
            let reduction = stats.improvement_ratio() * 100.0;
            format!(
                "{strategy:?} {passes} passes, {swaps} swaps, \
                 {length_before:.3}->{length_after:.3}mm ({reduction:.1}% shorter)",
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::types::Point3;

    /// Deterministic clock that advances one millisecond per reading.
    struct TickClock {
        ticks: Cell<u64>,
    }

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.ticks.get();
            self.ticks.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn diagonal() -> Vec<Segment> {
        vec![Segment::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(7.0, 7.0, 0.0),
        )]
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            cell_size: 1.0,
            build_dim: 8.0,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        assert!((duration_ms(d) - 1234.0).abs() < 0.01);
    }

    #[test]
    fn diagnostics_capture_every_stage() {
        let clock = TickClock { ticks: Cell::new(0) };
        let (staged, diag) =
            process_staged_with_diagnostics(&diagonal(), &small_config(), &clock).unwrap();

        assert_eq!(staged.keys.len(), 8);
        assert!(diag.refine.is_some());
        assert!(diag.total_duration > Duration::ZERO);
        assert_eq!(diag.summary.occupied_count, 8);
        assert_eq!(diag.summary.final_point_count, 9);
        assert!(matches!(
            diag.rasterize.metrics,
            StageMetrics::Rasterize {
                segment_count: 1,
                cells_marked: 8,
                ..
            }
        ));
    }

    #[test]
    fn disabled_refiner_has_no_refine_stage() {
        let clock = TickClock { ticks: Cell::new(0) };
        let config = PipelineConfig {
            refiner: TourRefinerKind::Disabled,
            ..small_config()
        };
        let (_, diag) = process_staged_with_diagnostics(&diagonal(), &config, &clock).unwrap();
        assert!(diag.refine.is_none());
        assert!(!diag.report().contains("Refine"));
    }

    #[test]
    fn report_lists_stages() {
        let clock = TickClock { ticks: Cell::new(0) };
        let (_, diag) =
            process_staged_with_diagnostics(&diagonal(), &small_config(), &clock).unwrap();
        let report = diag.report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        assert!(report.contains("Rasterize"));
        assert!(report.contains("Refine"));
        assert!(report.contains("8x8"));
    }

    #[test]
    fn refine_details_report_reduction() {
        let metrics = StageMetrics::Refine {
            strategy: TourRefinerKind::TwoOpt,
            passes: 2,
            swaps: 1,
            length_before: 10.0,
            length_after: 8.0,
        };
        assert_eq!(
            format_metrics(&metrics),
            "TwoOpt 2 passes, 1 swaps, 10.000->8.000mm (20.0% shorter)",
        );
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let clock = TickClock { ticks: Cell::new(0) };
        let (_, diag) =
            process_staged_with_diagnostics(&diagonal(), &small_config(), &clock).unwrap();
        let json = serde_json::to_value(&diag).unwrap();
        assert!(json["total_duration"].is_f64());
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, diag.total_duration);
    }

    #[test]
    fn errors_propagate() {
        let clock = TickClock { ticks: Cell::new(0) };
        let segments = vec![Segment::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(100.0, 0.0, 0.0),
        )];
        let result = process_staged_with_diagnostics(&segments, &small_config(), &clock);
        assert!(matches!(
            result,
            Err(PipelineError::SegmentOutOfBounds { .. })
        ));
    }
}
