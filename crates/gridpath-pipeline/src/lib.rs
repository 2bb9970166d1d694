//! gridpath-pipeline: Pure line-to-toolpath pipeline (sans-IO).
//!
//! Converts CAD line segments into a closed toolpath over a square
//! build plate through:
//! grid sizing -> Bresenham rasterization -> occupied key enumeration ->
//! nearest-neighbor tour construction -> optional 2-opt refinement.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! segments and returns structured data. Text formats live in
//! `gridpath-export`; the command-line driver lives in `gridpath-bench`.

pub mod diagnostics;
pub mod grid;
pub mod pipeline;
pub mod raster;
pub mod tour;
pub mod types;

pub use diagnostics::{Clock, PipelineDiagnostics, process_staged_with_diagnostics};
pub use grid::{Grid, GridCoord, GridIndex};
pub use pipeline::Pipeline;
pub use raster::{paint_grid, rasterize};
pub use tour::{
    NeighborSearch, TourBuilder, TourRefiner, TourRefinerKind, TwoOpt, build_tour, tour_from_keys,
};
pub use types::{
    BoundsPolicy, ConversionResult, GridDimensions, PipelineConfig, PipelineError, Point, Point3,
    Segment, StagedResult, Tour,
};

/// Run the full conversion.
///
/// Sizes the grid from `config`, paints every segment onto it, collects
/// the occupied keys in ascending order, and orders their physical
/// points into a closed tour.
///
/// # Pipeline steps
///
/// 1. Validate configuration and compute grid dimensions
/// 2. Rasterize segments onto the grid (Bresenham)
/// 3. Enumerate occupied keys and map them to cell origins
/// 4. Nearest-neighbor construction (pluggable search backend)
/// 5. Optional refinement (pluggable strategy)
///
/// An empty segment list yields no keys and an empty tour.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the configuration is
/// invalid, [`PipelineError::NonFiniteCoordinate`] for a NaN or infinite
/// endpoint, and [`PipelineError::SegmentOutOfBounds`] for an endpoint
/// outside the grid under [`BoundsPolicy::Reject`].
pub fn convert(
    segments: &[Segment],
    config: &PipelineConfig,
) -> Result<ConversionResult, PipelineError> {
    process_staged(segments, config).map(StagedResult::into_conversion)
}

/// Run the full conversion, preserving every intermediate.
///
/// # Errors
///
/// Same as [`convert`].
pub fn process_staged(
    segments: &[Segment],
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    Ok(Pipeline::new(segments.to_vec(), config.clone())
        .validate()?
        .rasterize()?
        .collect_keys()
        .construct()
        .refine()
        .into_result())
}
