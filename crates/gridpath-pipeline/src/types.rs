//! Shared types for the gridpath rasterization and toolpath pipeline.

use serde::{Deserialize, Serialize};

use crate::grid::Grid;
use crate::tour::{NeighborSearch, RefineStats, TourRefinerKind};

/// A 2D point in physical build-plate coordinates (millimetres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Position along the X axis.
    pub x: f64,
    /// Position along the Y axis.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Returns `true` if both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A 3D point as produced by a drawing parser (millimetres).
///
/// Z is carried through to exports; the pipeline only looks at the XY
/// projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    /// Position along the X axis.
    pub x: f64,
    /// Position along the Y axis.
    pub y: f64,
    /// Position along the Z axis.
    pub z: f64,
}

impl Point3 {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Projection onto the XY plane.
    #[must_use]
    pub const fn xy(self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A straight line segment between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment start.
    pub start: Point3,
    /// Segment end.
    pub end: Point3,
}

impl Segment {
    /// Create a new segment.
    #[must_use]
    pub const fn new(start: Point3, end: Point3) -> Self {
        Self { start, end }
    }

    /// Pair a flat, alternating start/end endpoint sequence into segments.
    ///
    /// Even indices are starts and odd indices are ends. A trailing
    /// unpaired endpoint is dropped.
    #[must_use]
    pub fn pairs_from_endpoints(endpoints: &[Point3]) -> Vec<Self> {
        if endpoints.len() % 2 == 1 {
            tracing::warn!(
                endpoints = endpoints.len(),
                "odd endpoint count, dropping trailing unpaired endpoint",
            );
        }
        endpoints
            .chunks_exact(2)
            .map(|pair| Self::new(pair[0], pair[1]))
            .collect()
    }

    /// Flatten segments back into the alternating start/end sequence.
    #[must_use]
    pub fn flatten(segments: &[Self]) -> Vec<Point3> {
        segments.iter().flat_map(|s| [s.start, s.end]).collect()
    }
}

/// A closed, ordered toolpath over physical points.
///
/// A non-empty tour always ends on its first point. The empty tour is
/// the result of converting a drawing with no occupied cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tour(Vec<Point>);

impl Tour {
    /// Close an open visiting order by repeating its first point at the end.
    ///
    /// A single point becomes `[p, p]`; an empty order stays empty.
    #[must_use]
    pub fn close(mut points: Vec<Point>) -> Self {
        if let Some(&first) = points.first() {
            points.push(first);
        }
        Self(points)
    }

    /// Returns `true` if the tour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of points, including the closing repeat.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// All points, including the closing repeat.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Points in visiting order without the closing repeat.
    #[must_use]
    pub fn open_points(&self) -> &[Point] {
        match self.0.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// Total travel length along the closed loop.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.0.windows(2).map(|w| w[0].distance(w[1])).sum()
    }
}

/// Grid size in cells.
///
/// The build plate is square, so `rows == cols` for every grid produced
/// from a [`PipelineConfig`]; the two fields are kept separate so the
/// row-major arithmetic reads the way it is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDimensions {
    /// Number of rows (Y extent).
    pub rows: usize,
    /// Number of columns (X extent).
    pub cols: usize,
}

impl GridDimensions {
    /// A square grid with `side` rows and columns.
    #[must_use]
    pub const fn square(side: usize) -> Self {
        Self {
            rows: side,
            cols: side,
        }
    }

    /// Total number of cells, `None` on overflow.
    #[must_use]
    pub const fn checked_cell_count(self) -> Option<usize> {
        self.rows.checked_mul(self.cols)
    }

    /// Total number of cells (saturating).
    #[must_use]
    pub const fn cell_count(self) -> usize {
        self.rows.saturating_mul(self.cols)
    }
}

/// What to do with segment endpoints that quantize outside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoundsPolicy {
    /// Fail the whole conversion before any cell is painted.
    #[default]
    Reject,
    /// Clamp each out-of-range endpoint cell to the nearest edge cell.
    Clamp,
}

/// Configuration for a single conversion run.
///
/// All parameters have defaults matching the reference printer: a
/// 1.75 mm deposition bead on a 546.1 mm square build plate.
/// Call [`validate`](Self::validate) (the pipeline does so before
/// allocating the grid) to check invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Side length of one grid cell in millimetres.
    pub cell_size: f64,

    /// Side length of the square build plate in millimetres.
    pub build_dim: f64,

    /// Policy for endpoints outside the grid envelope.
    pub bounds: BoundsPolicy,

    /// Nearest-neighbor search backend used during tour construction.
    pub neighbor_search: NeighborSearch,

    /// Tour refinement strategy applied after construction.
    pub refiner: TourRefinerKind,

    /// 2-opt stops once a full pass shortens the tour by less than
    /// this fraction of its length. `0.0` runs to a local optimum.
    pub improvement_threshold: f64,

    /// Hard upper bound on the number of 2-opt passes.
    pub max_refine_passes: u32,
}

impl PipelineConfig {
    /// Default cell size (mm), the filament bead width.
    pub const DEFAULT_CELL_SIZE: f64 = 1.75;
    /// Default build plate side (mm), 21.5 inches.
    pub const DEFAULT_BUILD_DIM: f64 = 546.1;
    /// Default relative improvement threshold for 2-opt.
    pub const DEFAULT_IMPROVEMENT_THRESHOLD: f64 = 0.01;
    /// Default 2-opt pass bound.
    pub const DEFAULT_MAX_REFINE_PASSES: u32 = 100;

    /// Check the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `cell_size` or
    /// `build_dim` is non-finite or non-positive, if `cell_size`
    /// exceeds `build_dim`, if `improvement_threshold` is outside
    /// `[0, 1)`, or if the grid would have more cells than fit in
    /// memory addressing.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.improvement_threshold.is_finite()
            && (0.0..1.0).contains(&self.improvement_threshold))
        {
            return Err(PipelineError::InvalidConfig(format!(
                "improvement_threshold must be in [0, 1), got {}",
                self.improvement_threshold,
            )));
        }
        crate::grid::dimensions(self.build_dim, self.cell_size).map(|_| ())
    }

    /// Grid dimensions implied by `build_dim` and `cell_size`.
    ///
    /// # Errors
    ///
    /// Same as [`grid::dimensions`](crate::grid::dimensions).
    pub fn grid_dimensions(&self) -> Result<GridDimensions, PipelineError> {
        crate::grid::dimensions(self.build_dim, self.cell_size)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cell_size: Self::DEFAULT_CELL_SIZE,
            build_dim: Self::DEFAULT_BUILD_DIM,
            bounds: BoundsPolicy::default(),
            neighbor_search: NeighborSearch::default(),
            refiner: TourRefinerKind::default(),
            improvement_threshold: Self::DEFAULT_IMPROVEMENT_THRESHOLD,
            max_refine_passes: Self::DEFAULT_MAX_REFINE_PASSES,
        }
    }
}

/// Result of a full conversion.
///
/// Carries the two artifacts downstream collaborators consume: the
/// occupied key sequence and the closed toolpath.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Occupied cell keys in ascending (row-major) order.
    pub keys: Vec<usize>,

    /// The closed toolpath in millimetres.
    pub tour: Tour,

    /// Grid dimensions the keys refer to.
    pub dimensions: GridDimensions,
}

/// Result of running the pipeline with every intermediate preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedResult {
    /// Painted occupancy bitmap.
    pub grid: Grid,
    /// Occupied cell keys in ascending order.
    pub keys: Vec<usize>,
    /// Physical points for `keys`, in the same order.
    pub points: Vec<Point>,
    /// Nearest-neighbor tour before refinement.
    pub constructed: Tour,
    /// Refined tour (`Some` only when a refiner ran).
    pub refined: Option<Tour>,
    /// Refinement statistics (`Some` only when a refiner ran).
    pub refine_stats: Option<RefineStats>,
    /// Grid dimensions.
    pub dimensions: GridDimensions,
}

impl StagedResult {
    /// Returns the final toolpath, refined if refinement ran.
    #[must_use]
    pub fn final_tour(&self) -> &Tour {
        self.refined.as_ref().unwrap_or(&self.constructed)
    }

    /// Drop the intermediates, keeping what [`crate::convert`] returns.
    #[must_use]
    pub fn into_conversion(self) -> ConversionResult {
        let Self {
            keys,
            constructed,
            refined,
            dimensions,
            ..
        } = self;
        ConversionResult {
            keys,
            tour: refined.unwrap_or(constructed),
            dimensions,
        }
    }
}

/// Errors that can occur during conversion.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A key lies outside `[1, max_key]`.
    #[error("key {key} out of range [1, {max_key}]")]
    KeyOutOfRange {
        /// The offending key.
        key: usize,
        /// Largest valid key (`rows * cols`).
        max_key: usize,
    },

    /// A grid coordinate lies outside the grid.
    #[error("cell ({col}, {row}) outside {cols}x{rows} grid")]
    CellOutOfRange {
        /// Column of the offending cell.
        col: usize,
        /// Row of the offending cell.
        row: usize,
        /// Grid column count.
        cols: usize,
        /// Grid row count.
        rows: usize,
    },

    /// A segment endpoint quantizes to a cell outside the grid.
    #[error("segment {segment} endpoint quantizes to cell ({x}, {y}) outside {cols}x{rows} grid")]
    SegmentOutOfBounds {
        /// Index of the segment in the input.
        segment: usize,
        /// Quantized X cell coordinate.
        x: i64,
        /// Quantized Y cell coordinate.
        y: i64,
        /// Grid column count.
        cols: usize,
        /// Grid row count.
        rows: usize,
    },

    /// A key appears more than once in a key sequence being decoded.
    #[error("key {key} appears more than once")]
    DuplicateKey {
        /// The repeated key.
        key: usize,
    },

    /// A segment endpoint has a NaN or infinite coordinate.
    #[error("segment {segment} has a non-finite coordinate")]
    NonFiniteCoordinate {
        /// Index of the segment in the input.
        segment: usize,
    },
}
