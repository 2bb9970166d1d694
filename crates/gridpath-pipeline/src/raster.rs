//! Line rasterization: map continuous segments onto grid cells.
//!
//! Segment endpoints are quantized with `floor(coordinate / cell_size)`
//! and joined with an integer Bresenham line. Painting resolves every
//! endpoint against the grid bounds before the first cell is marked, so
//! a rejected conversion never leaves a partially painted grid behind.

use serde::{Deserialize, Serialize};

use crate::grid::{Grid, GridCoord};
use crate::types::{BoundsPolicy, PipelineError, Point3, Segment};

/// Integer cell position on the rasterization lattice.
///
/// Unlike [`GridCoord`] this may lie outside the grid; bounds are only
/// applied when painting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// X cell index.
    pub x: i32,
    /// Y cell index.
    pub y: i32,
}

impl Cell {
    /// Create a new cell.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Cells on the digital line from `start` to `end`, both inclusive.
///
/// Bresenham's algorithm with the error term kept doubled so all
/// arithmetic stays integral. The result is 8-connected and has exactly
/// `max(|dx|, |dy|) + 1` cells. A degenerate line yields `[start]`.
#[must_use]
pub fn rasterize(start: Cell, end: Cell) -> Vec<Cell> {
    let dx = (i64::from(end.x) - i64::from(start.x)).abs();
    let dy = (i64::from(end.y) - i64::from(start.y)).abs();
    let sx = if start.x > end.x { -1 } else { 1 };
    let sy = if start.y > end.y { -1 } else { 1 };

    let steps = usize::try_from(dx.max(dy)).unwrap_or(0);
    let mut cells = Vec::with_capacity(steps + 1);
    let (mut x, mut y) = (start.x, start.y);

    if dx > dy {
        let mut err = dx;
        while x != end.x {
            cells.push(Cell::new(x, y));
            err -= 2 * dy;
            if err < 0 {
                y += sy;
                err += 2 * dx;
            }
            x += sx;
        }
    } else {
        let mut err = dy;
        while y != end.y {
            cells.push(Cell::new(x, y));
            err -= 2 * dx;
            if err < 0 {
                x += sx;
                err += 2 * dy;
            }
            y += sy;
        }
    }
    cells.push(Cell::new(x, y));
    cells
}

/// Quantize a physical coordinate to a cell index, `floor(value / cell_size)`.
///
/// Saturates at the `i64` range; callers check bounds afterwards.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize(value: f64, cell_size: f64) -> i64 {
    (value / cell_size).floor() as i64
}

/// Counts collected while painting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaintStats {
    /// Segments painted.
    pub segments: usize,
    /// Cells produced by the rasterizer, counting repeats.
    pub cells_visited: usize,
    /// Cells that flipped from unoccupied to occupied.
    pub cells_marked: usize,
    /// Endpoints moved onto the grid edge by [`BoundsPolicy::Clamp`].
    pub clamped_endpoints: usize,
}

/// Rasterize every segment onto `grid`.
///
/// Endpoints outside the grid are handled per `bounds`. With
/// [`BoundsPolicy::Reject`] the first offending endpoint aborts the call
/// and the grid is left untouched.
///
/// # Errors
///
/// Returns [`PipelineError::NonFiniteCoordinate`] if an endpoint has a
/// NaN or infinite X or Y, and [`PipelineError::SegmentOutOfBounds`] if
/// an endpoint quantizes outside the grid under
/// [`BoundsPolicy::Reject`].
pub fn paint_grid(
    grid: &mut Grid,
    segments: &[Segment],
    cell_size: f64,
    bounds: BoundsPolicy,
) -> Result<PaintStats, PipelineError> {
    let mut stats = PaintStats::default();

    let mut resolved = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        let start = resolve_endpoint(grid, index, segment.start, cell_size, bounds, &mut stats)?;
        let end = resolve_endpoint(grid, index, segment.end, cell_size, bounds, &mut stats)?;
        resolved.push((start, end));
    }

    for (start, end) in resolved {
        for cell in rasterize(start, end) {
            stats.cells_visited += 1;
            if grid.mark(to_grid_coord(cell))? {
                stats.cells_marked += 1;
            }
        }
        stats.segments += 1;
    }

    tracing::debug!(
        segments = stats.segments,
        cells_visited = stats.cells_visited,
        cells_marked = stats.cells_marked,
        clamped = stats.clamped_endpoints,
        "painted grid",
    );
    Ok(stats)
}

/// Paint a flat alternating start/end endpoint sequence.
///
/// Even indices are segment starts and odd indices are segment ends.
///
/// # Errors
///
/// Same as [`paint_grid`].
pub fn paint_endpoints(
    grid: &mut Grid,
    endpoints: &[Point3],
    cell_size: f64,
    bounds: BoundsPolicy,
) -> Result<PaintStats, PipelineError> {
    paint_grid(
        grid,
        &Segment::pairs_from_endpoints(endpoints),
        cell_size,
        bounds,
    )
}

/// Quantize one endpoint and bring it inside the grid (or reject it).
fn resolve_endpoint(
    grid: &Grid,
    segment: usize,
    point: Point3,
    cell_size: f64,
    bounds: BoundsPolicy,
    stats: &mut PaintStats,
) -> Result<Cell, PipelineError> {
    let point = point.xy();
    if !point.is_finite() {
        return Err(PipelineError::NonFiniteCoordinate { segment });
    }

    let x = quantize(point.x, cell_size);
    let y = quantize(point.y, cell_size);
    let dims = grid.dimensions();

    if !grid.contains(x, y) {
        // An empty grid has nothing to clamp onto.
        if bounds == BoundsPolicy::Reject || dims.cell_count() == 0 {
            return Err(PipelineError::SegmentOutOfBounds {
                segment,
                x,
                y,
                cols: dims.cols,
                rows: dims.rows,
            });
        }
        tracing::warn!(segment, x, y, "clamping out-of-bounds endpoint onto grid");
        stats.clamped_endpoints += 1;
    }

    Ok(Cell::new(clamp_axis(x, dims.cols), clamp_axis(y, dims.rows)))
}

/// Clamp a cell index into `[0, len)`. `len` is at most `i32::MAX`.
fn clamp_axis(value: i64, len: usize) -> i32 {
    let max = i64::try_from(len).map_or(i64::from(i32::MAX), |l| l - 1);
    i32::try_from(value.clamp(0, max)).unwrap_or(i32::MAX)
}

/// Convert a cell already resolved inside the grid into a grid coordinate.
fn to_grid_coord(cell: Cell) -> GridCoord {
    GridCoord::new(
        usize::try_from(cell.x).unwrap_or(usize::MAX),
        usize::try_from(cell.y).unwrap_or(usize::MAX),
    )
}
