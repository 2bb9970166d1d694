//! Grid index and occupancy bitmap.
//!
//! The build plate is discretized into a square grid of
//! `floor(build_dim / cell_size)` cells per side. Every cell has a dense
//! 1-based key enumerated in row-major order from row 0:
//!
//! ```text
//! key 1 -> (0, 0)   key 2 -> (1, 0)   ...   key cols -> (cols-1, 0)
//! key cols+1 -> (0, 1)   ...
//! ```
//!
//! Both directions are direct arithmetic, so lookups are O(1) and the
//! mapping never depends on which cells are occupied.

use serde::{Deserialize, Serialize};

use crate::types::{GridDimensions, PipelineError, Point};

/// Integer grid coordinate `(col, row)` of an in-bounds cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    /// Column (X cell index).
    pub col: usize,
    /// Row (Y cell index).
    pub row: usize,
}

impl GridCoord {
    /// Create a new grid coordinate.
    #[must_use]
    pub const fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }

    /// Physical position of the cell origin, `(col * cell_size, row * cell_size)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn origin(self, cell_size: f64) -> Point {
        Point::new(self.col as f64 * cell_size, self.row as f64 * cell_size)
    }
}

/// Compute grid dimensions for a square build plate.
///
/// `rows = cols = floor(build_dim / cell_size)`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if either value is
/// non-finite or non-positive, if `cell_size > build_dim`, or if the
/// resulting cell count overflows `usize` or the side exceeds the
/// `i32` range used by the rasterizer.
pub fn dimensions(build_dim: f64, cell_size: f64) -> Result<GridDimensions, PipelineError> {
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "cell_size must be positive and finite, got {cell_size}",
        )));
    }
    if !(build_dim.is_finite() && build_dim > 0.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "build_dim must be positive and finite, got {build_dim}",
        )));
    }
    if cell_size > build_dim {
        return Err(PipelineError::InvalidConfig(format!(
            "cell_size ({cell_size}) exceeds build_dim ({build_dim})",
        )));
    }

    let side = (build_dim / cell_size).floor();
    if side > f64::from(i32::MAX) {
        return Err(PipelineError::InvalidConfig(format!(
            "grid side of {side} cells is too large",
        )));
    }
    // Range checked above; side >= 1 because cell_size <= build_dim.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let side = side as usize;

    let dims = GridDimensions::square(side);
    if dims.checked_cell_count().is_none() {
        return Err(PipelineError::InvalidConfig(format!(
            "{side}x{side} grid overflows the addressable cell count",
        )));
    }
    Ok(dims)
}

/// Bidirectional mapping between grid coordinates and 1-based keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIndex {
    dimensions: GridDimensions,
}

impl GridIndex {
    /// Create an index over a grid of the given dimensions.
    #[must_use]
    pub const fn new(dimensions: GridDimensions) -> Self {
        Self { dimensions }
    }

    /// Create an index for a square build plate.
    ///
    /// # Errors
    ///
    /// Same as [`dimensions`].
    pub fn from_build_volume(build_dim: f64, cell_size: f64) -> Result<Self, PipelineError> {
        dimensions(build_dim, cell_size).map(Self::new)
    }

    /// Grid dimensions this index covers.
    #[must_use]
    pub const fn dimensions(&self) -> GridDimensions {
        self.dimensions
    }

    /// Largest valid key, `rows * cols`.
    #[must_use]
    pub const fn max_key(&self) -> usize {
        self.dimensions.cell_count()
    }

    /// Every valid key in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = usize> + use<> {
        1..=self.max_key()
    }

    /// Map a key to its `(col, row)` coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::KeyOutOfRange`] unless
    /// `1 <= key <= rows * cols`.
    pub const fn key_to_coord(&self, key: usize) -> Result<GridCoord, PipelineError> {
        let max_key = self.max_key();
        if key == 0 || key > max_key {
            return Err(PipelineError::KeyOutOfRange { key, max_key });
        }
        let offset = key - 1;
        Ok(GridCoord::new(
            offset % self.dimensions.cols,
            offset / self.dimensions.cols,
        ))
    }

    /// Map a `(col, row)` coordinate to its key.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CellOutOfRange`] if the coordinate lies
    /// outside the grid.
    pub const fn coord_to_key(&self, coord: GridCoord) -> Result<usize, PipelineError> {
        let GridDimensions { rows, cols } = self.dimensions;
        if coord.col >= cols || coord.row >= rows {
            return Err(PipelineError::CellOutOfRange {
                col: coord.col,
                row: coord.row,
                cols,
                rows,
            });
        }
        Ok(coord.row * cols + coord.col + 1)
    }

    /// Map a key to the physical position of its cell origin,
    /// `(col * cell_size, row * cell_size)`.
    ///
    /// # Errors
    ///
    /// Same as [`key_to_coord`](Self::key_to_coord).
    pub fn key_to_point(&self, key: usize, cell_size: f64) -> Result<Point, PipelineError> {
        self.key_to_coord(key).map(|coord| coord.origin(cell_size))
    }
}

/// Fixed-size occupancy bitmap stored row-major.
///
/// Cells start unoccupied and can only be marked, never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grid {
    dimensions: GridDimensions,
    cells: Vec<bool>,
}

impl Grid {
    /// Allocate an empty grid.
    #[must_use]
    pub fn new(dimensions: GridDimensions) -> Self {
        Self {
            dimensions,
            cells: vec![false; dimensions.cell_count()],
        }
    }

    /// Grid dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> GridDimensions {
        self.dimensions
    }

    /// Whether `(x, y)` lies inside the grid.
    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        usize::try_from(x).is_ok_and(|x| x < self.dimensions.cols)
            && usize::try_from(y).is_ok_and(|y| y < self.dimensions.rows)
    }

    const fn flat_index(&self, coord: GridCoord) -> Option<usize> {
        if coord.col < self.dimensions.cols && coord.row < self.dimensions.rows {
            Some(coord.row * self.dimensions.cols + coord.col)
        } else {
            None
        }
    }

    /// Whether a cell is occupied. Out-of-bounds cells are unoccupied.
    #[must_use]
    pub fn is_occupied(&self, coord: GridCoord) -> bool {
        self.flat_index(coord).is_some_and(|i| self.cells[i])
    }

    /// Mark a cell occupied.
    ///
    /// Returns `true` if the cell was previously unoccupied. Marking an
    /// occupied cell again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CellOutOfRange`] if the coordinate lies
    /// outside the grid.
    pub fn mark(&mut self, coord: GridCoord) -> Result<bool, PipelineError> {
        let Some(i) = self.flat_index(coord) else {
            return Err(PipelineError::CellOutOfRange {
                col: coord.col,
                row: coord.row,
                cols: self.dimensions.cols,
                rows: self.dimensions.rows,
            });
        };
        let newly = !self.cells[i];
        self.cells[i] = true;
        Ok(newly)
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Keys of all occupied cells in ascending order.
    ///
    /// The flat row-major index of a cell is exactly its key minus one.
    #[must_use]
    pub fn occupied_keys(&self) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, &occupied)| occupied.then_some(i + 1))
            .collect()
    }

    /// Coordinates of all occupied cells in ascending key order.
    pub fn occupied_coords(&self) -> impl Iterator<Item = GridCoord> + '_ {
        let cols = self.dimensions.cols;
        self.cells
            .iter()
            .enumerate()
            .filter(|&(_, &occupied)| occupied)
            .map(move |(i, _)| GridCoord::new(i % cols, i / cols))
    }
}

/// Serde proxy for [`Grid`] so deserialization can check that the cell
/// vector matches the dimensions.
#[derive(Deserialize)]
struct GridProxy {
    dimensions: GridDimensions,
    cells: Vec<bool>,
}

impl<'de> Deserialize<'de> for Grid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = GridProxy::deserialize(deserializer)?;
        if proxy.dimensions.checked_cell_count() != Some(proxy.cells.len()) {
            return Err(serde::de::Error::custom(format!(
                "grid has {} cells, expected {}x{}",
                proxy.cells.len(),
                proxy.dimensions.cols,
                proxy.dimensions.rows,
            )));
        }
        Ok(Self {
            dimensions: proxy.dimensions,
            cells: proxy.cells,
        })
    }
}
