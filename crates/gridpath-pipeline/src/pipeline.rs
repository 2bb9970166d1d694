//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! ```rust
//! # use gridpath_pipeline::{Pipeline, PipelineConfig, PipelineError, Point3, Segment};
//! # fn run() -> Result<(), PipelineError> {
//! let segments = vec![Segment::new(
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(10.0, 0.0, 0.0),
//! )];
//! let staged = Pipeline::new(segments, PipelineConfig::default())
//!     .validate()?
//!     .rasterize()?
//!     .collect_keys()
//!     .construct()
//!     .refine()
//!     .into_result();
//! assert_eq!(staged.keys.len(), 6);
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state,
//! carrying everything computed so far. Only validation and
//! rasterization can fail; once the grid is painted the remaining
//! stages are infallible.

use crate::grid::{Grid, GridIndex};
use crate::raster::PaintStats;
use crate::tour::{RefineStats, TourBuilder, tour_from_order};
use crate::types::{PipelineConfig, PipelineError, Point, Segment, StagedResult, Tour};

/// Entry point for the staged pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline over `segments`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(segments: Vec<Segment>, config: PipelineConfig) -> Pending {
        Pending { config, segments }
    }
}

// ───────────────────────── Stage 0: Pending ───────────────────────────

/// Pipeline state before the configuration has been checked.
#[must_use = "pipeline stages are consumed by advancing; call .validate() to continue"]
pub struct Pending {
    config: PipelineConfig,
    segments: Vec<Segment>,
}

impl Pending {
    /// The input segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Validate the configuration and derive the grid index.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the configuration
    /// violates an invariant (see [`PipelineConfig::validate`]).
    pub fn validate(self) -> Result<Validated, PipelineError> {
        self.config.validate()?;
        let index = GridIndex::new(self.config.grid_dimensions()?);
        tracing::debug!(
            rows = index.dimensions().rows,
            cols = index.dimensions().cols,
            segments = self.segments.len(),
            "validated configuration",
        );
        Ok(Validated {
            config: self.config,
            segments: self.segments,
            index,
        })
    }
}

// ───────────────────────── Stage 1: Validated ─────────────────────────

/// Pipeline state after validation; the grid is not yet allocated.
#[must_use = "pipeline stages are consumed by advancing; call .rasterize() to continue"]
pub struct Validated {
    config: PipelineConfig,
    segments: Vec<Segment>,
    index: GridIndex,
}

impl Validated {
    /// The key index for this run's grid.
    #[must_use]
    pub const fn index(&self) -> &GridIndex {
        &self.index
    }

    /// Allocate the grid and paint every segment onto it.
    ///
    /// # Errors
    ///
    /// Propagates [`paint_grid`](crate::raster::paint_grid) errors. On
    /// error the painted grid is discarded.
    pub fn rasterize(self) -> Result<Rasterized, PipelineError> {
        let mut grid = Grid::new(self.index.dimensions());
        let paint = crate::raster::paint_grid(
            &mut grid,
            &self.segments,
            self.config.cell_size,
            self.config.bounds,
        )?;
        Ok(Rasterized {
            config: self.config,
            grid,
            paint,
        })
    }
}

// ───────────────────────── Stage 2: Rasterized ────────────────────────

/// Pipeline state after painting the grid.
#[must_use = "pipeline stages are consumed by advancing; call .collect_keys() to continue"]
pub struct Rasterized {
    config: PipelineConfig,
    grid: Grid,
    paint: PaintStats,
}

impl Rasterized {
    /// The painted grid.
    #[must_use]
    pub const fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Painting counters.
    #[must_use]
    pub const fn paint_stats(&self) -> PaintStats {
        self.paint
    }

    /// Enumerate occupied keys and map them to physical points.
    ///
    /// Keys and points come from the same ascending scan of the grid, so
    /// `points[i]` is always the cell origin of `keys[i]`.
    pub fn collect_keys(self) -> KeysCollected {
        let keys = self.grid.occupied_keys();
        let points = self
            .grid
            .occupied_coords()
            .map(|coord| coord.origin(self.config.cell_size))
            .collect::<Vec<Point>>();
        debug_assert_eq!(keys.len(), points.len());
        tracing::debug!(occupied = keys.len(), "collected occupied keys");
        KeysCollected {
            config: self.config,
            grid: self.grid,
            keys,
            points,
        }
    }
}

// ───────────────────────── Stage 3: KeysCollected ─────────────────────

/// Pipeline state after enumerating occupied cells.
#[must_use = "pipeline stages are consumed by advancing; call .construct() to continue"]
pub struct KeysCollected {
    config: PipelineConfig,
    grid: Grid,
    keys: Vec<usize>,
    points: Vec<Point>,
}

impl KeysCollected {
    /// Occupied keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> &[usize] {
        &self.keys
    }

    /// Physical points for [`keys`](Self::keys), in the same order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Build the nearest-neighbor visiting order.
    pub fn construct(self) -> Constructed {
        let builder = TourBuilder::from_config(&self.config);
        let order = builder.construct(&self.points);
        let constructed = tour_from_order(&self.points, &order);
        tracing::debug!(
            points = self.points.len(),
            length = constructed.length(),
            "constructed nearest-neighbor tour",
        );
        Constructed {
            builder,
            grid: self.grid,
            keys: self.keys,
            points: self.points,
            order,
            constructed,
        }
    }
}

// ───────────────────────── Stage 4: Constructed ───────────────────────

/// Pipeline state after nearest-neighbor construction.
#[must_use = "pipeline stages are consumed by advancing; call .refine() to continue"]
pub struct Constructed {
    builder: TourBuilder,
    grid: Grid,
    keys: Vec<usize>,
    points: Vec<Point>,
    order: Vec<usize>,
    constructed: Tour,
}

impl Constructed {
    /// The unrefined closed tour.
    #[must_use]
    pub const fn tour(&self) -> &Tour {
        &self.constructed
    }

    /// Run the configured refiner (a no-op when disabled).
    pub fn refine(mut self) -> Refined {
        let stats = self.builder.refine(&self.points, &mut self.order);
        let refined = stats.map(|s| {
            tracing::debug!(
                passes = s.passes,
                swaps = s.swaps,
                before = s.length_before,
                after = s.length_after,
                "refined tour",
            );
            tour_from_order(&self.points, &self.order)
        });
        Refined {
            grid: self.grid,
            keys: self.keys,
            points: self.points,
            constructed: self.constructed,
            refined,
            stats,
        }
    }
}

// ───────────────────────── Stage 5: Refined ───────────────────────────

/// Final pipeline state.
#[must_use = "call .into_result() to take the staged result"]
pub struct Refined {
    grid: Grid,
    keys: Vec<usize>,
    points: Vec<Point>,
    constructed: Tour,
    refined: Option<Tour>,
    stats: Option<RefineStats>,
}

impl Refined {
    /// The final tour, refined when refinement ran.
    #[must_use]
    pub fn tour(&self) -> &Tour {
        self.refined.as_ref().unwrap_or(&self.constructed)
    }

    /// Refinement statistics, `None` when refinement was disabled.
    #[must_use]
    pub const fn refine_stats(&self) -> Option<RefineStats> {
        self.stats
    }

    /// Consume the pipeline and return every intermediate.
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            dimensions: self.grid.dimensions(),
            grid: self.grid,
            keys: self.keys,
            points: self.points,
            constructed: self.constructed,
            refined: self.refined,
            refine_stats: self.stats,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tour::TourRefinerKind;
    use crate::types::Point3;

    fn unit_config() -> PipelineConfig {
        PipelineConfig {
            cell_size: 1.0,
            build_dim: 10.0,
            ..PipelineConfig::default()
        }
    }

    fn collected_dims() -> crate::types::GridDimensions {
        unit_config().grid_dimensions().unwrap()
    }

    fn square_outline() -> Vec<Segment> {
        let corners = [(1.0, 1.0), (5.0, 1.0), (5.0, 5.0), (1.0, 5.0)];
        (0..4)
            .map(|i| {
                let (x1, y1) = corners[i];
                let (x2, y2) = corners[(i + 1) % 4];
                Segment::new(Point3::new(x1, y1, 0.0), Point3::new(x2, y2, 0.0))
            })
            .collect()
    }

    #[test]
    fn stages_expose_intermediates() {
        let validated = Pipeline::new(square_outline(), unit_config())
            .validate()
            .unwrap();
        assert_eq!(validated.index().max_key(), 100);

        let rasterized = validated.rasterize().unwrap();
        // 4x4 box outline has 16 perimeter cells.
        assert_eq!(rasterized.grid().occupied_count(), 16);
        assert_eq!(rasterized.paint_stats().segments, 4);

        let collected = rasterized.collect_keys();
        assert_eq!(collected.keys().len(), 16);
        assert_eq!(collected.points().len(), 16);
        assert_eq!(collected.keys()[0], 12);
        assert_eq!(collected.points()[0], Point::new(1.0, 1.0));
        let index = GridIndex::new(collected_dims());
        for (&key, &point) in collected.keys().iter().zip(collected.points()) {
            assert_eq!(index.key_to_point(key, 1.0).unwrap(), point);
        }

        let constructed = collected.construct();
        assert_eq!(constructed.tour().len(), 17);

        let refined = constructed.refine();
        assert!(refined.refine_stats().is_some());
        assert!((refined.tour().length() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_config_fails_validation() {
        let config = PipelineConfig {
            cell_size: -1.0,
            ..PipelineConfig::default()
        };
        let result = Pipeline::new(Vec::new(), config).validate();
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn disabled_refiner_yields_no_refined_tour() {
        let config = PipelineConfig {
            refiner: TourRefinerKind::Disabled,
            ..unit_config()
        };
        let staged = Pipeline::new(square_outline(), config)
            .validate()
            .unwrap()
            .rasterize()
            .unwrap()
            .collect_keys()
            .construct()
            .refine()
            .into_result();
        assert!(staged.refined.is_none());
        assert!(staged.refine_stats.is_none());
        assert_eq!(staged.final_tour(), &staged.constructed);
    }
}
