//! Tour construction: order occupied cells into a closed toolpath.
//!
//! Construction is a greedy nearest-neighbor walk from the first point,
//! breaking distance ties toward the lowest input index so the result
//! is fully deterministic. The walk can optionally be refined with 2-opt
//! local search, which reverses sub-paths whenever doing so strictly
//! shortens the closed loop.
//!
//! Orders are expressed as indices into the input point slice. The
//! first entry is always `0`; refinement never moves the start point.

use std::collections::HashSet;

use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::grid::GridIndex;
use crate::types::{PipelineConfig, PipelineError, Point, Tour};

/// Relative slack when collecting R-tree candidates that tie with the
/// nearest hit, so ties are re-ranked with [`Point::distance_squared`].
const TIE_TOLERANCE: f64 = 1e-9;

/// Selects the nearest-neighbor search backend.
///
/// Both backends produce identical orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NeighborSearch {
    /// Scan every unvisited point at each step. O(n^2) overall.
    #[default]
    Linear,

    /// Query an R\*-tree of unvisited points, removing each point once
    /// visited. Much faster for large occupied-cell counts.
    RTree,
}

/// Selects which refinement runs after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TourRefinerKind {
    /// Keep the nearest-neighbor tour as is.
    Disabled,

    /// 2-opt local search bounded by an improvement threshold and a
    /// pass limit.
    #[default]
    TwoOpt,
}

/// Statistics reported by a refiner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefineStats {
    /// Full passes over all edge pairs.
    pub passes: u32,
    /// Reversals applied.
    pub swaps: usize,
    /// Closed-loop length before refinement.
    pub length_before: f64,
    /// Closed-loop length after refinement.
    pub length_after: f64,
}

impl RefineStats {
    /// Fraction of the starting length removed, `1 - after / before`.
    #[must_use]
    pub fn improvement_ratio(&self) -> f64 {
        if self.length_before > 0.0 {
            1.0 - self.length_after / self.length_before
        } else {
            0.0
        }
    }
}

/// Trait for tour refinement strategies.
///
/// Input: the point set and an open visiting order starting at index 0.
/// The refiner permutes `order` in place and must never lengthen the
/// closed loop or move `order[0]`.
pub trait TourRefiner {
    /// Improve `order` in place.
    fn refine(&self, points: &[Point], order: &mut [usize]) -> RefineStats;
}

/// 2-opt local search.
///
/// Each pass scans every pair of non-adjacent edges `(a, b)` and
/// `(c, d)` and reverses `b..=c` when `|ac| + |bd| < |ab| + |cd|`.
/// Passes stop when one finds no improving move, when a pass shortens
/// the loop by less than `improvement_threshold` of its length, or
/// after `max_passes`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoOpt {
    /// Minimum relative improvement per pass to keep going.
    pub improvement_threshold: f64,
    /// Hard bound on passes.
    pub max_passes: u32,
}

impl Default for TwoOpt {
    fn default() -> Self {
        Self {
            improvement_threshold: PipelineConfig::DEFAULT_IMPROVEMENT_THRESHOLD,
            max_passes: PipelineConfig::DEFAULT_MAX_REFINE_PASSES,
        }
    }
}

impl TourRefiner for TwoOpt {
    fn refine(&self, points: &[Point], order: &mut [usize]) -> RefineStats {
        let n = order.len();
        let length_before = closed_length(points, order);
        let mut stats = RefineStats {
            passes: 0,
            swaps: 0,
            length_before,
            length_after: length_before,
        };

        // A cycle needs at least four vertices to have two non-adjacent edges.
        if n < 4 {
            return stats;
        }

        let mut current = length_before;
        while stats.passes < self.max_passes {
            stats.passes += 1;
            let pass_start = current;
            let mut improved = false;

            for i in 0..n - 2 {
                for j in i + 2..n {
                    // Edges (0, 1) and (n-1, 0) share the start vertex.
                    if i == 0 && j == n - 1 {
                        continue;
                    }
                    let a = points[order[i]];
                    let b = points[order[i + 1]];
                    let c = points[order[j]];
                    let d = points[order[(j + 1) % n]];

                    let removed = a.distance(b) + c.distance(d);
                    let added = a.distance(c) + b.distance(d);
                    if added < removed {
                        order[i + 1..=j].reverse();
                        stats.swaps += 1;
                        improved = true;
                    }
                }
            }

            current = closed_length(points, order);
            tracing::trace!(pass = stats.passes, length = current, "2-opt pass");

            if !improved {
                break;
            }
            let improvement = if pass_start > 0.0 {
                1.0 - current / pass_start
            } else {
                0.0
            };
            if improvement < self.improvement_threshold {
                break;
            }
        }

        stats.length_after = current;
        stats
    }
}

/// Length of the closed loop visiting `points` in `order`.
#[must_use]
pub fn closed_length(points: &[Point], order: &[usize]) -> f64 {
    let n = order.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| points[order[i]].distance(points[order[(i + 1) % n]]))
        .sum()
}

/// Greedy nearest-neighbor visiting order starting at `points[0]`.
///
/// Ties go to the lowest index. Returns an empty order for empty input.
#[must_use]
pub fn nearest_neighbor_order(points: &[Point], search: NeighborSearch) -> Vec<usize> {
    match search {
        NeighborSearch::Linear => nearest_neighbor_linear(points),
        NeighborSearch::RTree => nearest_neighbor_rtree(points),
    }
}

fn nearest_neighbor_linear(points: &[Point]) -> Vec<usize> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }

    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    visited[0] = true;
    order.push(0);
    let mut current = points[0];

    for _ in 1..n {
        let mut best: Option<usize> = None;
        let mut best_dist = f64::INFINITY;

        for (j, &candidate) in points.iter().enumerate() {
            if visited[j] {
                continue;
            }
            let dist = current.distance_squared(candidate);
            // Strict comparison keeps the lowest index on ties; the
            // `is_none` arm guarantees progress on NaN distances.
            if best.is_none() || dist < best_dist {
                best_dist = dist;
                best = Some(j);
            }
        }

        let Some(next) = best else {
            break;
        };
        visited[next] = true;
        order.push(next);
        current = points[next];
    }

    order
}

/// A point position tagged with its index in the input slice.
type IndexedPoint = GeomWithData<[f64; 2], usize>;

fn nearest_neighbor_rtree(points: &[Point]) -> Vec<usize> {
    let Some(&start) = points.first() else {
        return Vec::new();
    };

    let entries: Vec<IndexedPoint> = points
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, p)| GeomWithData::new([p.x, p.y], i))
        .collect();
    let mut tree = RTree::bulk_load(entries);

    let mut order = Vec::with_capacity(points.len());
    order.push(0);
    let mut current = start;

    while tree.size() > 0 {
        let mut best: Option<(f64, usize)> = None;
        let mut cutoff: Option<f64> = None;

        for (entry, d2) in tree.nearest_neighbor_iter_with_distance_2(&[current.x, current.y]) {
            let bound = *cutoff.get_or_insert(d2 * (1.0 + TIE_TOLERANCE));
            if d2 > bound {
                break;
            }
            let exact = current.distance_squared(points[entry.data]);
            let better = best.is_none_or(|(best_exact, best_idx)| {
                exact < best_exact
                    || (exact.total_cmp(&best_exact).is_eq() && entry.data < best_idx)
            });
            if better {
                best = Some((exact, entry.data));
            }
        }

        let Some((_, next)) = best else {
            break;
        };
        let p = points[next];
        if tree.remove(&GeomWithData::new([p.x, p.y], next)).is_none() {
            break;
        }
        order.push(next);
        current = p;
    }

    order
}

/// Builds closed tours from point sets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TourBuilder {
    /// Nearest-neighbor search backend.
    pub search: NeighborSearch,
    /// Refinement strategy.
    pub refiner: TourRefinerKind,
    /// 2-opt parameters, used when `refiner` is [`TourRefinerKind::TwoOpt`].
    pub two_opt: TwoOpt,
}

impl Default for TourBuilder {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl TourBuilder {
    /// Take the tour settings from a pipeline configuration.
    #[must_use]
    pub const fn from_config(config: &PipelineConfig) -> Self {
        Self {
            search: config.neighbor_search,
            refiner: config.refiner,
            two_opt: TwoOpt {
                improvement_threshold: config.improvement_threshold,
                max_passes: config.max_refine_passes,
            },
        }
    }

    /// Nearest-neighbor visiting order.
    #[must_use]
    pub fn construct(&self, points: &[Point]) -> Vec<usize> {
        nearest_neighbor_order(points, self.search)
    }

    /// Apply the configured refiner to `order`.
    ///
    /// Returns `None` when refinement is disabled.
    pub fn refine(&self, points: &[Point], order: &mut [usize]) -> Option<RefineStats> {
        match self.refiner {
            TourRefinerKind::Disabled => None,
            TourRefinerKind::TwoOpt => Some(self.two_opt.refine(points, order)),
        }
    }

    /// Construct, refine, and close a tour over `points`.
    #[must_use]
    pub fn build(&self, points: &[Point]) -> Tour {
        let mut order = self.construct(points);
        self.refine(points, &mut order);
        tour_from_order(points, &order)
    }
}

/// Build a closed tour over `points` with the default settings
/// (linear nearest neighbor followed by 2-opt).
#[must_use]
pub fn build_tour(points: &[Point]) -> Tour {
    TourBuilder::default().build(points)
}

/// Build a closed tour over an externally supplied key sequence.
///
/// Each key is decoded through `index` to its cell origin and the tour
/// is built with `builder`, starting at the first key. Keys need not be
/// sorted; a sequence in ascending order reproduces the tour
/// [`crate::convert`] builds for the same occupied cells.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `cell_size` is not
/// positive and finite, [`PipelineError::KeyOutOfRange`] for a key
/// outside `[1, max_key]`, and [`PipelineError::DuplicateKey`] for a key
/// that appears twice.
pub fn tour_from_keys(
    keys: &[usize],
    index: &GridIndex,
    cell_size: f64,
    builder: &TourBuilder,
) -> Result<Tour, PipelineError> {
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "cell_size must be positive and finite, got {cell_size}",
        )));
    }

    let mut seen = HashSet::with_capacity(keys.len());
    let points = keys
        .iter()
        .map(|&key| {
            let point = index.key_to_point(key, cell_size)?;
            if !seen.insert(key) {
                return Err(PipelineError::DuplicateKey { key });
            }
            Ok(point)
        })
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(keys = keys.len(), "decoded key sequence");
    Ok(builder.build(&points))
}

/// Materialize an index order as a closed [`Tour`].
#[must_use]
pub fn tour_from_order(points: &[Point], order: &[usize]) -> Tour {
    Tour::close(order.iter().map(|&i| points[i]).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::types::GridDimensions;

    fn pts(coords: &[(f64, f64)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    fn sorted_bits(points: &[Point]) -> Vec<(u64, u64)> {
        let mut bits: Vec<(u64, u64)> = points
            .iter()
            .map(|p| (p.x.to_bits(), p.y.to_bits()))
            .collect();
        bits.sort_unstable();
        bits
    }

    #[test]
    fn default_refiner_is_two_opt() {
        assert_eq!(TourRefinerKind::default(), TourRefinerKind::TwoOpt);
        assert_eq!(NeighborSearch::default(), NeighborSearch::Linear);
    }

    #[test]
    fn empty_input_builds_empty_tour() {
        assert!(build_tour(&[]).is_empty());
    }

    #[test]
    fn single_point_tour_repeats_point() {
        let tour = build_tour(&pts(&[(2.0, 3.0)]));
        assert_eq!(tour.points(), pts(&[(2.0, 3.0), (2.0, 3.0)]).as_slice());
    }

    #[test]
    fn nearest_neighbor_visits_closest_first() {
        let points = pts(&[(0.0, 0.0), (10.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        let order = nearest_neighbor_order(&points, NeighborSearch::Linear);
        assert_eq!(order, vec![0, 2, 3, 1]);
    }

    #[test]
    fn nearest_neighbor_ties_go_to_lowest_index() {
        // (1,0) and (-1,0) are equidistant from the start.
        let points = pts(&[(0.0, 0.0), (1.0, 0.0), (-1.0, 0.0), (0.0, 1.0)]);
        let order = nearest_neighbor_order(&points, NeighborSearch::Linear);
        assert_eq!(order[1], 1);

        let points = pts(&[(0.0, 0.0), (-1.0, 0.0), (1.0, 0.0)]);
        let order = nearest_neighbor_order(&points, NeighborSearch::Linear);
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn rtree_matches_linear_on_ties() {
        let points = pts(&[
            (5.0, 5.0),
            (6.0, 5.0),
            (4.0, 5.0),
            (5.0, 6.0),
            (5.0, 4.0),
            (6.0, 6.0),
            (4.0, 4.0),
        ]);
        assert_eq!(
            nearest_neighbor_order(&points, NeighborSearch::RTree),
            nearest_neighbor_order(&points, NeighborSearch::Linear),
        );
    }

    #[test]
    fn straight_line_tour_is_already_optimal() {
        let points = pts(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        let builder = TourBuilder::default();
        let mut order = builder.construct(&points);
        assert!((closed_length(&points, &order) - 6.0).abs() < 1e-12);

        let stats = builder.refine(&points, &mut order).unwrap();
        assert_eq!(stats.swaps, 0);
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!((stats.length_after - 6.0).abs() < 1e-12);
    }

    #[test]
    fn two_opt_removes_crossing() {
        // Visiting order 0 -> 1 -> 2 -> 3 crosses itself on a unit square.
        let points = pts(&[(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)]);
        let mut order = vec![0, 1, 2, 3];
        let before = closed_length(&points, &order);
        let stats = TwoOpt::default().refine(&points, &mut order);

        assert!(stats.swaps >= 1);
        assert_eq!(order[0], 0);
        assert!((stats.length_after - 4.0).abs() < 1e-12);
        assert!(stats.length_after < before);
        assert!(stats.improvement_ratio() > 0.0);
    }

    #[test]
    fn two_opt_respects_pass_limit() {
        let points = pts(&[(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)]);
        let mut order = vec![0, 1, 2, 3];
        let stats = TwoOpt {
            improvement_threshold: 0.0,
            max_passes: 0,
        }
        .refine(&points, &mut order);
        assert_eq!(stats.passes, 0);
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn two_opt_small_inputs_untouched() {
        for n in 0..4 {
            let points: Vec<Point> = (0..n).map(|i| Point::new(f64::from(i), 0.0)).collect();
            let mut order: Vec<usize> = (0..points.len()).collect();
            let stats = TwoOpt::default().refine(&points, &mut order);
            assert_eq!(stats.passes, 0);
            assert_eq!(order, (0..points.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn disabled_refiner_returns_none() {
        let builder = TourBuilder {
            refiner: TourRefinerKind::Disabled,
            ..TourBuilder::default()
        };
        let points = pts(&[(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)]);
        let mut order = vec![0, 1, 2, 3];
        assert!(builder.refine(&points, &mut order).is_none());
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn disconnected_islands_are_toured() {
        let points = pts(&[
            (0.0, 0.0),
            (100.0, 100.0),
            (1.0, 0.0),
            (101.0, 100.0),
            (2.0, 0.0),
        ]);
        let tour = build_tour(&points);
        assert_eq!(tour.len(), 6);
        assert_eq!(tour.first(), tour.last());
        assert_eq!(sorted_bits(tour.open_points()), sorted_bits(&points));
    }

    #[test]
    fn keys_decode_to_cell_origins() {
        let index = GridIndex::new(GridDimensions::square(4));
        let builder = TourBuilder {
            refiner: TourRefinerKind::Disabled,
            ..TourBuilder::default()
        };
        // Key 6 -> (1, 1), key 1 -> (0, 0), key 3 -> (2, 0).
        let tour = tour_from_keys(&[6, 1, 3], &index, 2.0, &builder).unwrap();
        assert_eq!(
            tour.points(),
            pts(&[(2.0, 2.0), (0.0, 0.0), (4.0, 0.0), (2.0, 2.0)]).as_slice(),
        );
    }

    #[test]
    fn out_of_range_key_rejected() {
        let index = GridIndex::new(GridDimensions::square(4));
        for key in [0, 17] {
            let err = tour_from_keys(&[1, key], &index, 1.0, &TourBuilder::default());
            assert_eq!(err, Err(PipelineError::KeyOutOfRange { key, max_key: 16 }));
        }
    }

    #[test]
    fn repeated_key_rejected() {
        let index = GridIndex::new(GridDimensions::square(4));
        let err = tour_from_keys(&[2, 5, 2], &index, 1.0, &TourBuilder::default());
        assert_eq!(err, Err(PipelineError::DuplicateKey { key: 2 }));
    }

    #[test]
    fn no_keys_decode_to_empty_tour() {
        let index = GridIndex::new(GridDimensions::square(4));
        let tour = tour_from_keys(&[], &index, 1.0, &TourBuilder::default()).unwrap();
        assert!(tour.is_empty());
    }

    #[test]
    fn bad_cell_size_rejected() {
        let index = GridIndex::new(GridDimensions::square(4));
        let err = tour_from_keys(&[1], &index, 0.0, &TourBuilder::default());
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    fn arb_points() -> impl Strategy<Value = Vec<Point>> {
        prop::collection::vec((0u8..30, 0u8..30), 0..40).prop_map(|cells| {
            let mut seen = std::collections::HashSet::new();
            cells
                .into_iter()
                .filter(|c| seen.insert(*c))
                .map(|(x, y)| Point::new(f64::from(x) * 1.75, f64::from(y) * 1.75))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn tour_is_closed_permutation(points in arb_points()) {
            let tour = build_tour(&points);
            if points.is_empty() {
                prop_assert!(tour.is_empty());
            } else {
                prop_assert_eq!(tour.len(), points.len() + 1);
                prop_assert_eq!(tour.first(), tour.last());
                prop_assert_eq!(tour.first(), points.first());
                prop_assert_eq!(sorted_bits(tour.open_points()), sorted_bits(&points));
            }
        }

        #[test]
        fn two_opt_never_lengthens(points in arb_points()) {
            let mut order = nearest_neighbor_order(&points, NeighborSearch::Linear);
            let before = closed_length(&points, &order);
            let stats = TwoOpt { improvement_threshold: 0.0, max_passes: 50 }
                .refine(&points, &mut order);
            prop_assert!(stats.length_after <= before + 1e-9);
            prop_assert!((stats.length_before - before).abs() < 1e-9);
            if !order.is_empty() {
                prop_assert_eq!(order[0], 0);
            }
        }

        #[test]
        fn rtree_and_linear_agree(points in arb_points()) {
            prop_assert_eq!(
                nearest_neighbor_order(&points, NeighborSearch::RTree),
                nearest_neighbor_order(&points, NeighborSearch::Linear),
            );
        }
    }
}
