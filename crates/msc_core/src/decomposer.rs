//! Parallel edge generation for implicit regular grids.
//!
//! A grid is described by its per-axis sample counts and coordinate bounds;
//! vertex `(i0, i1, ..)` has local index `i0 + n0 * (i1 + n1 * (..))`, so
//! axis 0 varies fastest. The decomposer bisects the index range over a pool
//! of visitors, runs every piece on its own scoped thread (the first piece
//! on the calling thread), and enumerates the grid edges of each piece.
//!
//! Every point only emits edges towards its forward neighbors, i.e. offsets
//! whose last non-zero component (the most significant axis) is +1, so the
//! neighbor always has the larger index. Together with the rule that an edge
//! belongs to the piece holding its source point, every undirected edge is
//! produced exactly once across all threads.

use crate::visitor::EdgeVisitor;
use crate::{MscError, Result};
use log::debug;
use msc_common::EdgeTopology;
use msc_common::limits::MAX_GRID_DIMENSION;
use std::panic;
use std::thread;

/// Implicit regular grid and the neighborhood used to connect it.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    /// Number of samples along every axis.
    pub dims: Vec<usize>,

    /// Coordinate range `(low, high)` spanned by every axis.
    pub bounds: Vec<(f64, f64)>,

    /// Maximum number of axes an edge may change at once (1 to 3).
    pub degree: u8,

    pub topology: EdgeTopology,
}

impl GridSpec {
    /// Grid over the unit cube with degree-1 connectivity.
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: dims.to_vec(),
            bounds: vec![(0.0, 1.0); dims.len()],
            degree: 1,
            topology: EdgeTopology::Complete,
        }
    }

    pub fn with_degree(mut self, degree: u8) -> Self {
        self.degree = degree;
        self
    }

    pub fn with_topology(mut self, topology: EdgeTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_bounds(mut self, bounds: &[(f64, f64)]) -> Self {
        self.bounds = bounds.to_vec();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let d = self.dims.len();
        if d == 0 || d > MAX_GRID_DIMENSION {
            return Err(MscError::InvalidInput(format!(
                "grid dimension {d} outside 1..={MAX_GRID_DIMENSION}"
            )));
        }
        if self.dims.contains(&0) {
            return Err(MscError::InvalidInput(format!(
                "grid has an empty axis: {:?}",
                self.dims
            )));
        }
        if self.bounds.len() != d {
            return Err(MscError::InvalidInput(format!(
                "{} coordinate bounds for a {d}-dimensional grid",
                self.bounds.len()
            )));
        }
        if !(1..=3).contains(&self.degree) {
            return Err(MscError::InvalidInput(format!(
                "neighbor degree {} outside 1..=3",
                self.degree
            )));
        }
        let count = self
            .dims
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .filter(|&n| n < msc_common::NONE as usize);
        if count.is_none() {
            return Err(MscError::InvalidInput(format!(
                "grid {:?} holds more vertices than ids can address",
                self.dims
            )));
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dims.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Linear-index step of every axis.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = Vec::with_capacity(self.dims.len());
        let mut stride = 1usize;
        for &n in &self.dims {
            strides.push(stride);
            stride *= n;
        }
        strides
    }

    /// Writes the coordinates of linear index `index` into `out`.
    pub fn coordinates_into(&self, mut index: usize, out: &mut [f64]) {
        for (axis, &n) in self.dims.iter().enumerate() {
            let i = index % n;
            index /= n;
            let (low, high) = self.bounds[axis];
            out[axis] = if n > 1 {
                low + (high - low) * i as f64 / (n - 1) as f64
            } else {
                low
            };
        }
    }
}

/// Half-open hyper-rectangle `[lo, hi)` of grid indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdomain {
    pub lo: Vec<usize>,
    pub hi: Vec<usize>,
}

impl Subdomain {
    pub fn whole(dims: &[usize]) -> Self {
        Self {
            lo: vec![0; dims.len()],
            hi: dims.to_vec(),
        }
    }

    pub fn volume(&self) -> usize {
        self.lo
            .iter()
            .zip(&self.hi)
            .map(|(lo, hi)| hi.saturating_sub(*lo))
            .product()
    }

    pub fn contains(&self, point: &[usize]) -> bool {
        point
            .iter()
            .zip(self.lo.iter().zip(&self.hi))
            .all(|(p, (lo, hi))| lo <= p && p < hi)
    }
}

/// Splits the grid into at most `workers` pieces.
///
/// Bisects along the first axis with at least two samples left, starting
/// from the axis after the previous split, hands `ceil(n / 2)` workers to
/// the lower half and `floor(n / 2)` to the upper half, and stops once a
/// piece has a single worker or a single sample.
pub fn decompose(dims: &[usize], workers: usize) -> Vec<Subdomain> {
    let mut leaves = Vec::with_capacity(workers.max(1));
    bisect(Subdomain::whole(dims), 0, workers.max(1), &mut leaves);
    leaves
}

fn bisect(range: Subdomain, axis: usize, workers: usize, leaves: &mut Vec<Subdomain>) {
    let d = range.lo.len();
    if workers <= 1 || range.volume() <= 1 || d == 0 {
        leaves.push(range);
        return;
    }

    let Some(split_axis) = (0..d)
        .map(|k| (axis + k) % d)
        .find(|&a| range.hi[a] - range.lo[a] >= 2)
    else {
        leaves.push(range);
        return;
    };

    let mid = range.lo[split_axis] + (range.hi[split_axis] - range.lo[split_axis]) / 2;
    let mut lower = range.clone();
    lower.hi[split_axis] = mid;
    let mut upper = range;
    upper.lo[split_axis] = mid;

    let next = (split_axis + 1) % d;
    bisect(lower, next, workers - workers / 2, leaves);
    bisect(upper, next, workers / 2, leaves);
}

/// One forward neighbor: per-axis step and the matching linear-index delta.
#[derive(Debug, Clone)]
struct Offset {
    steps: Vec<i8>,
    delta: isize,
}

/// Forward neighbor offsets of a grid.
///
/// An offset changes between 1 and `degree` axes by one sample each and its
/// step along the most significant changed axis is +1. Disjunct topologies
/// also drop every offset with a negative step, keeping one diagonal per
/// face.
fn forward_offsets(grid: &GridSpec) -> Vec<Offset> {
    let d = grid.dimension();
    let strides = grid.strides();
    let degree = usize::from(grid.degree).min(d);
    let mut offsets = Vec::new();

    let total = 3usize.pow(d as u32);
    for code in 0..total {
        let mut rest = code;
        let steps: Vec<i8> = (0..d)
            .map(|_| {
                let step = (rest % 3) as i8 - 1;
                rest /= 3;
                step
            })
            .collect();

        let changed = steps.iter().filter(|&&s| s != 0).count();
        if changed == 0 || changed > degree {
            continue;
        }
        if steps.iter().rev().find(|&&s| s != 0) != Some(&1) {
            continue;
        }
        if grid.topology == EdgeTopology::Disjunct && steps.iter().any(|&s| s < 0) {
            continue;
        }

        let delta = steps
            .iter()
            .zip(&strides)
            .map(|(&s, &stride)| s as isize * stride as isize)
            .sum();
        offsets.push(Offset { steps, delta });
    }
    offsets
}

/// Emits every edge whose source point lies in `leaf`.
fn walk_leaf<V: EdgeVisitor>(
    grid: &GridSpec,
    leaf: &Subdomain,
    offsets: &[Offset],
    visitor: &V,
) -> Result<usize> {
    if leaf.volume() == 0 {
        return Ok(0);
    }
    let d = grid.dimension();
    let strides = grid.strides();
    let mut point = leaf.lo.clone();
    let mut emitted = 0usize;

    loop {
        let base: usize = point.iter().zip(&strides).map(|(p, s)| p * s).sum();

        for offset in offsets {
            let inside = offset.steps.iter().enumerate().all(|(axis, &step)| {
                let target = point[axis] as isize + step as isize;
                target >= 0 && (target as usize) < grid.dims[axis]
            });
            if inside {
                let neighbor = (base as isize + offset.delta) as u32;
                visitor.add_edge(base as u32, neighbor)?;
                emitted += 1;
            }
        }

        // Odometer increment, axis 0 fastest.
        let mut axis = 0;
        loop {
            if axis == d {
                return Ok(emitted);
            }
            point[axis] += 1;
            if point[axis] < leaf.hi[axis] {
                break;
            }
            point[axis] = leaf.lo[axis];
            axis += 1;
        }
    }
}

/// Drives `visitors` over every edge of `grid` in parallel.
///
/// The grid is decomposed into at most `visitors.len()` pieces and piece `i`
/// is walked with visitor `i`. Piece 0 runs on the calling thread; all other
/// threads are joined before this returns, even when a piece fails.
///
/// # Returns
///
/// The number of edges emitted, or the first error any piece reported.
/// Failure to spawn a worker thread is a [`MscError::Resource`]; a panic in a
/// worker is resumed on the calling thread.
pub fn run<V: EdgeVisitor>(grid: &GridSpec, visitors: &[V]) -> Result<usize> {
    grid.validate()?;
    if visitors.is_empty() {
        return Err(MscError::InvalidInput("no visitors to drive".into()));
    }

    let leaves = decompose(&grid.dims, visitors.len());
    let offsets = forward_offsets(grid);
    debug!(
        "walking {:?} grid at degree {} with {} offsets over {} pieces",
        grid.dims,
        grid.degree,
        offsets.len(),
        leaves.len()
    );

    let offsets = offsets.as_slice();
    thread::scope(|s| {
        let mut handles = Vec::with_capacity(leaves.len().saturating_sub(1));
        for (i, (leaf, visitor)) in leaves.iter().zip(visitors).enumerate().skip(1) {
            let handle = thread::Builder::new()
                .name(format!("msc-grid-{i}"))
                .spawn_scoped(s, move || walk_leaf(grid, leaf, offsets, visitor))
                .map_err(|e| MscError::Resource(format!("spawning grid worker {i}: {e}")))?;
            handles.push(handle);
        }

        let mut result = walk_leaf(grid, &leaves[0], offsets, &visitors[0]);
        for handle in handles {
            match handle.join() {
                Ok(piece) => {
                    result = match (result, piece) {
                        (Ok(a), Ok(b)) => Ok(a + b),
                        (Err(e), _) | (_, Err(e)) => Err(e),
                    };
                }
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collect_edges(grid: &GridSpec, workers: usize) -> Vec<(u32, u32)> {
        let edges = Mutex::new(Vec::new());
        let collector = |u: u32, v: u32| -> Result<()> {
            edges.lock().push((u, v));
            Ok(())
        };
        let visitors = vec![collector; workers];
        let emitted = run(grid, &visitors).expect("grid walk");
        drop(visitors);
        let mut edges = edges.into_inner();
        assert_eq!(emitted, edges.len());
        edges.sort_unstable();
        edges
    }

    #[test]
    fn exhaustive_membership_on_small_cube() {
        let dims = [4, 4, 4];
        let leaves = decompose(&dims, 3);
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves.iter().map(Subdomain::volume).sum::<usize>(), 64);
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    let owners = leaves.iter().filter(|l| l.contains(&[x, y, z])).count();
                    assert_eq!(owners, 1, "point ({x}, {y}, {z})");
                }
            }
        }
    }

    #[test]
    fn pieces_tile_every_grid() {
        for nx in 1..6 {
            for ny in 1..5 {
                for nz in 1..4 {
                    for workers in 1..10 {
                        let dims = [nx, ny, nz];
                        let leaves = decompose(&dims, workers);
                        let volume: usize = leaves.iter().map(Subdomain::volume).sum();
                        assert_eq!(volume, nx * ny * nz, "{dims:?} with {workers} workers");
                        assert!(leaves.len() <= workers);
                        assert!(leaves.iter().all(|l| l.volume() > 0));
                    }
                }
            }
        }
    }

    #[test]
    fn first_split_halves_axis_zero() {
        let leaves = decompose(&[8, 2], 2);
        assert_eq!(
            leaves,
            vec![
                Subdomain { lo: vec![0, 0], hi: vec![4, 2] },
                Subdomain { lo: vec![4, 0], hi: vec![8, 2] },
            ]
        );
    }

    #[test]
    fn axis_aligned_edges_of_unit_cube() {
        let grid = GridSpec::new(&[2, 2, 2]);
        let edges = collect_edges(&grid, 1);
        let expected = vec![
            (0, 1), (0, 2), (0, 4),
            (1, 3), (1, 5),
            (2, 3), (2, 6),
            (3, 7),
            (4, 5), (4, 6),
            (5, 7),
            (6, 7),
        ];
        assert_eq!(edges.len(), 12);
        assert_eq!(edges, expected);
    }

    #[test]
    fn complete_degree_three_connects_every_cube_pair() {
        let grid = GridSpec::new(&[2, 2, 2]).with_degree(3);
        let edges = collect_edges(&grid, 1);
        assert_eq!(edges.len(), 28);
        let disjunct = grid.with_topology(EdgeTopology::Disjunct);
        assert_eq!(collect_edges(&disjunct, 1).len(), 12 + 6 + 1);
    }

    #[test]
    fn square_diagonals_follow_topology() {
        let grid = GridSpec::new(&[2, 2]).with_degree(2);
        let complete = collect_edges(&grid, 1);
        assert!(complete.contains(&(0, 3)));
        assert!(complete.contains(&(1, 2)));
        assert_eq!(complete.len(), 6);

        let disjunct = collect_edges(&grid.with_topology(EdgeTopology::Disjunct), 1);
        assert!(disjunct.contains(&(0, 3)));
        assert!(!disjunct.contains(&(1, 2)));
        assert_eq!(disjunct.len(), 5);
    }

    #[test]
    fn parallel_walk_emits_each_edge_once() {
        let grid = GridSpec::new(&[7, 5, 4]).with_degree(2);
        let sequential = collect_edges(&grid, 1);
        for workers in [2, 3, 8] {
            assert_eq!(collect_edges(&grid, workers), sequential);
        }
        let mut dedup = sequential.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), sequential.len());
    }

    #[test]
    fn rejects_bad_degree_and_empty_pool() {
        let grid = GridSpec::new(&[3, 3]).with_degree(4);
        let noop = |_: u32, _: u32| -> Result<()> { Ok(()) };
        assert!(matches!(run(&grid, &[noop]), Err(MscError::InvalidInput(_))));
        let grid = GridSpec::new(&[3, 3]);
        let empty: [fn(u32, u32) -> Result<()>; 0] = [];
        assert!(matches!(run(&grid, &empty), Err(MscError::InvalidInput(_))));
    }

    #[test]
    fn worker_errors_reach_the_caller() {
        let grid = GridSpec::new(&[6, 6]);
        let failing = |u: u32, _: u32| -> Result<()> {
            if u == 30 {
                Err(MscError::InvalidReference { id: u })
            } else {
                Ok(())
            }
        };
        let result = run(&grid, &[failing; 4]);
        assert!(matches!(result, Err(MscError::InvalidReference { id: 30 })));
    }

    #[test]
    fn coordinates_span_bounds() {
        let grid = GridSpec::new(&[3, 2]).with_bounds(&[(-1.0, 1.0), (10.0, 20.0)]);
        let mut coords = [0.0; 2];
        grid.coordinates_into(5, &mut coords);
        assert_eq!(coords, [1.0, 20.0]);
        grid.coordinates_into(1, &mut coords);
        assert_eq!(coords, [0.0, 10.0]);
    }
}
