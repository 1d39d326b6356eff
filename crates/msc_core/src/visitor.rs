//! Per-edge callbacks for the two streaming passes.
//!
//! Pass 1 feeds every edge to a [`GradientVisitor`], which keeps the steepest
//! strictly-higher neighbor of every vertex. Pass 2 feeds the same edges to a
//! [`SaddleVisitor`], which keeps, for every pair of touching basins, the
//! point where they first meet. Both reductions keep "the better of two
//! candidates" with a total tie-break, so the result does not depend on the
//! order in which edges arrive or on how they are split across threads.

use crate::vertex_store::VertexStore;
use crate::{MscError, Result};
use msc_common::{Direction, NONE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Callback invoked once per discovered edge, possibly from many threads.
///
/// Edge endpoints are local vertex indices of the [`VertexStore`] the
/// visitor works on.
pub trait EdgeVisitor: Sync {
    fn add_edge(&self, u: u32, v: u32) -> Result<()>;
}

impl<F> EdgeVisitor for F
where
    F: Fn(u32, u32) -> Result<()> + Sync,
{
    fn add_edge(&self, u: u32, v: u32) -> Result<()> {
        self(u, v)
    }
}

/// Pass 1: records the steepest strictly-higher neighbor of each vertex.
#[derive(Clone, Copy)]
pub struct GradientVisitor<'a> {
    store: &'a VertexStore,
    direction: Direction,
}

impl<'a> GradientVisitor<'a> {
    pub fn new(store: &'a VertexStore, direction: Direction) -> Self {
        Self { store, direction }
    }

    /// Whether `(slope, candidate)` beats the stored `(current_slope,
    /// current)`. Equal slopes fall back to the total order so that the
    /// reduction stays commutative.
    #[inline]
    fn better(&self, slope: f64, candidate: u32, current_slope: f64, current: u32) -> bool {
        if current == NONE || slope > current_slope {
            return true;
        }
        slope == current_slope
            && candidate != current
            && self.store.higher(self.direction, candidate, current)
    }

    /// Offers `candidate` as the steepest neighbor of `owner`.
    ///
    /// Double-checked: the stored slope is read without the lock and only a
    /// candidate that could win takes the element lock, re-reads, and
    /// writes. Slopes only ever grow, so a candidate rejected by the
    /// unlocked read would also be rejected under the lock.
    ///
    /// # Returns
    ///
    /// True if the candidate was stored.
    pub fn offer(&self, owner: u32, candidate: u32, slope: f64) -> Result<bool> {
        let info = self.store.gradient(owner, self.direction)?;
        if slope < info.slope() {
            return Ok(false);
        }

        let _guard = self.store.lock_guard(owner);
        if self.better(slope, candidate, info.slope(), info.steepest()) {
            info.store_steepest(candidate, slope);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl EdgeVisitor for GradientVisitor<'_> {
    fn add_edge(&self, u: u32, v: u32) -> Result<()> {
        self.store.record(u)?;
        self.store.record(v)?;
        if u == v {
            return Ok(());
        }

        let (low, high) = if self.store.higher(self.direction, v, u) {
            (u, v)
        } else {
            (v, u)
        };

        let mut distance = self.store.distance(low, high);
        if distance == 0.0 || !distance.is_finite() {
            distance = 1.0;
        }
        let rise = (self.store.value(high) - self.store.value(low)) * self.direction.sign() as f64;
        let mut slope = rise / distance;
        if slope.is_nan() {
            slope = 0.0;
        }

        self.offer(low, high, slope)?;
        Ok(())
    }
}

/// Canonical pair of basin roots, smaller local index first.
pub type BasinPair = (u32, u32);

/// Best saddle candidate found so far for one basin pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaddleEntry {
    /// The lower endpoint of the winning edge.
    pub saddle: u32,

    /// Endpoints of the winning edge, ordered like the basin pair: the first
    /// drains to the first basin, the second to the second.
    pub incident: (u32, u32),
}

impl SaddleEntry {
    /// Endpoint of the winning edge that is not the saddle.
    #[inline]
    pub fn partner(&self) -> u32 {
        if self.incident.0 == self.saddle {
            self.incident.1
        } else {
            self.incident.0
        }
    }
}

/// Basin pair to saddle reduction shared by all pass-2 workers.
///
/// One map-wide lock guards the table, which keeps the reduction correct
/// when the decomposer drives several saddle visitors at once.
#[derive(Default)]
pub struct SaddleMap {
    entries: Mutex<HashMap<BasinPair, SaddleEntry>>,
}

impl SaddleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn get(&self, pair: BasinPair) -> Option<SaddleEntry> {
        self.entries.lock().get(&pair).copied()
    }

    /// Inserts the candidate for `pair`, or replaces the stored one if the
    /// candidate is higher in the order of `direction`.
    ///
    /// The same saddle reached over several edges keeps the edge whose other
    /// endpoint is highest, so the incident pair is deterministic as well.
    fn offer(&self, store: &VertexStore, direction: Direction, pair: BasinPair, candidate: SaddleEntry) {
        let mut entries = self.entries.lock();
        match entries.entry(pair) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                let wins = if candidate.saddle == current.saddle {
                    let (new_partner, old_partner) = (candidate.partner(), current.partner());
                    new_partner != old_partner && store.higher(direction, new_partner, old_partner)
                } else {
                    store.higher(direction, candidate.saddle, current.saddle)
                };
                if wins {
                    *current = candidate;
                }
            }
        }
    }

    /// Drains the map into a list sorted by basin pair.
    pub fn into_entries(self) -> Vec<(BasinPair, SaddleEntry)> {
        let mut entries: Vec<_> = self.entries.into_inner().into_iter().collect();
        entries.sort_unstable_by_key(|(pair, _)| *pair);
        entries
    }
}

/// Pass 2: reduces edges that cross basin boundaries into saddles.
#[derive(Clone, Copy)]
pub struct SaddleVisitor<'a> {
    store: &'a VertexStore,
    direction: Direction,
    map: &'a SaddleMap,
}

impl<'a> SaddleVisitor<'a> {
    pub fn new(store: &'a VertexStore, direction: Direction, map: &'a SaddleMap) -> Self {
        Self {
            store,
            direction,
            map,
        }
    }

    fn basin_of(&self, local: u32) -> Result<u32> {
        let basin = self.store.gradient(local, self.direction)?.basin();
        if basin == NONE {
            return Err(MscError::InvariantViolated(format!(
                "vertex {} has no {} basin during saddle detection",
                self.store.global_id(local),
                self.direction.label()
            )));
        }
        Ok(basin)
    }
}

impl EdgeVisitor for SaddleVisitor<'_> {
    fn add_edge(&self, u: u32, v: u32) -> Result<()> {
        let basin_u = self.basin_of(u)?;
        let basin_v = self.basin_of(v)?;
        if basin_u == basin_v {
            return Ok(());
        }

        // The crossing height of an edge is its lower endpoint.
        let saddle = if self.store.higher(self.direction, u, v) { v } else { u };
        let (pair, incident) = if basin_u < basin_v {
            ((basin_u, basin_v), (u, v))
        } else {
            ((basin_v, basin_u), (v, u))
        };

        self.map
            .offer(self.store, self.direction, pair, SaddleEntry { saddle, incident });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_store(values: &[f64]) -> VertexStore {
        let mut store = VertexStore::new(2, 1).expect("store");
        for (i, &value) in values.iter().enumerate() {
            store.add_vertex(i as u32, &[i as f64, value]).expect("vertex");
        }
        store
    }

    #[test]
    fn gradient_picks_steepest_higher_neighbor() {
        let store = path_store(&[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        let visitor = GradientVisitor::new(&store, Direction::Ascending);
        for i in 0..5 {
            visitor.add_edge(i, i + 1).expect("edge");
        }
        let steepest: Vec<_> = (0..6)
            .map(|i| store.steepest(i, Direction::Ascending).expect("steepest"))
            .collect();
        assert_eq!(
            steepest,
            vec![Some(1), None, Some(3), None, Some(5), None]
        );
        let slope = store.gradient(2, Direction::Ascending).expect("info").slope();
        assert!((slope - 3.0).abs() < 1e-12);
    }

    #[test]
    fn descending_gradient_walks_downhill() {
        let store = path_store(&[0.0, 3.0, 1.0, 4.0]);
        let visitor = GradientVisitor::new(&store, Direction::Descending);
        for i in 0..3 {
            visitor.add_edge(i, i + 1).expect("edge");
        }
        let steepest: Vec<_> = (0..4)
            .map(|i| store.steepest(i, Direction::Descending).expect("steepest"))
            .collect();
        assert_eq!(steepest, vec![None, Some(0), None, Some(2)]);
    }

    #[test]
    fn equal_slopes_prefer_the_higher_candidate() {
        let mut store = VertexStore::new(2, 1).expect("store");
        store.add_vertex(0, &[0.0, 0.0]).expect("vertex");
        store.add_vertex(1, &[1.0, 1.0]).expect("vertex");
        store.add_vertex(2, &[-1.0, 1.0]).expect("vertex");
        for edges in [[(0, 1), (0, 2)], [(0, 2), (0, 1)]] {
            store.reset_gradient(Direction::Ascending);
            let visitor = GradientVisitor::new(&store, Direction::Ascending);
            for (u, v) in edges {
                visitor.add_edge(u, v).expect("edge");
            }
            assert_eq!(store.steepest(0, Direction::Ascending).expect("steepest"), Some(2));
        }
    }

    #[test]
    fn unknown_endpoint_is_an_invalid_reference() {
        let store = path_store(&[0.0, 1.0]);
        let visitor = GradientVisitor::new(&store, Direction::Ascending);
        let err = visitor.add_edge(0, 7).expect_err("must fail");
        assert!(matches!(err, MscError::InvalidReference { id: 7 }));
    }

    #[test]
    fn saddle_requires_resolved_basins() {
        let store = path_store(&[0.0, 1.0]);
        let map = SaddleMap::new();
        let visitor = SaddleVisitor::new(&store, Direction::Ascending, &map);
        let err = visitor.add_edge(0, 1).expect_err("must fail");
        assert!(matches!(err, MscError::InvariantViolated(_)));
    }

    #[test]
    fn saddle_keeps_highest_crossing() {
        // Peaks 1 and 4 touch over edge 2-3 and over the shortcut 0-4.
        let mut store = path_store(&[1.0, 9.0, 2.0, 0.5, 8.0]);
        let edges = [(0, 1), (1, 2), (2, 3), (3, 4), (0, 4)];
        let gradient = GradientVisitor::new(&store, Direction::Ascending);
        for (u, v) in edges {
            gradient.add_edge(u, v).expect("edge");
        }
        store.resolve_basins(Direction::Ascending).expect("resolve");

        let map = SaddleMap::new();
        let visitor = SaddleVisitor::new(&store, Direction::Ascending, &map);
        for (u, v) in edges {
            visitor.add_edge(u, v).expect("edge");
        }
        let entries = map.into_entries();
        assert_eq!(entries.len(), 1);
        let (pair, entry) = entries[0];
        assert_eq!(pair, (1, 4));
        // Edge 0-4 crosses at 1.0, above the valley floor at vertex 3 (0.5).
        assert_eq!(entry.saddle, 0);
        assert_eq!(entry.partner(), 4);
        assert_eq!(entry.incident, (0, 4));
    }
}
