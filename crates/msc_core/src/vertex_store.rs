//! Vertex records, the simulation-of-simplicity order, and basin resolution.
//!
//! Each vertex owns an immutable embedding (coordinates plus one scalar
//! value slot) and two gradient records, one per [`Direction`]. The gradient
//! records sit in a [`LockedArray`] so that many threads can offer steepest
//! candidates at once; everything else is written once during ingestion.
//!
//! Ties in the scalar value are broken by global id, so no two vertices ever
//! compare equal and every steepest chain strictly climbs.

use crate::locked_array::LockedArray;
use crate::spinlock::{DEFAULT_RETRY_INTERVAL, SpinLockGuard};
use crate::{MscError, Result};
use core::cmp::Ordering as CmpOrdering;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use log::debug;
use msc_common::limits::{DEFAULT_BLOCK_BITS, DEFAULT_LOCK_BITS};
use msc_common::{Direction, NONE, VertexId};
use std::collections::HashMap;
use std::time::Duration;

/// Steepest-neighbor and basin information for one direction of one vertex.
///
/// The fields are atomics so that the gradient pass may read them without
/// holding the element lock. Writes to `steepest` and `slope` happen as a
/// pair under the element lock.
#[derive(Debug)]
pub struct GradientInfo {
    /// Local index of the steepest strictly-higher neighbor, or [`NONE`].
    steepest: AtomicU32,

    /// Slope towards `steepest`, stored as `f64` bits.
    slope: AtomicU64,

    /// Local index of the extremum this vertex drains to, or [`NONE`].
    basin: AtomicU32,
}

impl Default for GradientInfo {
    fn default() -> Self {
        Self {
            steepest: AtomicU32::new(NONE),
            slope: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
            basin: AtomicU32::new(NONE),
        }
    }
}

impl GradientInfo {
    #[inline(always)]
    pub fn steepest(&self) -> u32 {
        self.steepest.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn slope(&self) -> f64 {
        f64::from_bits(self.slope.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn basin(&self) -> u32 {
        self.basin.load(Ordering::Acquire)
    }

    /// Overwrites the steepest candidate. Caller holds the element lock.
    #[inline(always)]
    pub(crate) fn store_steepest(&self, steepest: u32, slope: f64) {
        self.slope.store(slope.to_bits(), Ordering::Release);
        self.steepest.store(steepest, Ordering::Release);
    }

    #[inline(always)]
    fn store_basin(&self, basin: u32) {
        self.basin.store(basin, Ordering::Release);
    }

    fn clear(&self) {
        self.store_steepest(NONE, f64::NEG_INFINITY);
        self.store_basin(NONE);
    }
}

/// The two gradient slots of one vertex, indexed by [`Direction::slot`].
#[derive(Debug, Default)]
pub struct VertexRecord {
    gradient: [GradientInfo; 2],
}

impl VertexRecord {
    #[inline(always)]
    pub fn gradient(&self, direction: Direction) -> &GradientInfo {
        &self.gradient[direction.slot()]
    }
}

/// Granularity of the locked record array.
#[derive(Debug, Clone, Copy)]
pub struct StoreLayout {
    pub block_bits: u32,
    pub lock_bits: u32,
    pub retry: Duration,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            block_bits: DEFAULT_BLOCK_BITS,
            lock_bits: DEFAULT_LOCK_BITS,
            retry: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Owner of all vertex data and of the union-find over steepest pointers.
///
/// Vertices are addressed internally by a dense local index (their insertion
/// order). Global ids only appear at the boundary: in [`add_vertex`], in
/// [`local_index`], and in the tie-break of the total order.
///
/// [`add_vertex`]: VertexStore::add_vertex
/// [`local_index`]: VertexStore::local_index
pub struct VertexStore {
    records: LockedArray<VertexRecord>,

    /// Length of each embedding, value slot included.
    dimension: usize,

    /// Position of the scalar value inside each embedding.
    value_slot: usize,

    /// Flat embeddings, `dimension` entries per vertex.
    embeddings: Vec<f64>,

    /// Global id of every local index.
    ids: Vec<VertexId>,

    /// Global to local map, built only once a non-dense id shows up.
    lookup: Option<HashMap<VertexId, u32>>,

    min_value: f64,
    max_value: f64,
}

impl VertexStore {
    /// Creates an empty store for embeddings of `dimension` entries whose
    /// scalar value sits at `value_slot`.
    pub fn new(dimension: usize, value_slot: usize) -> Result<Self> {
        Self::with_layout(dimension, value_slot, StoreLayout::default())
    }

    pub fn with_layout(dimension: usize, value_slot: usize, layout: StoreLayout) -> Result<Self> {
        if value_slot >= dimension {
            return Err(MscError::InvalidInput(format!(
                "value slot {value_slot} outside embedding of length {dimension}"
            )));
        }
        Ok(Self {
            records: LockedArray::new(layout.block_bits, layout.lock_bits, layout.retry)?,
            dimension,
            value_slot,
            embeddings: Vec::new(),
            ids: Vec::new(),
            lookup: None,
            min_value: f64::INFINITY,
            max_value: f64::NEG_INFINITY,
        })
    }

    /// Appends a vertex and returns its local index.
    ///
    /// `data` must hold exactly `dimension` finite-or-infinite numbers; a NaN
    /// scalar value would break the total order and is rejected, as is an id
    /// that was already introduced.
    pub fn add_vertex(&mut self, id: VertexId, data: &[f64]) -> Result<u32> {
        if data.len() != self.dimension {
            return Err(MscError::InvalidInput(format!(
                "vertex {id} has {} values, expected {}",
                data.len(),
                self.dimension
            )));
        }
        let value = data[self.value_slot];
        if value.is_nan() {
            return Err(MscError::InvalidInput(format!("vertex {id} has a NaN value")));
        }
        let local = self.ids.len();
        if local >= NONE as usize {
            return Err(MscError::Resource(format!(
                "vertex count exceeds {} entries",
                NONE
            )));
        }
        if self.contains(id) {
            return Err(MscError::InvalidInput(format!("vertex {id} introduced twice")));
        }
        let local = local as u32;

        if self.lookup.is_none() && id != local {
            let dense: HashMap<VertexId, u32> = self.ids.iter().map(|&g| (g, g)).collect();
            self.lookup = Some(dense);
        }
        if let Some(lookup) = self.lookup.as_mut() {
            lookup.insert(id, local);
        }

        self.records.push(VertexRecord::default())?;
        self.embeddings.extend_from_slice(data);
        self.ids.push(id);
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);
        Ok(local)
    }

    fn contains(&self, id: VertexId) -> bool {
        match &self.lookup {
            Some(lookup) => lookup.contains_key(&id),
            None => (id as usize) < self.ids.len(),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Smallest and largest scalar value seen so far.
    pub fn value_range(&self) -> (f64, f64) {
        (self.min_value, self.max_value)
    }

    /// Maps a global id to its local index.
    pub fn local_index(&self, id: VertexId) -> Result<u32> {
        let local = match &self.lookup {
            Some(lookup) => lookup.get(&id).copied(),
            None => ((id as usize) < self.ids.len()).then_some(id),
        };
        local.ok_or(MscError::InvalidReference { id })
    }

    #[inline(always)]
    pub fn global_id(&self, local: u32) -> VertexId {
        self.ids[local as usize]
    }

    #[inline(always)]
    pub fn value(&self, local: u32) -> f64 {
        self.embeddings[local as usize * self.dimension + self.value_slot]
    }

    /// Full embedding of a vertex, value slot included.
    pub fn embedding(&self, local: u32) -> &[f64] {
        let start = local as usize * self.dimension;
        &self.embeddings[start..start + self.dimension]
    }

    /// Euclidean distance between two vertices over their coordinates,
    /// skipping the value slot.
    pub fn distance(&self, u: u32, v: u32) -> f64 {
        let a = self.embedding(u);
        let b = self.embedding(v);
        a.iter()
            .zip(b)
            .enumerate()
            .filter(|(slot, _)| *slot != self.value_slot)
            .map(|(_, (x, y))| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }

    /// Compares two vertices by value, then by global id.
    #[inline]
    pub fn compare(&self, u: u32, v: u32) -> CmpOrdering {
        self.value(u)
            .total_cmp(&self.value(v))
            .then_with(|| self.global_id(u).cmp(&self.global_id(v)))
    }

    /// Simulation-of-simplicity order: true if `u` lies strictly below `v`.
    #[inline]
    pub fn smaller(&self, u: u32, v: u32) -> bool {
        self.compare(u, v) == CmpOrdering::Less
    }

    /// True if `u` lies strictly above `v` in the order of `direction`.
    #[inline]
    pub fn higher(&self, direction: Direction, u: u32, v: u32) -> bool {
        match direction {
            Direction::Ascending => self.smaller(v, u),
            Direction::Descending => self.smaller(u, v),
        }
    }

    /// Record of a local index, or [`MscError::InvalidReference`] with the
    /// raw index when it lies past the end.
    #[inline]
    pub fn record(&self, local: u32) -> Result<&VertexRecord> {
        self.records
            .get(local as usize)
            .ok_or(MscError::InvalidReference { id: local })
    }

    #[inline]
    pub fn gradient(&self, local: u32, direction: Direction) -> Result<&GradientInfo> {
        Ok(self.record(local)?.gradient(direction))
    }

    /// Locks the record of `local` until the guard drops.
    #[inline]
    pub fn lock_guard(&self, local: u32) -> SpinLockGuard<'_> {
        self.records.lock_guard(local as usize)
    }

    /// Steepest neighbor of `local`, or `None` for an extremum.
    pub fn steepest(&self, local: u32, direction: Direction) -> Result<Option<u32>> {
        let steepest = self.gradient(local, direction)?.steepest();
        Ok((steepest != NONE).then_some(steepest))
    }

    /// Resolved basin root of `local`, or `None` before resolution.
    pub fn basin(&self, local: u32, direction: Direction) -> Result<Option<u32>> {
        let basin = self.gradient(local, direction)?.basin();
        Ok((basin != NONE).then_some(basin))
    }

    /// Forces the steepest pointer of `local`, bypassing every check.
    ///
    /// Meant for replaying a precomputed gradient; [`resolve_basins`]
    /// validates the result.
    ///
    /// [`resolve_basins`]: VertexStore::resolve_basins
    pub fn set_steepest(&self, local: u32, direction: Direction, steepest: u32, slope: f64) -> Result<()> {
        let info = self.gradient(local, direction)?;
        let _guard = self.lock_guard(local);
        info.store_steepest(steepest, slope);
        Ok(())
    }

    /// Clears one gradient slot of every vertex.
    pub fn reset_gradient(&mut self, direction: Direction) {
        for record in self.records.iter() {
            record.gradient(direction).clear();
        }
    }

    /// Local indices of every vertex without a steepest neighbor.
    pub fn extrema(&self, direction: Direction) -> Vec<u32> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.gradient(direction).steepest() == NONE)
            .map(|(local, _)| local as u32)
            .collect()
    }

    /// Resolves every vertex to the extremum its steepest chain ends in.
    ///
    /// Walks each unresolved chain once with an explicit stack, then writes
    /// the root into every vertex on it (full path compression), so each
    /// steepest arc is followed at most once over the whole call. Previous
    /// basin assignments are discarded first, which makes the call
    /// idempotent.
    ///
    /// # Returns
    ///
    /// The number of extrema, i.e. of distinct basins.
    pub fn resolve_basins(&mut self, direction: Direction) -> Result<usize> {
        let n = self.len();
        for record in self.records.iter() {
            record.gradient(direction).store_basin(NONE);
        }

        let mut chain: Vec<u32> = Vec::new();
        let mut extrema = 0usize;

        for start in 0..n as u32 {
            if self.gradient(start, direction)?.basin() != NONE {
                continue;
            }

            chain.clear();
            let mut current = start;
            let root = loop {
                let info = self.gradient(current, direction)?;
                let basin = info.basin();
                if basin != NONE {
                    break basin;
                }
                let next = info.steepest();
                if next == NONE {
                    info.store_basin(current);
                    extrema += 1;
                    break current;
                }
                if (next as usize) >= n {
                    return Err(MscError::InvariantViolated(format!(
                        "vertex {} points at missing local index {next}",
                        self.global_id(current)
                    )));
                }
                if !self.higher(direction, next, current) {
                    return Err(MscError::InvariantViolated(format!(
                        "{} steepest of vertex {} is not uphill (vertex {})",
                        direction.label(),
                        self.global_id(current),
                        self.global_id(next)
                    )));
                }
                chain.push(current);
                if chain.len() > n {
                    return Err(MscError::InvariantViolated(format!(
                        "steepest chain from vertex {} does not terminate",
                        self.global_id(start)
                    )));
                }
                current = next;
            };

            for &visited in &chain {
                self.gradient(visited, direction)?.store_basin(root);
            }
        }

        debug!(
            "resolved {} {} basins over {} vertices",
            extrema,
            direction.label(),
            n
        );
        Ok(extrema)
    }
}
