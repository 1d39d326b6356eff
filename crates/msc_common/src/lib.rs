//! Common definitions shared across the Morse complex workspace.
//!
//! This crate holds the identifier types, the gradient direction selector,
//! the node kinds understood by hierarchy builders, and the tuning constants
//! for the locking layer. It is `no_std` so that it can be shared by the
//! engine, the input collaborators, and the command-line host alike.

#![no_std]

/// Global vertex identifier as it appears in input streams and output events.
pub type VertexId = u32;

/// Sentinel for "no steepest neighbor" and "basin not yet resolved".
///
/// A vertex whose steepest slot holds this value is an extremum in the
/// direction of that slot.
pub const NONE: u32 = u32::MAX;

// Tuning constants for the locked block array.
//
// The defaults mirror a mid-sized mesh: blocks of 64Ki records with one
// lock shared by 16 consecutive records.
pub mod limits {
    /// Log2 of the number of records stored in one block.
    pub const DEFAULT_BLOCK_BITS: u32 = 16;

    /// Log2 of the number of consecutive records sharing one lock.
    ///
    /// Must never exceed the block bits, otherwise a lock would straddle two
    /// blocks.
    pub const DEFAULT_LOCK_BITS: u32 = 4;

    /// Sleep interval of a contended spinlock, in microseconds.
    pub const DEFAULT_RETRY_MICROS: u64 = 10_000;

    /// Busy-spin attempts made before a contended spinlock starts sleeping.
    pub const SPIN_ATTEMPTS: u32 = 64;

    /// Largest grid dimensionality the decomposer accepts.
    pub const MAX_GRID_DIMENSION: usize = 8;
}

/// Which of the two gradient-info slots an operation targets.
///
/// Ascending gradients climb towards maxima and their basins are the stable
/// manifolds of the maxima. Descending gradients run towards minima. Every
/// "higher" decision in the engine is taken in the order of the active
/// direction, so the descending run is the ascending run on the negated
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    /// Both directions, ascending first.
    pub const BOTH: [Direction; 2] = [Direction::Ascending, Direction::Descending];

    /// Index of the gradient-info slot owned by this direction.
    #[inline(always)]
    pub const fn slot(self) -> usize {
        match self {
            Direction::Ascending => 0,
            Direction::Descending => 1,
        }
    }

    /// +1 for ascending, -1 for descending.
    #[inline(always)]
    pub const fn sign(self) -> i32 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }

    /// Human readable label used in logs and reports.
    pub const fn label(self) -> &'static str {
        match self {
            Direction::Ascending => "ascending",
            Direction::Descending => "descending",
        }
    }
}

/// Kind of node submitted to a hierarchy builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Extremum of the active direction: a maximum for ascending basins, a
    /// minimum for descending ones.
    Maximum,

    /// Vertex joining exactly two basins.
    Saddle,

    /// Vertex that is the saddle of more than one basin pair.
    MultiSaddle,
}

/// Which grid neighbors are connected at degree two and above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeTopology {
    /// Every diagonal of every face and cell, complementary diagonals
    /// included.
    #[default]
    Complete,

    /// Only the diagonals whose offsets are all non-negative, one per face.
    Disjunct,
}

/// How cancelled elements are kept after a hierarchy is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recoverability {
    /// Cancelled nodes stay addressable and can be revived by lowering the
    /// persistence threshold.
    #[default]
    Recoverable,

    /// Cancelled nodes are dropped once the threshold passes them.
    Irrecoverable,
}
