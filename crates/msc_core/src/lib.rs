//! Streaming discrete-gradient engine for Morse complexes.
//!
//! This crate computes the steepest-neighbor gradient of a scalar field
//! sampled on a vertex set, resolves the resulting basins with union-find,
//! discovers the saddles that join neighboring basins, and hands the
//! resulting nodes and arcs to a persistence hierarchy builder. Gradient
//! updates are safe to drive from many threads at once; the domain
//! decomposer does exactly that for implicit regular grids.

/// Spinlock with bounded-interval retry.
///
/// The one-byte lock underneath every per-element lock of the vertex store.
/// Contended acquisitions spin briefly and then sleep for a fixed interval
/// between attempts.
pub mod spinlock;

/// Growable block array with striped element locks.
///
/// Stores per-vertex gradient records in fixed-size blocks so that growth
/// never moves existing records, with one lock per run of consecutive
/// elements and a separate lock serializing structural resizes.
pub mod locked_array;

/// Vertex records, the simulation-of-simplicity order, and basin resolution.
///
/// Owns the embeddings and scalar values of every vertex together with two
/// gradient slots per vertex, and resolves the steepest chains into basin
/// roots with full path compression.
pub mod vertex_store;

/// Per-edge callbacks for the two streaming passes.
///
/// The gradient visitor records steepest neighbors under double-checked
/// locking; the saddle visitor reduces edges crossing basin boundaries into
/// one best saddle candidate per basin pair.
pub mod visitor;

/// Parallel edge generation for implicit regular grids.
///
/// Bisects the grid index range over a pool of visitors, runs each piece on
/// its own thread, and enumerates the grid edges of each piece up to the
/// configured neighbor degree.
pub mod decomposer;

/// Pull-based restartable input contract.
pub mod stream;

/// Output contract towards persistence hierarchy builders.
///
/// Defines the builder trait and ships a recording builder for inspection
/// and a merge-tree builder that computes persistence pairs.
pub mod hierarchy;

/// Two-pass orchestration, event emission, and dual-manifold cells.
pub mod complex;

use msc_common::VertexId;
use thiserror::Error;

/// Errors raised by the gradient engine.
///
/// None of these are retried. Reference and input errors point at a defect
/// in the data handed to the engine, invariant violations at a corrupted
/// precomputation, and resource errors at exhaustion of the host.
#[derive(Debug, Error)]
pub enum MscError {
    /// An edge, path, or lookup named a vertex that was never introduced.
    #[error("vertex {id} referenced before it was introduced")]
    InvalidReference { id: VertexId },

    /// A structural invariant of the gradient no longer holds.
    ///
    /// Raised for a steepest pointer that does not lead uphill, a steepest
    /// chain that does not terminate, or a path whose terminal vertex does
    /// not match the basin it was traced for.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// Thread creation or allocation failed.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// Configuration or record contents are malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The token stream collaborator failed to produce a record.
    #[error("token stream failed: {0}")]
    Stream(String),
}

pub type Result<T> = core::result::Result<T, MscError>;
