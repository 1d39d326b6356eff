//! I/O utilities for feeding scalar fields to the gradient engine.
//!
//! Provides a restartable token stream over the line-oriented text mesh
//! format and readers/writers for raw little-endian grid samples and cell
//! label dumps.

/// Raw binary grid samples and label dumps.
///
/// Reads and writes headerless little-endian `f32` sample files laid out
/// axis 0 fastest, and `u32` label files with one entry per vertex.
pub mod loader;

/// Parser for the text mesh format.
///
/// Parses `v`, `e`, `p`, and `f` records into engine tokens and exposes a
/// file-backed token stream that re-opens its file on every rewind.
pub mod parser;
