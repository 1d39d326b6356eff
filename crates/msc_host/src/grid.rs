use crate::analysis::{AnalysisOptions, run_dual};
use crate::stats::PhaseStats;
use anyhow::Result;
use msc_common::EdgeTopology;
use msc_core::complex::MorseComplex;
use msc_core::decomposer::GridSpec;
use msc_io::loader;
use std::time::Instant;

pub fn run_grid(
    path: &str,
    dims: &[usize],
    degree: u8,
    topology: EdgeTopology,
    bounds: &[(f64, f64)],
    options: &AnalysisOptions,
) -> Result<()> {
    let mut grid = GridSpec::new(dims).with_degree(degree).with_topology(topology);
    if !bounds.is_empty() {
        grid = grid.with_bounds(bounds);
    }
    grid.validate()?;
    let config = options.config(None);

    println!("Loading {:?} grid from {}...", dims, path);
    let mut timings = PhaseStats::new();
    let start = Instant::now();
    let samples = loader::load_grid_file(path, dims)?;
    let complex = MorseComplex::from_grid(grid, &samples, config)?;
    timings.record("load", start.elapsed());
    println!(
        "Grid loaded. Vertices: {}, degree {} ({:?}), {} threads",
        samples.len(),
        degree,
        topology,
        complex.config().threads
    );

    run_dual(complex, options, timings)
}
