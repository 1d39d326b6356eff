use crate::analysis::{AnalysisOptions, run_dual};
use crate::stats::PhaseStats;
use anyhow::{Context, Result};
use msc_core::complex::MorseComplex;
use msc_io::parser::TextStream;
use std::time::Instant;

pub fn run_stream(path: &str, value_slot: Option<usize>, options: &AnalysisOptions) -> Result<()> {
    println!("Streaming mesh from {}...", path);
    let mut timings = PhaseStats::new();
    let start = Instant::now();
    let stream = TextStream::open(path)?;
    let complex = MorseComplex::from_stream(stream, options.config(value_slot))
        .with_context(|| format!("Failed to ingest {path}"))?;
    timings.record("ingest", start.elapsed());
    println!(
        "Mesh ingested. Vertices: {}, dimension {}",
        complex.store().len(),
        complex.store().dimension()
    );

    run_dual(complex, options, timings)
}
