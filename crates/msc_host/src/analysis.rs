use crate::stats::{CellStats, PhaseStats};
use anyhow::{Context, Result};
use msc_common::Recoverability;
use msc_core::complex::{ComplexConfig, DualComplex, ManifoldSummary, MorseComplex};
use msc_core::vertex_store::StoreLayout;
use msc_io::loader;
use std::time::Instant;

pub struct AnalysisOptions {
    pub ceiling: f64,
    pub threshold: f64,
    pub recoverability: Recoverability,
    pub emit_paths: bool,
    pub threads: Option<usize>,
    pub labels: Option<String>,
    pub layout: StoreLayout,
}

impl AnalysisOptions {
    pub fn config(&self, value_slot: Option<usize>) -> ComplexConfig {
        let defaults = ComplexConfig::default();
        ComplexConfig {
            threads: self.threads.unwrap_or(defaults.threads),
            value_slot,
            emit_paths: self.emit_paths,
            ceiling: self.ceiling,
            recoverability: self.recoverability,
            layout: self.layout,
            ..defaults
        }
    }
}

fn print_summary(summary: &ManifoldSummary, cancelled: usize, active: usize) {
    println!(
        "{:<10} extrema: {:>7}  saddles: {:>7} ({} multi)  arcs: {:>7}  paths: {:>7}",
        summary.direction.label(),
        summary.extrema,
        summary.saddles,
        summary.multi_saddles,
        summary.arcs,
        summary.paths
    );
    println!("{:<10} cancelled: {:>5}  active extrema: {:>7}", "", cancelled, active);
}

/// Computes both manifolds of `complex`, labels cells, and reports.
pub fn run_dual(complex: MorseComplex, options: &AnalysisOptions, mut timings: PhaseStats) -> Result<()> {
    let vertices = complex.store().len();
    let mut dual: DualComplex = DualComplex::new(complex);

    let start = Instant::now();
    let summaries = dual.compute().context("Failed to compute the gradient complex")?;
    timings.record("complex", start.elapsed());

    let start = Instant::now();
    let cells = dual
        .cells(options.threshold)
        .context("Failed to label cells")?;
    timings.record("cells", start.elapsed());

    println!("Results ({} vertices, {} edges)", vertices, summaries[0].edges);
    for summary in &summaries {
        let hierarchy = dual.hierarchy(summary.direction);
        print_summary(summary, hierarchy.cancellations().len(), hierarchy.active_extrema().len());
    }

    CellStats::from_labels(&cells).print_report();
    timings.print_report();

    if let Some(path) = &options.labels {
        loader::save_labels(path, &cells)?;
        println!("\nLabels written to {}", path);
    }
    Ok(())
}
