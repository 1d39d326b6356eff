mod analysis;
mod generator;
mod grid;
mod stats;
mod stream;

use analysis::AnalysisOptions;
use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use msc_common::limits::{DEFAULT_BLOCK_BITS, DEFAULT_LOCK_BITS, DEFAULT_RETRY_MICROS};
use msc_common::{EdgeTopology, Recoverability};
use msc_core::vertex_store::StoreLayout;
use std::time::Duration;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Topology {
    Complete,
    Disjunct,
}

impl From<Topology> for EdgeTopology {
    fn from(t: Topology) -> Self {
        match t {
            Topology::Complete => EdgeTopology::Complete,
            Topology::Disjunct => EdgeTopology::Disjunct,
        }
    }
}

#[derive(Args)]
struct Simplify {
    /// Largest persistence the hierarchies are built up to.
    #[arg(long, default_value_t = f64::INFINITY)]
    ceiling: f64,
    /// Persistence threshold applied before labeling cells.
    #[arg(short, long, default_value_t = 0.0)]
    threshold: f64,
    /// Drop simplified nodes instead of keeping them recoverable.
    #[arg(long)]
    irrecoverable: bool,
    /// Trace and submit the steepest path of every arc.
    #[arg(long)]
    paths: bool,
    /// Worker threads for grid passes.
    #[arg(short = 'j', long)]
    threads: Option<usize>,
    /// Output path for the raw u32 cell label of every vertex.
    #[arg(short, long)]
    labels: Option<String>,
    /// Log2 of the vertex records held by one storage block.
    #[arg(long, default_value_t = DEFAULT_BLOCK_BITS)]
    block_bits: u32,
    /// Log2 of the consecutive records sharing one lock.
    #[arg(long, default_value_t = DEFAULT_LOCK_BITS)]
    lock_bits: u32,
    /// Sleep interval of a contended record lock, in microseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_MICROS)]
    retry_us: u64,
}

impl From<Simplify> for AnalysisOptions {
    fn from(s: Simplify) -> Self {
        Self {
            ceiling: s.ceiling,
            threshold: s.threshold,
            recoverability: if s.irrecoverable {
                Recoverability::Irrecoverable
            } else {
                Recoverability::Recoverable
            },
            emit_paths: s.paths,
            threads: s.threads,
            labels: s.labels,
            layout: StoreLayout {
                block_bits: s.block_bits,
                lock_bits: s.lock_bits,
                retry: Duration::from_micros(s.retry_us),
            },
        }
    }
}

/// Parses one `lo:hi` coordinate range.
fn parse_bound(s: &str) -> Result<(f64, f64), String> {
    let (lo, hi) = s
        .split_once(':')
        .ok_or_else(|| format!("bound `{s}` is not of the form lo:hi"))?;
    let lo: f64 = lo.trim().parse().map_err(|e| format!("bad lower bound in `{s}`: {e}"))?;
    let hi: f64 = hi.trim().parse().map_err(|e| format!("bad upper bound in `{s}`: {e}"))?;
    if !(lo.is_finite() && hi.is_finite()) || hi < lo {
        return Err(format!("bound `{s}` is not a finite range"));
    }
    Ok((lo, hi))
}

#[derive(Subcommand)]
enum Commands {
    Gen {
        #[arg(long, value_delimiter = ',', default_value = "64,64")]
        dims: Vec<usize>,
        #[arg(long)]
        grid: Option<String>,
        #[arg(long)]
        mesh: Option<String>,
        #[arg(long, default_value_t = 12)]
        bumps: usize,
        #[arg(long, default_value_t = 12345)]
        seed: u64,
    },
    Grid {
        #[arg(short, long)]
        input: String,
        #[arg(long, value_delimiter = ',', required = true)]
        dims: Vec<usize>,
        #[arg(long, default_value_t = 1)]
        degree: u8,
        #[arg(long, value_enum, default_value_t = Topology::Complete)]
        topology: Topology,
        /// Coordinate range of every axis as lo:hi, comma separated
        /// (default: 0:1 on every axis).
        #[arg(long, value_delimiter = ',', value_parser = parse_bound)]
        bounds: Vec<(f64, f64)>,
        #[command(flatten)]
        simplify: Simplify,
    },
    Stream {
        #[arg(short, long)]
        input: String,
        /// Position of the scalar value in vertex records (default: last).
        #[arg(long)]
        value_slot: Option<usize>,
        #[command(flatten)]
        simplify: Simplify,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Gen {
            dims,
            grid,
            mesh,
            bumps,
            seed,
        } => {
            generator::generate_field_data(&dims, grid.as_deref(), mesh.as_deref(), bumps, seed)?;
        }
        Commands::Grid {
            input,
            dims,
            degree,
            topology,
            bounds,
            simplify,
        } => {
            grid::run_grid(&input, &dims, degree, topology.into(), &bounds, &simplify.into())?;
        }
        Commands::Stream {
            input,
            value_slot,
            simplify,
        } => {
            stream::run_stream(&input, value_slot, &simplify.into())?;
        }
    }
    Ok(())
}
