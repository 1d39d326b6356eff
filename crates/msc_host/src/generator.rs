//! Synthetic scalar fields for exercising the gradient engine.
//!
//! Builds a sum of Gaussian bumps over the unit cube, sampled on a regular
//! grid, and writes it both as raw grid samples and as an explicit text mesh
//! of the same grid so the two input paths can be compared.

use anyhow::{Context, Result, bail};
use msc_core::decomposer::GridSpec;
use msc_core::stream::Token;
use msc_io::{loader, parser};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};

struct Bump {
    center: Vec<f64>,
    height: f64,
    width: f64,
}

/// Samples the bump field on `dims`, axis 0 fastest.
///
/// Bump centers, heights, and widths come from a xorshift generator seeded
/// with `seed`, so the same arguments always give the same field. Heights
/// alternate in sign, which produces both peaks and pits.
pub fn sample_field(dims: &[usize], bumps: usize, seed: u64) -> Vec<f32> {
    let mut state: u64 = seed.max(1);
    let mut rng_float = move || {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        let result = state.wrapping_mul(0x2545F4914F6CDD1D);
        (result as f64) / (u64::MAX as f64)
    };

    let d = dims.len();
    let bumps: Vec<Bump> = (0..bumps)
        .map(|k| Bump {
            center: (0..d).map(|_| rng_float()).collect(),
            height: (0.5 + rng_float()) * if k % 2 == 0 { 1.0 } else { -1.0 },
            width: 0.05 + 0.15 * rng_float(),
        })
        .collect();

    let grid = GridSpec::new(dims);
    (0..grid.vertex_count())
        .into_par_iter()
        .map_init(
            || vec![0.0f64; d],
            |point, i| {
                grid.coordinates_into(i, point);
                let value: f64 = bumps
                    .iter()
                    .map(|b| {
                        let r2: f64 = point
                            .iter()
                            .zip(&b.center)
                            .map(|(x, c)| (x - c) * (x - c))
                            .sum();
                        b.height * (-r2 / (2.0 * b.width * b.width)).exp()
                    })
                    .sum();
                value as f32
            },
        )
        .collect()
}

/// Writes the grid as a text mesh: one vertex record per sample, one path
/// per row along axis 0, and plain edges along every other axis.
fn write_mesh(path: &str, dims: &[usize], samples: &[f32]) -> Result<()> {
    let grid = GridSpec::new(dims);
    let strides = grid.strides();
    let d = dims.len();
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create mesh file {path}"))?,
    );

    writeln!(out, "# {:?} grid, {} samples", dims, samples.len())?;
    let mut data = vec![0.0f64; d + 1];
    for (i, &value) in samples.iter().enumerate() {
        grid.coordinates_into(i, &mut data[..d]);
        data[d] = f64::from(value);
        parser::write_record(&mut out, &Token::Vertex { id: i as u32, data: data.clone() })?;
    }
    parser::write_record(&mut out, &Token::Finalize)?;

    for row in (0..samples.len()).step_by(dims[0]) {
        if dims[0] > 1 {
            let ids = (row..row + dims[0]).map(|i| i as u32).collect();
            parser::write_record(&mut out, &Token::Path(ids))?;
        }
    }
    for i in 0..samples.len() {
        let mut rest = i;
        for axis in 0..d {
            let coordinate = rest % dims[axis];
            rest /= dims[axis];
            if axis > 0 && coordinate + 1 < dims[axis] {
                let j = i + strides[axis];
                parser::write_record(&mut out, &Token::Edge(i as u32, j as u32))?;
            }
        }
    }
    parser::write_record(&mut out, &Token::Finalize)?;
    out.flush()?;
    Ok(())
}

pub fn generate_field_data(
    dims: &[usize],
    grid_path: Option<&str>,
    mesh_path: Option<&str>,
    bumps: usize,
    seed: u64,
) -> Result<()> {
    GridSpec::new(dims).validate()?;
    if grid_path.is_none() && mesh_path.is_none() {
        bail!("nothing to write: pass --grid and/or --mesh");
    }

    println!("Generating {:?} field with {} bumps (seed={})...", dims, bumps, seed);
    let samples = sample_field(dims, bumps, seed);

    if let Some(path) = grid_path {
        println!("Writing raw samples to {}...", path);
        loader::save_grid_file(path, &samples)?;
    }
    if let Some(path) = mesh_path {
        println!("Writing text mesh to {}...", path);
        write_mesh(path, dims, &samples)?;
    }

    println!("Done.");
    Ok(())
}
