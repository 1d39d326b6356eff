use anyhow::{Context, Result, bail};
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

fn read_all(path: &Path, what: &str) -> Result<Vec<u8>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {what} file {}", path.display()))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)
        .with_context(|| format!("Failed to read {what} file {}", path.display()))?;
    Ok(buffer)
}

/// Loads raw little-endian `f32` grid samples, axis 0 fastest.
///
/// The file must hold exactly one sample per grid point of `dims`.
pub fn load_grid_file<P: AsRef<Path>>(path: P, dims: &[usize]) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let expected: usize = dims.iter().product();
    let buffer = read_all(path, "grid")?;

    if buffer.len() != expected * 4 {
        bail!(
            "{} holds {} bytes, grid {:?} needs {}",
            path.display(),
            buffer.len(),
            dims,
            expected * 4
        );
    }

    let samples: Vec<f32> = buffer
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if let Some(i) = samples.iter().position(|x| x.is_nan()) {
        bail!("{} holds NaN at sample {}", path.display(), i);
    }

    debug!("loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// Writes grid samples as raw little-endian `f32`.
pub fn save_grid_file<P: AsRef<Path>>(path: P, samples: &[f32]) -> Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("Failed to create grid file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for x in samples {
        out.write_all(&x.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Writes one little-endian `u32` label per vertex.
pub fn save_labels<P: AsRef<Path>>(path: P, labels: &[u32]) -> Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("Failed to create label file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for label in labels {
        out.write_all(&label.to_le_bytes())?;
    }
    out.flush()?;
    debug!("wrote {} labels to {}", labels.len(), path.display());
    Ok(())
}

pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let buffer = read_all(path, "label")?;
    if buffer.len() % 4 != 0 {
        bail!("{} is not a whole number of u32 labels", path.display());
    }
    Ok(buffer
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
