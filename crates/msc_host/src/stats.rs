//! Timing and cell-size statistics for run reports.

use std::collections::HashMap;
use std::time::Duration;

/// Wall-clock time spent in each named phase of a run.
pub struct PhaseStats {
    phases: Vec<(&'static str, Duration)>,
}

impl PhaseStats {
    pub fn new() -> Self {
        Self { phases: Vec::new() }
    }

    pub fn record(&mut self, phase: &'static str, elapsed: Duration) {
        self.phases.push((phase, elapsed));
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|(_, d)| *d).sum()
    }

    pub fn print_report(&self) {
        println!("\nTimings");
        for (phase, elapsed) in &self.phases {
            println!("{:<12} {:>10.3} ms", phase, elapsed.as_secs_f64() * 1e3);
        }
        println!("{:<12} {:>10.3} ms", "total", self.total().as_secs_f64() * 1e3);
    }
}

/// Size distribution of the cells of a labeling.
///
/// Buckets are powers of two: bucket `i` counts cells holding
/// `[2^i, 2^(i+1))` vertices, the last bucket everything larger.
pub struct CellStats {
    pub min: usize,
    pub max: usize,
    pub sum: usize,
    pub count: usize,
    pub buckets: [usize; 20],
}

impl CellStats {
    pub fn from_labels(labels: &[u32]) -> Self {
        let mut sizes: HashMap<u32, usize> = HashMap::new();
        for &label in labels {
            *sizes.entry(label).or_default() += 1;
        }

        let mut stats = Self {
            min: usize::MAX,
            max: 0,
            sum: 0,
            count: 0,
            buckets: [0; 20],
        };
        for size in sizes.into_values() {
            stats.update(size);
        }
        stats
    }

    fn update(&mut self, size: usize) {
        self.min = self.min.min(size);
        self.max = self.max.max(size);
        self.sum += size;
        self.count += 1;

        let idx = (usize::BITS - 1 - size.leading_zeros()).min(19) as usize;
        self.buckets[idx] += 1;
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    pub fn print_report(&self) {
        println!("\nCells");
        println!("Count: {}", self.count);
        if self.count == 0 {
            return;
        }
        println!("Min:   {}", self.min);
        println!("Avg:   {:.2}", self.avg());
        println!("Max:   {}", self.max);

        println!("Distribution (vertices per cell):");
        for (i, &count) in self.buckets.iter().enumerate() {
            if count > 0 {
                let more = if i == 19 { "+" } else { "" };
                println!("[{:>7}{}]: {}", 1usize << i, more, count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_follow_powers_of_two() {
        // Cell sizes 1, 2, 3, 5.
        let labels = [0, 1, 1, 2, 2, 2, 3, 3, 3, 3, 3];
        let stats = CellStats::from_labels(&labels);
        assert_eq!(stats.count, 4);
        assert_eq!((stats.min, stats.max, stats.sum), (1, 5, 11));
        assert_eq!(&stats.buckets[..4], &[1, 2, 1, 0]);
        assert!((stats.avg() - 2.75).abs() < 1e-12);
    }
}
