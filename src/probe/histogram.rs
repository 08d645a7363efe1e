use std::fmt::Write;
use std::sync::atomic::{AtomicI64, Ordering};

/// Logarithmic-bucket frequency aggregator for scalar samples.
///
/// Bucket `i` (for `0 < i < N-1`) covers `[base^(i-1), base^i)`; bucket 0 is
/// the catch-all below 1 and the last bucket is unbounded above. All
/// operations are atomic and safe for concurrent use.
pub struct Histogram {
    /// Logarithmic base defining the bucket width. Must be > 1.
    base: f64,
    buckets: Vec<AtomicI64>,
}

impl Histogram {
    /// Creates a histogram with `size` buckets, all at zero.
    pub fn new(size: usize, base: f64) -> Self {
        Self {
            base,
            buckets: (0..size).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    /// Records one sample in the bucket holding its magnitude.
    ///
    /// The integer conversion truncates toward zero, so non-zero samples
    /// below 1 still land in bucket 1 until their logarithm reaches -1.
    /// Zero, negative, and NaN samples collapse into bucket 0 (their
    /// logarithm is -inf or NaN); +inf lands in the last bucket.
    pub fn add_sample(&self, sample: f64) {
        let log = sample.ln() / self.base.ln();
        let idx = if log.is_nan() {
            0
        } else {
            (log as i64)
                .saturating_add(1)
                .clamp(0, (self.buckets.len() - 1) as i64) as usize
        };
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current bucket counts as a snapshot.
    pub fn snapshot(&self) -> Vec<i64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    /// Renders the distribution as one line per bucket, in ascending order.
    /// Bucket bounds are printed as truncated integers; the last bucket has
    /// no upper bound.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut low: f64 = 0.0;

        for (i, bucket) in self.buckets.iter().enumerate() {
            let high = self.base.powi(i as i32);
            let range = if i == self.buckets.len() - 1 {
                format!("[{}--[", low as i64)
            } else {
                format!("[{}--{}[", low as i64, high as i64)
            };
            let _ = writeln!(out, "{range:<10} : {}", bucket.load(Ordering::Relaxed));
            low = high;
        }

        out
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("base", &self.base)
            .field("buckets", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base2_bucket_placement() {
        let hist = Histogram::new(10, 2.0);

        hist.add_sample(0.0);
        assert_eq!(hist.snapshot(), vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        hist.add_sample(1.0);
        assert_eq!(hist.snapshot(), vec![1, 1, 0, 0, 0, 0, 0, 0, 0, 0]);

        hist.add_sample(1.5);
        assert_eq!(hist.snapshot(), vec![1, 2, 0, 0, 0, 0, 0, 0, 0, 0]);

        hist.add_sample(2.0);
        assert_eq!(hist.snapshot(), vec![1, 2, 1, 0, 0, 0, 0, 0, 0, 0]);

        hist.add_sample(2.5);
        assert_eq!(hist.snapshot(), vec![1, 2, 2, 0, 0, 0, 0, 0, 0, 0]);

        hist.add_sample(4.0);
        assert_eq!(hist.snapshot(), vec![1, 2, 2, 1, 0, 0, 0, 0, 0, 0]);

        hist.add_sample(1e100);
        assert_eq!(hist.snapshot(), vec![1, 2, 2, 1, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_base10_bucket_placement() {
        let hist = Histogram::new(10, 10.0);

        for sample in [0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 1e100] {
            hist.add_sample(sample);
        }
        assert_eq!(hist.snapshot(), vec![1, 2, 2, 1, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_powers_of_base_land_one_bucket_up() {
        let hist = Histogram::new(10, 2.0);

        for k in 0..9 {
            hist.add_sample(2f64.powi(k));
        }

        let snapshot = hist.snapshot();
        assert_eq!(snapshot[0], 0);
        for (i, count) in snapshot.iter().enumerate().skip(1) {
            assert_eq!(*count, 1, "bucket {i}");
        }
    }

    #[test]
    fn test_sub_one_samples_truncate_toward_zero() {
        let hist = Histogram::new(5, 2.0);

        // log2 in (-1, 0) truncates to 0, one bucket above the catch-all.
        hist.add_sample(0.7);
        hist.add_sample(0.51);
        assert_eq!(hist.snapshot(), vec![0, 2, 0, 0, 0]);

        // At and below 1/base the truncated logarithm reaches -1.
        hist.add_sample(0.5);
        hist.add_sample(0.3);
        assert_eq!(hist.snapshot(), vec![2, 2, 0, 0, 0]);
    }

    #[test]
    fn test_extreme_samples_clamp_to_edge_buckets() {
        let hist = Histogram::new(5, 2.0);

        hist.add_sample(-1.0);
        hist.add_sample(f64::NAN);
        hist.add_sample(f64::NEG_INFINITY);
        hist.add_sample(0.0);
        assert_eq!(hist.snapshot()[0], 4);

        hist.add_sample(f64::INFINITY);
        hist.add_sample(1e300);
        assert_eq!(hist.snapshot()[4], 2);
    }

    #[test]
    fn test_counts_sum_to_samples_added() {
        let hist = Histogram::new(8, 3.0);
        let samples = [0.0, 0.3, 1.0, 2.0, 9.0, 27.5, 1e9, -4.0, f64::NAN];

        for sample in samples {
            hist.add_sample(sample);
        }

        let total: i64 = hist.snapshot().iter().sum();
        assert_eq!(total as usize, samples.len());
    }

    #[test]
    fn test_dump_renders_bucket_ranges() {
        let hist = Histogram::new(5, 2.0);
        hist.add_sample(1.0);
        hist.add_sample(4.0);

        let dump = hist.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 5);

        let expected = [
            ("[0--1[", 0),
            ("[1--2[", 1),
            ("[2--4[", 0),
            ("[4--8[", 1),
            ("[8--[", 0),
        ];
        for (line, (range, count)) in lines.iter().zip(expected) {
            assert!(line.starts_with(range), "line {line:?} range {range:?}");
            assert!(line.ends_with(&format!(": {count}")), "line {line:?}");
        }
    }
}
