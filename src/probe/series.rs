use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

/// One latency measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Wall-clock time at the start of the measured request, UNIX nanoseconds.
    pub timestamp_ns: u64,
    /// Measured latency in nanoseconds.
    pub latency_ns: u64,
}

/// Bounded in-memory sample buffer backed by an append-only series file.
///
/// Capacity covers one minute of samples at the probe interval. When the
/// buffer fills, or on explicit flush, every buffered sample is appended to
/// `<data_dir>/<id>.series` as one tab-separated line and the buffer is
/// cleared. A failure to open the file is reported once here and leaves the
/// buffer operating without persistence.
pub struct SampleSeries {
    samples: Vec<Sample>,
    capacity: usize,
    path: PathBuf,
    file: Option<File>,
}

impl SampleSeries {
    pub fn open(data_dir: &Path, id: &str, interval_ms: i64) -> Self {
        let capacity = 60_000u64.div_ceil(interval_ms.max(1) as u64) as usize;
        let path = data_dir.join(format!("{id}.series"));

        info!(path = %path.display(), capacity, "writing latency samples");

        let file = match OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o640)
            .open(&path)
        {
            Ok(file) => Some(file),
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "error opening series log, samples will not be persisted",
                );
                None
            }
        };

        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            path,
            file,
        }
    }

    pub fn append(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends every buffered sample to the series file and clears the
    /// buffer. On a write error the buffer is left intact for a retry.
    pub fn flush(&mut self) -> std::io::Result<()> {
        if self.samples.is_empty() {
            return Ok(());
        }

        debug!(
            count = self.samples.len(),
            path = %self.path.display(),
            "flushing samples",
        );

        let Some(file) = self.file.as_mut() else {
            // Degraded mode: measurement continues, nothing is persisted.
            self.samples.clear();
            return Ok(());
        };

        let mut out = String::with_capacity(self.samples.len() * 40);
        for sample in &self.samples {
            let _ = writeln!(out, "{}\t{}", sample.timestamp_ns, sample.latency_ns);
        }

        file.write_all(out.as_bytes())?;
        self.samples.clear();
        Ok(())
    }
}
