pub mod histogram;
pub mod series;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::export::health::HealthMetrics;
use crate::sink::MetricsSink;

use self::histogram::Histogram;
use self::series::{Sample, SampleSeries};

/// Metric name under which latency datapoints reach the metrics sink.
const LATENCY_METRIC: &str = "network.p2p.latency";

/// Shape of the per-probe latency distribution, in microseconds.
const DISTRIBUTION_BUCKETS: usize = 10;
const DISTRIBUTION_BASE: f64 = 10.0;

/// Periodic HTTP latency probe against one target.
///
/// Every `interval_ms` the probe issues a GET to its target with a request
/// timeout equal to the interval, so a single measurement never spans two
/// ticks. Successful measurements (including timeouts, recorded as the
/// measured worst case) are buffered and flushed to the probe's series file.
pub struct LatencyProbe {
    id: String,
    target: String,
    interval: Duration,
    client: reqwest::Client,
    series: Mutex<SampleSeries>,
    /// Last successful measurement, nanoseconds.
    latest_latency_ns: AtomicU64,
    /// Cumulative tick count, including failed ticks.
    counter: AtomicU64,
    distribution: Histogram,
    server_id: Arc<str>,
    sink: Arc<MetricsSink>,
    health: Arc<HealthMetrics>,
    cancel: CancellationToken,
}

impl LatencyProbe {
    /// Creates a probe. A series-log open failure is reported once by the
    /// series buffer and leaves the probe measuring without persistence.
    pub fn new(
        id: &str,
        target: &str,
        interval_ms: i64,
        data_dir: &Path,
        server_id: Arc<str>,
        sink: Arc<MetricsSink>,
        health: Arc<HealthMetrics>,
    ) -> Result<Self> {
        if interval_ms <= 0 {
            bail!("intervalMs must be positive, got {interval_ms}");
        }

        let interval = Duration::from_millis(interval_ms as u64);

        // The interval doubles as the request deadline.
        let client = reqwest::Client::builder()
            .timeout(interval)
            .build()
            .context("building probe HTTP client")?;

        Ok(Self {
            id: id.to_string(),
            target: target.to_string(),
            interval,
            client,
            series: Mutex::new(SampleSeries::open(data_dir, id, interval_ms)),
            latest_latency_ns: AtomicU64::new(0),
            counter: AtomicU64::new(0),
            distribution: Histogram::new(DISTRIBUTION_BUCKETS, DISTRIBUTION_BASE),
            server_id,
            sink,
            health,
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Most recent successful measurement, nanoseconds. Zero until the first
    /// sample lands.
    pub fn latest(&self) -> u64 {
        self.latest_latency_ns.load(Ordering::Relaxed)
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn log_path(&self) -> PathBuf {
        self.series.lock().path().to_path_buf()
    }

    /// Starts the periodic tick loop. Called at most once per probe.
    pub fn start(self: &Arc<Self>) {
        let probe = Arc::clone(self);
        let cancel = self.cancel.clone();

        info!(
            id = %self.id,
            target = %self.target,
            interval = ?self.interval,
            "latency probe started",
        );

        tokio::spawn(async move {
            // First tick one interval from now, then on the ticker's own
            // cadence; a tick that overruns makes the next one fire
            // immediately, with no retro-fire for ticks missed beyond that.
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + probe.interval,
                probe.interval,
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => probe.tick().await,
                }
            }
        });
    }

    /// Cancels the ticker. An in-flight tick is allowed to complete;
    /// buffered samples stay until the next explicit flush.
    pub fn stop(&self) {
        self.cancel.cancel();
        info!(id = %self.id, ticks = self.counter(), "latency probe stopped");
        debug!(
            id = %self.id,
            "latency distribution (µs):\n{}",
            self.distribution.dump(),
        );
    }

    /// Appends buffered samples to the series file.
    pub fn flush(&self) -> Result<()> {
        self.series.lock().flush().context("flushing sample series")
    }

    async fn tick(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
        self.health.probe_ticks.inc();

        let wall_start = SystemTime::now();
        let started = Instant::now();
        let outcome = self.get_target().await;
        let latency = started.elapsed();

        if let Err(e) = outcome {
            // A failure before the deadline is a network error and the tick
            // is skipped; at or past the deadline it is the timeout case,
            // recorded below as a measured worst case.
            if latency < self.interval {
                self.health.probe_failures.inc();
                warn!(id = %self.id, error = %e, "latency measurement failed");
                return;
            }
        }

        let timestamp_ns = wall_start
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64;
        let latency_ns = latency.as_nanos() as u64;

        self.latest_latency_ns.store(latency_ns, Ordering::Relaxed);
        self.distribution.add_sample(latency.as_secs_f64() * 1e6);
        self.health.probe_samples.inc();

        let full = {
            let mut series = self.series.lock();
            series.append(Sample {
                timestamp_ns,
                latency_ns,
            });
            series.is_full()
        };

        if self.sink.is_enabled() {
            let timestamp_s = wall_start
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs_f64();
            let tags = [
                format!("source:{}", self.server_id),
                format!("target:{}", self.id),
            ];

            match self
                .sink
                .publish_gauge(LATENCY_METRIC, timestamp_s, latency.as_secs_f64(), &tags)
                .await
            {
                Ok(()) => self.health.sink_datapoints.inc(),
                Err(e) => {
                    self.health.sink_errors.inc();
                    warn!(id = %self.id, error = %e, "metrics sink publish failed");
                }
            }
        }

        if full {
            let mut series = self.series.lock();
            match series.flush() {
                Ok(()) => self.health.series_flushes.inc(),
                Err(e) => warn!(id = %self.id, error = %e, "series flush failed"),
            }
        }
    }

    async fn get_target(&self) -> reqwest::Result<()> {
        let response = self.client.get(&self.target).send().await?;
        // Drain the body so the measurement covers the full response.
        response.bytes().await?;
        Ok(())
    }
}
