pub mod tcp;
pub mod udp;

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::export::health::HealthMetrics;
use crate::registry::{Registry, RegistryError};

/// Write size used when a request leaves `writeSize` at zero.
const DEFAULT_WRITE_SIZE: u64 = 1024;

/// Outbound connection driven by a traffic run: one connect, many sends.
///
/// TCP sends are flow-controlled and may be partial; UDP sends are one
/// datagram each and fail outright when oversized.
pub trait Transport: Send + Sized {
    /// Protocol label used in logs and metrics.
    const PROTO: &'static str;

    fn connect(target: &str) -> impl Future<Output = io::Result<Self>> + Send;

    fn send(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// Parameters of a traffic run, as received from the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficRequest {
    pub target: String,

    /// Total byte budget; zero means unbounded.
    #[serde(default)]
    pub max_bytes: u64,

    /// Bytes per write; zero is defaulted to 1024.
    #[serde(default)]
    pub write_size: u64,

    /// Pacing interval between writes; zero writes back to back.
    #[serde(default)]
    pub write_interval_ms: u64,

    /// Optional start time (UNIX epoch seconds); zero starts immediately.
    #[serde(default)]
    pub start_time: u64,

    /// Optional end time (UNIX epoch seconds); zero means no deadline.
    #[serde(default)]
    pub end_time: u64,
}

/// One traffic run: a single outbound byte stream toward a target.
///
/// Status fields are atomic scalars so control-plane queries read them
/// without blocking the transmit loop; a stale-by-one-write view is fine.
pub struct TrafficRun {
    id: String,
    req: TrafficRequest,
    bytes_sent: AtomicU64,
    stop_requested: AtomicBool,
    /// UNIX nanoseconds; zero until transmission begins/ends.
    traffic_start_ns: AtomicI64,
    traffic_end_ns: AtomicI64,
    health: Option<Arc<HealthMetrics>>,
}

/// Point-in-time view of a run, serialized for control-plane replies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub id: String,
    pub bytes_sent: u64,
    pub req: TrafficRequest,
    pub stop_requested: bool,
    pub traffic_start_time: i64,
    pub traffic_end_time: i64,
}

impl TrafficRun {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &TrafficRequest {
        &self.req
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Requests termination. The transmit loop observes the flag at the top
    /// of its next iteration; an in-flight write is not preempted.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }

    pub fn traffic_start_ns(&self) -> i64 {
        self.traffic_start_ns.load(Ordering::Relaxed)
    }

    pub fn traffic_end_ns(&self) -> i64 {
        self.traffic_end_ns.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RunStatus {
        RunStatus {
            id: self.id.clone(),
            bytes_sent: self.bytes_sent(),
            req: self.req.clone(),
            stop_requested: self.stop_requested(),
            traffic_start_time: self.traffic_start_ns(),
            traffic_end_time: self.traffic_end_ns(),
        }
    }

    /// Runs the full transmit state machine: connect, wait for the start
    /// time, pace writes under the byte and time budgets, finalize.
    ///
    /// A dial failure terminates the run without transmission; the run stays
    /// in its registry with zero bytes sent for later status queries.
    pub async fn process<T: Transport>(self: Arc<Self>) {
        let target = &self.req.target;

        let dial_started = Instant::now();
        let mut conn = match T::connect(target).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(
                    proto = T::PROTO,
                    id = %self.id,
                    target = %target,
                    error = %e,
                    "error connecting to traffic target",
                );
                return;
            }
        };
        let connect_time = dial_started.elapsed();

        self.wait_for_start_time().await;
        info!(proto = T::PROTO, id = %self.id, "beginning traffic run");

        let write_size = self.req.write_size as usize;
        let data = vec![0u8; write_size];
        let mut last_send: Option<Instant> = None;

        self.traffic_start_ns.store(unix_now_ns(), Ordering::Relaxed);

        let reason = loop {
            if self.stop_requested() {
                break "stop requested";
            }
            let sent = self.bytes_sent();
            if self.req.max_bytes > 0 && sent >= self.req.max_bytes {
                break "max bytes reached";
            }
            if self.past_end_time() {
                break "time is over";
            }

            if self.req.write_interval_ms > 0 {
                if let Some(last) = last_send {
                    // One millisecond of bias absorbs scheduler overshoot.
                    let pause = Duration::from_millis(self.req.write_interval_ms)
                        .saturating_sub(last.elapsed())
                        .saturating_sub(Duration::from_millis(1));
                    if !pause.is_zero() {
                        sleep(pause).await;
                    }
                }
            }
            last_send = Some(Instant::now());

            let len = if self.req.max_bytes > 0 {
                write_size.min((self.req.max_bytes - sent) as usize)
            } else {
                write_size
            };

            match conn.send(&data[..len]).await {
                Ok(n) => {
                    // Credit only the bytes actually written.
                    self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                    if let Some(health) = &self.health {
                        health
                            .traffic_bytes_sent
                            .with_label_values(&[T::PROTO])
                            .inc_by(n as f64);
                    }
                    debug!(
                        proto = T::PROTO,
                        id = %self.id,
                        sent = n,
                        total = self.bytes_sent(),
                        "sent traffic bytes",
                    );
                }
                Err(e) => {
                    error!(
                        proto = T::PROTO,
                        id = %self.id,
                        target = %target,
                        error = %e,
                        "error sending traffic",
                    );
                    break "send error";
                }
            }
        };

        self.traffic_end_ns.store(unix_now_ns(), Ordering::Relaxed);
        drop(conn);

        let sent = self.bytes_sent();
        let delta_ns = self.traffic_end_ns() - self.traffic_start_ns();
        let throughput_bps = if delta_ns > 0 {
            sent as f64 * 1e9 / delta_ns as f64
        } else {
            0.0
        };

        if let Some(health) = &self.health {
            health.runs_completed.with_label_values(&[T::PROTO]).inc();
        }

        info!(
            proto = T::PROTO,
            id = %self.id,
            reason,
            bytes = sent,
            duration_ns = delta_ns,
            connect = ?connect_time,
            throughput_bps,
            "traffic run completed",
        );
    }

    async fn wait_for_start_time(&self) {
        if self.req.start_time == 0 {
            return;
        }

        let start = UNIX_EPOCH + Duration::from_secs(self.req.start_time);
        // A start time already in the past sleeps zero.
        if let Ok(delta) = start.duration_since(SystemTime::now()) {
            info!(id = %self.id, delay = ?delta, "waiting for traffic start time");
            sleep(delta).await;
        }
    }

    fn past_end_time(&self) -> bool {
        self.req.end_time > 0
            && SystemTime::now() > UNIX_EPOCH + Duration::from_secs(self.req.end_time)
    }
}

/// Registry of traffic runs for one protocol, with the monotonic counter
/// that mints run ids. Runs are never removed; finished runs stay available
/// for status queries.
pub struct RunRegistry {
    runs: Registry<TrafficRun>,
    counter: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            runs: Registry::new(),
            counter: AtomicU64::new(0),
        }
    }

    /// Allocates a run under the id `"<server_id>-<n>"` and installs it
    /// before returning.
    pub fn create(
        &self,
        server_id: &str,
        mut req: TrafficRequest,
        health: Option<Arc<HealthMetrics>>,
    ) -> Result<Arc<TrafficRun>, RegistryError> {
        if req.write_size == 0 {
            req.write_size = DEFAULT_WRITE_SIZE;
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = format!("{server_id}-{n}");

        let run = Arc::new(TrafficRun {
            id: id.clone(),
            req,
            bytes_sent: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
            traffic_start_ns: AtomicI64::new(0),
            traffic_end_ns: AtomicI64::new(0),
            health,
        });

        self.runs.insert(&id, Arc::clone(&run))?;
        Ok(run)
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrafficRun>> {
        self.runs.get(id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn for_each(&self, f: impl FnMut(&str, &Arc<TrafficRun>)) {
        self.runs.for_each(f);
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in UNIX nanoseconds.
pub(crate) fn unix_now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as i64
}
