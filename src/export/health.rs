use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Prometheus metrics for daemon health and observability.
///
/// All metrics use the "netprobed" namespace and are served at `/metrics`
/// alongside a `/healthz` liveness route on a dedicated listener.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total probe ticks across all latency probes.
    pub probe_ticks: Counter,
    /// Probe ticks that failed before the timeout deadline.
    pub probe_failures: Counter,
    /// Samples appended to probe buffers.
    pub probe_samples: Counter,
    /// Buffer flushes to series files.
    pub series_flushes: Counter,
    /// Datapoints accepted by the metrics sink.
    pub sink_datapoints: Counter,
    /// Datapoints the metrics sink rejected or dropped.
    pub sink_errors: Counter,
    /// Live latency probes.
    pub probes_active: Gauge,
    /// Traffic runs created, by protocol.
    pub runs_started: CounterVec,
    /// Traffic runs that reached their finalize phase, by protocol.
    pub runs_completed: CounterVec,
    /// Outbound traffic bytes, by protocol.
    pub traffic_bytes_sent: CounterVec,
    /// Inbound TCP connections accepted.
    pub tcp_connections_accepted: Counter,
    /// Inbound TCP bytes drained.
    pub tcp_bytes_received: Counter,
    /// Inbound UDP bytes, by source address.
    pub udp_bytes_received: CounterVec,
}

impl HealthMetrics {
    /// Creates a health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let probe_ticks = Counter::with_opts(
            Opts::new("probe_ticks_total", "Total latency probe ticks.").namespace("netprobed"),
        )?;
        let probe_failures = Counter::with_opts(
            Opts::new(
                "probe_failures_total",
                "Probe ticks that failed before the timeout deadline.",
            )
            .namespace("netprobed"),
        )?;
        let probe_samples = Counter::with_opts(
            Opts::new(
                "probe_samples_total",
                "Latency samples appended to probe buffers.",
            )
            .namespace("netprobed"),
        )?;
        let series_flushes = Counter::with_opts(
            Opts::new("series_flushes_total", "Buffer flushes to series files.")
                .namespace("netprobed"),
        )?;
        let sink_datapoints = Counter::with_opts(
            Opts::new(
                "sink_datapoints_total",
                "Datapoints accepted by the metrics sink.",
            )
            .namespace("netprobed"),
        )?;
        let sink_errors = Counter::with_opts(
            Opts::new(
                "sink_errors_total",
                "Datapoints the metrics sink rejected or dropped.",
            )
            .namespace("netprobed"),
        )?;
        let probes_active = Gauge::with_opts(
            Opts::new("probes_active", "Number of live latency probes.").namespace("netprobed"),
        )?;
        let runs_started = CounterVec::new(
            Opts::new("runs_started_total", "Traffic runs created by protocol.")
                .namespace("netprobed"),
            &["proto"],
        )?;
        let runs_completed = CounterVec::new(
            Opts::new(
                "runs_completed_total",
                "Traffic runs that finished by protocol.",
            )
            .namespace("netprobed"),
            &["proto"],
        )?;
        let traffic_bytes_sent = CounterVec::new(
            Opts::new(
                "traffic_bytes_sent_total",
                "Outbound traffic bytes by protocol.",
            )
            .namespace("netprobed"),
            &["proto"],
        )?;
        let tcp_connections_accepted = Counter::with_opts(
            Opts::new(
                "tcp_connections_accepted_total",
                "Inbound TCP connections accepted.",
            )
            .namespace("netprobed"),
        )?;
        let tcp_bytes_received = Counter::with_opts(
            Opts::new("tcp_bytes_received_total", "Inbound TCP bytes drained.")
                .namespace("netprobed"),
        )?;
        let udp_bytes_received = CounterVec::new(
            Opts::new(
                "udp_bytes_received_total",
                "Inbound UDP bytes by source address.",
            )
            .namespace("netprobed"),
            &["source"],
        )?;

        registry.register(Box::new(probe_ticks.clone()))?;
        registry.register(Box::new(probe_failures.clone()))?;
        registry.register(Box::new(probe_samples.clone()))?;
        registry.register(Box::new(series_flushes.clone()))?;
        registry.register(Box::new(sink_datapoints.clone()))?;
        registry.register(Box::new(sink_errors.clone()))?;
        registry.register(Box::new(probes_active.clone()))?;
        registry.register(Box::new(runs_started.clone()))?;
        registry.register(Box::new(runs_completed.clone()))?;
        registry.register(Box::new(traffic_bytes_sent.clone()))?;
        registry.register(Box::new(tcp_connections_accepted.clone()))?;
        registry.register(Box::new(tcp_bytes_received.clone()))?;
        registry.register(Box::new(udp_bytes_received.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            probe_ticks,
            probe_failures,
            probe_samples,
            series_flushes,
            sink_datapoints,
            sink_errors,
            probes_active,
            runs_started,
            runs_completed,
            traffic_bytes_sent,
            tcp_connections_accepted,
            tcp_bytes_received,
            udp_bytes_received,
        })
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let registry = self.registry.clone();
        let app_state = Arc::new(AppState { registry });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("Content-Type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encoding metrics: {e}"),
        )
            .into_response(),
    }
}

/// GET /healthz - liveness probe.
async fn healthz_handler() -> &'static str {
    "ok"
}
