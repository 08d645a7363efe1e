//! Control-plane adapters: thin translation between JSON-over-HTTP requests
//! and the core registries and activity objects.
//!
//! Request bodies are decoded by hand from raw bytes so that malformed or
//! incomplete JSON yields a 500 with a textual error instead of the
//! extractor's own rejection format. Unknown fields are ignored.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::export::health::HealthMetrics;
use crate::probe::LatencyProbe;
use crate::registry::Registry;
use crate::sink::MetricsSink;
use crate::traffic::tcp::TcpTransport;
use crate::traffic::udp::UdpTransport;
use crate::traffic::{RunRegistry, TrafficRequest, Transport};

/// Dependencies shared by every control-plane handler.
pub struct ControlState {
    pub server_id: Arc<str>,
    pub data_dir: PathBuf,
    pub default_interval_ms: i64,
    pub probes: Registry<LatencyProbe>,
    pub tcp_runs: RunRegistry,
    pub udp_runs: RunRegistry,
    pub sink: Arc<MetricsSink>,
    pub health: Arc<HealthMetrics>,
}

/// Builds the control-plane router.
pub fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/latency/new", post(latency_new))
        .route("/latency/stop", post(latency_stop))
        .route("/latency/status", post(latency_status))
        .route("/latency/series", post(latency_series))
        .route("/tcp", post(tcp_new))
        .route("/tcp/stop", post(tcp_stop))
        .route("/tcp/status", post(tcp_status))
        .route("/udp", post(udp_new))
        .route("/udp/stop", post(udp_stop))
        .route("/udp/status", post(udp_status))
        .with_state(state)
}

/// Binds the control listener and serves the router until cancellation.
pub async fn serve(
    state: Arc<ControlState>,
    port: u16,
    cancel: CancellationToken,
) -> Result<SocketAddr> {
    let app = router(state);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("listening on control port {port}"))?;
    let addr = listener
        .local_addr()
        .context("getting control listener address")?;

    tokio::spawn(async move {
        info!(%addr, "control plane listening");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "control plane server error");
        }
    });

    Ok(addr)
}

// --- Request bodies ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatencyNewRequest {
    id: String,
    target: String,
    #[serde(default)]
    interval_ms: i64,
}

#[derive(Debug, Deserialize)]
struct IdRequest {
    id: String,
}

fn parse_request<T: serde::de::DeserializeOwned>(uri: &str, body: &Bytes) -> Result<T, Response> {
    debug!(uri, body = %String::from_utf8_lossy(body), "received control request");

    serde_json::from_slice(body).map_err(|e| {
        let msg = format!("Error decoding JSON body for '{uri}' request: {e}");
        warn!(uri, error = %e, "bad control request");
        (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
    })
}

// --- Liveness ---

async fn ping() -> &'static str {
    "pong\n"
}

// --- Latency probes ---

async fn latency_new(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    let req: LatencyNewRequest = match parse_request("/latency/new", &body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let interval_ms = if req.interval_ms == 0 {
        state.default_interval_ms
    } else {
        req.interval_ms
    };

    let probe = match LatencyProbe::new(
        &req.id,
        &req.target,
        interval_ms,
        &state.data_dir,
        Arc::clone(&state.server_id),
        Arc::clone(&state.sink),
        Arc::clone(&state.health),
    ) {
        Ok(probe) => Arc::new(probe),
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error creating latency probe: {e}"),
            )
                .into_response()
        }
    };

    if state.probes.insert(&req.id, Arc::clone(&probe)).is_err() {
        // Reported as a plain text body on an otherwise ordinary reply.
        return (
            StatusCode::OK,
            format!("Latency probe already exists for ID '{}'", req.id),
        )
            .into_response();
    }

    state.health.probes_active.inc();
    probe.start();

    (
        StatusCode::OK,
        format!("Latency probe '{}' started", req.id),
    )
        .into_response()
}

async fn latency_stop(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    let req: IdRequest = match parse_request("/latency/stop", &body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match state.probes.remove(&req.id) {
        Some(probe) => {
            probe.stop();
            if let Err(e) = probe.flush() {
                warn!(id = %req.id, error = %e, "flushing probe on stop failed");
            }
            state.health.probes_active.dec();

            (
                StatusCode::OK,
                format!("Latency probe with ID '{}' stopped and removed", req.id),
            )
                .into_response()
        }
        None => (
            StatusCode::OK,
            format!("No latency probe with ID '{}'", req.id),
        )
            .into_response(),
    }
}

async fn latency_status(State(state): State<Arc<ControlState>>) -> Response {
    let mut out = String::new();
    state.probes.for_each(|id, probe| {
        out.push_str(&format!("Latency to {} : {} µs\n", id, probe.latest() / 1000));
    });

    (StatusCode::OK, out).into_response()
}

async fn latency_series(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    let req: IdRequest = match parse_request("/latency/series", &body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let Some(probe) = state.probes.get(&req.id) else {
        return (
            StatusCode::NOT_FOUND,
            format!("No latency probe with ID '{}'", req.id),
        )
            .into_response();
    };

    match tokio::fs::read(probe.log_path()).await {
        Ok(contents) => contents.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(
                "Error reading series file '{}': {e}",
                probe.log_path().display()
            ),
        )
            .into_response(),
    }
}

// --- Traffic runs ---

async fn tcp_new(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    traffic_new::<TcpTransport>(&state, &state.tcp_runs, "/tcp", body)
}

async fn tcp_stop(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    run_stop(&state.tcp_runs, "TCP", "/tcp/stop", body)
}

async fn tcp_status(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    run_status(&state.tcp_runs, "TCP", "/tcp/status", body)
}

async fn udp_new(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    traffic_new::<UdpTransport>(&state, &state.udp_runs, "/udp", body)
}

async fn udp_stop(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    run_stop(&state.udp_runs, "UDP", "/udp/stop", body)
}

async fn udp_status(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    run_status(&state.udp_runs, "UDP", "/udp/status", body)
}

/// Allocates a run, replies with its freshly-minted state, and launches the
/// transmit loop on its own task.
fn traffic_new<T: Transport + 'static>(
    state: &ControlState,
    runs: &RunRegistry,
    uri: &str,
    body: Bytes,
) -> Response {
    let req: TrafficRequest = match parse_request(uri, &body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let run = match runs.create(&state.server_id, req, Some(Arc::clone(&state.health))) {
        Ok(run) => run,
        Err(e) => return (StatusCode::CONFLICT, e.to_string()).into_response(),
    };

    state.health.runs_started.with_label_values(&[T::PROTO]).inc();
    info!(
        proto = T::PROTO,
        id = %run.id(),
        target = %run.request().target,
        "traffic run created",
    );

    let reply = Json(run.snapshot()).into_response();
    tokio::spawn(run.process::<T>());
    reply
}

fn run_stop(runs: &RunRegistry, proto: &str, uri: &str, body: Bytes) -> Response {
    let req: IdRequest = match parse_request(uri, &body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match runs.get(&req.id) {
        Some(run) => {
            run.stop();
            StatusCode::OK.into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            format!("No {proto} run with ID '{}'", req.id),
        )
            .into_response(),
    }
}

fn run_status(runs: &RunRegistry, proto: &str, uri: &str, body: Bytes) -> Response {
    let req: IdRequest = match parse_request(uri, &body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match runs.get(&req.id) {
        Some(run) => Json(run.snapshot()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("No {proto} run with ID '{}'", req.id),
        )
            .into_response(),
    }
}
