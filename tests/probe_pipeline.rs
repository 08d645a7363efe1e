use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use netprobed::config::SinkConfig;
use netprobed::export::health::HealthMetrics;
use netprobed::probe::LatencyProbe;
use netprobed::sink::MetricsSink;

fn test_health() -> Arc<HealthMetrics> {
    Arc::new(HealthMetrics::new("127.0.0.1:0").expect("health metrics"))
}

fn disabled_sink() -> Arc<MetricsSink> {
    Arc::new(MetricsSink::new(&SinkConfig::default()).expect("sink"))
}

/// Spawns a throwaway HTTP target that answers after `delay` and returns its
/// base URL.
async fn spawn_target(delay: Duration) -> String {
    let app = Router::new().route(
        "/",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "ok"
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind target");
    let addr: SocketAddr = listener.local_addr().expect("target addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("target server");
    });

    format!("http://{addr}/")
}

#[tokio::test]
async fn probe_records_samples_for_healthy_target() {
    let target = spawn_target(Duration::ZERO).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let probe = Arc::new(
        LatencyProbe::new(
            "peer-0",
            &target,
            100,
            dir.path(),
            Arc::from("test-server"),
            disabled_sink(),
            test_health(),
        )
        .expect("probe"),
    );

    probe.start();
    tokio::time::sleep(Duration::from_millis(1050)).await;
    probe.stop();
    // Let an in-flight tick complete before flushing.
    tokio::time::sleep(Duration::from_millis(150)).await;
    probe.flush().expect("flush");

    let contents =
        std::fs::read_to_string(dir.path().join("peer-0.series")).expect("series file");
    let lines: Vec<&str> = contents.lines().collect();

    assert!(
        (8..=11).contains(&lines.len()),
        "expected 8..=11 samples, got {}",
        lines.len()
    );

    for line in &lines {
        let (timestamp, latency) = line.split_once('\t').expect("tab-separated record");
        timestamp.parse::<u64>().expect("timestamp");
        let latency: u64 = latency.parse().expect("latency");
        assert!(
            latency < 100_000_000,
            "latency {latency}ns should be under the 100ms interval"
        );
    }

    // Every tick against a healthy target produces a sample.
    assert_eq!(probe.counter() as usize, lines.len());
    assert!(probe.latest() > 0);
}

#[tokio::test]
async fn probe_records_timeouts_as_worst_case_samples() {
    // The target answers well past the 100ms interval, so every tick ends in
    // a client timeout.
    let target = spawn_target(Duration::from_millis(500)).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let probe = Arc::new(
        LatencyProbe::new(
            "peer-slow",
            &target,
            100,
            dir.path(),
            Arc::from("test-server"),
            disabled_sink(),
            test_health(),
        )
        .expect("probe"),
    );

    probe.start();
    tokio::time::sleep(Duration::from_millis(650)).await;
    probe.stop();
    tokio::time::sleep(Duration::from_millis(150)).await;
    probe.flush().expect("flush");

    let contents =
        std::fs::read_to_string(dir.path().join("peer-slow.series")).expect("series file");
    let lines: Vec<&str> = contents.lines().collect();

    assert!(probe.counter() > 0);
    for line in &lines {
        let (_, latency) = line.split_once('\t').expect("tab-separated record");
        let latency: u64 = latency.parse().expect("latency");
        assert!(
            latency >= 100_000_000,
            "timeout sample {latency}ns should be at least the interval"
        );
    }
}

#[tokio::test]
async fn probe_skips_fast_failures() {
    // Nothing listens here: connections are refused well under the interval.
    let dir = tempfile::tempdir().expect("tempdir");
    let health = test_health();

    let probe = Arc::new(
        LatencyProbe::new(
            "peer-down",
            "http://127.0.0.1:1/",
            100,
            dir.path(),
            Arc::from("test-server"),
            disabled_sink(),
            Arc::clone(&health),
        )
        .expect("probe"),
    );

    probe.start();
    tokio::time::sleep(Duration::from_millis(550)).await;
    probe.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    probe.flush().expect("flush");

    let contents =
        std::fs::read_to_string(dir.path().join("peer-down.series")).expect("series file");
    assert!(contents.is_empty(), "failed ticks must not produce samples");
    assert!(probe.counter() >= 4);
    assert_eq!(probe.latest(), 0);
    assert!(health.probe_failures.get() >= 4.0);
}

#[tokio::test]
async fn probe_health_counters_track_ticks_and_samples() {
    let target = spawn_target(Duration::ZERO).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let health = test_health();

    let probe = Arc::new(
        LatencyProbe::new(
            "peer-counted",
            &target,
            100,
            dir.path(),
            Arc::from("test-server"),
            disabled_sink(),
            Arc::clone(&health),
        )
        .expect("probe"),
    );

    probe.start();
    tokio::time::sleep(Duration::from_millis(450)).await;
    probe.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let ticks = health.probe_ticks.get();
    assert!(ticks >= 3.0);
    assert_eq!(health.probe_samples.get(), ticks);
    assert_eq!(health.probe_failures.get(), 0.0);
    assert_eq!(probe.counter() as f64, ticks);
}
