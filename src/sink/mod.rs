//! Best-effort metrics-sink client.
//!
//! Publishes gauge datapoints to a Datadog-compatible series endpoint.
//! Delivery is best-effort: failures are reported to the caller for
//! accounting but never interrupt measurement.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::config::SinkConfig;

#[derive(Serialize)]
struct SeriesPayload<'a> {
    series: [MetricPoint<'a>; 1],
}

#[derive(Serialize)]
struct MetricPoint<'a> {
    metric: &'a str,
    points: [(f64, f64); 1],
    #[serde(rename = "type")]
    kind: &'a str,
    host: &'a str,
    tags: &'a [String],
}

/// HTTP client for the external telemetry ingestion endpoint.
pub struct MetricsSink {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    app_key: String,
    enabled: bool,
}

impl MetricsSink {
    pub fn new(cfg: &SinkConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building metrics sink HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
            app_key: cfg.app_key.clone(),
            enabled: cfg.enabled,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Publishes a single gauge datapoint. A no-op when the sink is disabled.
    pub async fn publish_gauge(
        &self,
        metric: &str,
        timestamp_s: f64,
        value: f64,
        tags: &[String],
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let url = format!(
            "{}/api/v1/series?api_key={}&application_key={}",
            self.endpoint, self.api_key, self.app_key,
        );

        let payload = SeriesPayload {
            series: [MetricPoint {
                metric,
                points: [(timestamp_s, value)],
                kind: "gauge",
                host: "",
                tags,
            }],
        };

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("sending datapoint to metrics sink")?;

        let status = response.status();
        if !status.is_success() {
            bail!("unexpected status {status} from metrics sink");
        }

        debug!(metric, value, "published datapoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let tags = vec!["source:a".to_string(), "target:b".to_string()];
        let payload = SeriesPayload {
            series: [MetricPoint {
                metric: "network.p2p.latency",
                points: [(1_700_000_000.0, 0.042)],
                kind: "gauge",
                host: "",
                tags: &tags,
            }],
        };

        let json = serde_json::to_value(&payload).expect("serialize");
        let point = &json["series"][0];
        assert_eq!(point["metric"], "network.p2p.latency");
        assert_eq!(point["type"], "gauge");
        assert_eq!(point["points"][0][0], 1_700_000_000.0);
        assert_eq!(point["points"][0][1], 0.042);
        assert_eq!(point["tags"][1], "target:b");
    }

    #[tokio::test]
    async fn test_disabled_sink_is_a_noop() {
        let sink = MetricsSink::new(&SinkConfig::default()).expect("sink");
        assert!(!sink.is_enabled());

        sink.publish_gauge("network.p2p.latency", 0.0, 1.0, &[])
            .await
            .expect("disabled publish");
    }
}
