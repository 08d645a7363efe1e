use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::control::{self, ControlState};
use crate::export::health::HealthMetrics;
use crate::receiver::{TcpReceiver, UdpReceiver};
use crate::registry::Registry;
use crate::sink::MetricsSink;
use crate::traffic::RunRegistry;

/// Agent orchestrates all components: health server, passive receivers,
/// control plane, and the registries of live probes and runs.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    state: Option<Arc<ControlState>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            state: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components. Listener setup failures abort startup.
    pub async fn start(&mut self) -> Result<()> {
        self.health
            .start()
            .await
            .context("starting health metrics server")?;
        info!("health metrics server started");

        let sink = Arc::new(MetricsSink::new(&self.cfg.sink).context("creating metrics sink")?);
        if sink.is_enabled() {
            info!(endpoint = %self.cfg.sink.endpoint, "metrics sink configured");
        }

        let server_id: Arc<str> = Arc::from(self.cfg.resolved_id());
        info!(
            id = %server_id,
            data_dir = %self.cfg.data_dir.display(),
            "initialized server identity",
        );

        let state = Arc::new(ControlState {
            server_id,
            data_dir: self.cfg.data_dir.clone(),
            default_interval_ms: self.cfg.default_interval_ms,
            probes: Registry::new(),
            tcp_runs: RunRegistry::new(),
            udp_runs: RunRegistry::new(),
            sink,
            health: Arc::clone(&self.health),
        });

        TcpReceiver::new(
            self.cfg.tcp_port,
            self.cfg.tcp_read_buffer_size,
            Arc::clone(&self.health),
        )
        .start(self.cancel.child_token())
        .await
        .context("starting TCP receiver")?;

        UdpReceiver::new(
            self.cfg.udp_port,
            self.cfg.udp_read_buffer_size,
            Arc::clone(&self.health),
        )
        .start(self.cancel.child_token())
        .await
        .context("starting UDP receiver")?;

        control::serve(
            Arc::clone(&state),
            self.cfg.http_port,
            self.cancel.child_token(),
        )
        .await
        .context("starting control plane")?;

        self.state = Some(state);
        info!("agent fully started");

        Ok(())
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal servers and receivers to stop.
        self.cancel.cancel();

        if let Some(state) = &self.state {
            // Stop live probes and persist whatever their buffers still hold.
            state.probes.for_each(|id, probe| {
                probe.stop();
                if let Err(e) = probe.flush() {
                    warn!(id, error = %e, "flushing probe during shutdown failed");
                }
            });

            // Running traffic runs observe the flag at their next iteration.
            state.tcp_runs.for_each(|_, run| run.stop());
            state.udp_runs.for_each(|_, run| run.stop());
        }

        self.health.stop().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;

    /// Full startup on ephemeral ports, then shutdown.
    #[tokio::test]
    async fn test_agent_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config {
            http_port: 0,
            tcp_port: 0,
            udp_port: 0,
            data_dir: dir.path().to_path_buf(),
            id: "agent-test".to_string(),
            health: HealthConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            ..Default::default()
        };

        let mut agent = Agent::new(cfg).expect("agent");
        agent.start().await.expect("start");
        agent.stop().await.expect("stop");
    }
}
