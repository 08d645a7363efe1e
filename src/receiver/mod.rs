//! Passive traffic receivers: counterparts of the outbound traffic runs.
//!
//! Payload bytes are opaque and zero-filled; receivers only drain and tally
//! them. Read errors after startup abort the process.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::export::health::HealthMetrics;

/// Accepts TCP connections and drains them, tallying received bytes.
pub struct TcpReceiver {
    port: u16,
    buffer_size: usize,
    health: Arc<HealthMetrics>,
}

impl TcpReceiver {
    pub fn new(port: u16, buffer_size: usize, health: Arc<HealthMetrics>) -> Self {
        Self {
            port,
            buffer_size,
            health,
        }
    }

    /// Binds the listener and spawns the accept loop. Bind failures are
    /// startup errors; each accepted connection drains on its own task.
    pub async fn start(&self, cancel: CancellationToken) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .with_context(|| format!("listening for TCP traffic on port {}", self.port))?;
        let addr = listener.local_addr().context("getting TCP listener address")?;
        info!(%addr, "listening for TCP traffic");

        let buffer_size = self.buffer_size;
        let health = Arc::clone(&self.health);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted TCP connection");
                            health.tcp_connections_accepted.inc();
                            let health = Arc::clone(&health);
                            tokio::spawn(drain_tcp_connection(
                                stream, peer, buffer_size, health,
                            ));
                        }
                        Err(e) => info!(error = %e, "error accepting TCP connection"),
                    }
                }
            }
        });

        Ok(addr)
    }
}

async fn drain_tcp_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    buffer_size: usize,
    health: Arc<HealthMetrics>,
) {
    let mut buffer = vec![0u8; buffer_size];
    let mut total: u64 = 0;

    loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                health.tcp_bytes_received.inc_by(n as f64);
                debug!(%peer, bytes = n, "received TCP bytes");
            }
            Err(e) => {
                error!(%peer, error = %e, "error reading from TCP connection");
                std::process::exit(1);
            }
        }
    }

    info!(%peer, bytes = total, "TCP connection terminated");
}

/// Reads UDP datagrams in a loop, keeping a per-source byte tally.
pub struct UdpReceiver {
    port: u16,
    buffer_size: usize,
    health: Arc<HealthMetrics>,
}

impl UdpReceiver {
    pub fn new(port: u16, buffer_size: usize, health: Arc<HealthMetrics>) -> Self {
        Self {
            port,
            buffer_size,
            health,
        }
    }

    /// Binds the socket and spawns the receive loop.
    pub async fn start(&self, cancel: CancellationToken) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(("0.0.0.0", self.port))
            .await
            .with_context(|| format!("listening for UDP traffic on port {}", self.port))?;
        let addr = socket.local_addr().context("getting UDP socket address")?;
        info!(%addr, "listening for UDP traffic");

        let buffer_size = self.buffer_size;
        let health = Arc::clone(&self.health);

        tokio::spawn(async move {
            let mut buffer = vec![0u8; buffer_size];
            let mut totals: HashMap<SocketAddr, u64> = HashMap::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = socket.recv_from(&mut buffer) => match received {
                        Ok((n, peer)) => {
                            let total = totals.entry(peer).or_insert(0);
                            *total += n as u64;
                            health
                                .udp_bytes_received
                                .with_label_values(&[&peer.ip().to_string()])
                                .inc_by(n as f64);
                            debug!(
                                %peer,
                                bytes = n,
                                total = *total,
                                "received UDP datagram",
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "error reading from UDP socket");
                            std::process::exit(1);
                        }
                    }
                }
            }
        });

        Ok(addr)
    }
}
