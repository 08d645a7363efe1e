use std::io;

use tokio::net::UdpSocket;
use tracing::debug;

use super::Transport;

/// Connected UDP datagram transport. Each send is one datagram; sends larger
/// than the path MTU fail at the socket layer and are not retried.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl Transport for UdpTransport {
    const PROTO: &'static str = "udp";

    async fn connect(target: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(target).await?;
        debug!(
            local = %socket.local_addr()?,
            peer = %socket.peer_addr()?,
            "opened UDP socket",
        );
        Ok(Self { socket })
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf).await
    }
}
