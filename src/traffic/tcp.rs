use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::Transport;

/// TCP stream transport. Writes are flow-controlled and may be partial; the
/// run credits whatever the socket accepted.
pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    const PROTO: &'static str = "tcp";

    async fn connect(target: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(target).await?;
        debug!(
            local = %stream.local_addr()?,
            peer = %stream.peer_addr()?,
            "established TCP connection",
        );
        Ok(Self { stream })
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf).await
    }
}
