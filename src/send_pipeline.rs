use crate::error::ConnectionError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

/// Abstraction for sending a datagram to an address, introduced to facilitate
/// mocking the I/O part away for testing. The transport is shared across
/// connections; connections do not own it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    /// Send `packet_buf` to `to`, returning the number of bytes accepted.
    async fn send_to_addr(&self, to: SocketAddr, packet_buf: &[u8]) -> io::Result<usize>;

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn send_to_addr(&self, to: SocketAddr, packet_buf: &[u8]) -> io::Result<usize> {
        trace!("UDP socket: sending packet to {:?}", to);
        self.send_to(packet_buf, to).await
    }

    fn local_addr(&self) -> SocketAddr {
        self.as_ref()
            .local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>) -> SendPipeline {
        SendPipeline { socket }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Send a packet, reporting short writes as errors.
    pub async fn transmit(&self, to: SocketAddr, packet_buf: &[u8]) -> Result<(), ConnectionError> {
        let written = self.socket.send_to_addr(to, packet_buf).await?;
        if written != packet_buf.len() {
            return Err(ConnectionError::ShortWrite {
                written,
                expected: packet_buf.len(),
            });
        }
        Ok(())
    }
}
