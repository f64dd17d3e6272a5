use crate::error::ConnectionError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::net::SocketAddr;

/// Application callback for accepted non-empty packets. Invoked with no
/// connection lock held, in arrival order for non-duplicate packets.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    async fn on_packet(&self, from: SocketAddr, sequence: u16, payload: &[u8]);
}

/// Callback for non-EOF-like retransmission failures. The failed entry stays
/// live and is retried on the next tick.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn on_transmit_error(&self, addr: SocketAddr, error: ConnectionError);
}
