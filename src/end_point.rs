use crate::buffers::buffer_pool::PacketBufferPool;
use crate::config::RedgramConfig;
use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::handler::{ErrorHandler, PacketHandler};
use crate::packet_header::PacketHeader;
use crate::send_pipeline::SendPipeline;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// EndPoint is where the parts of the protocol come together: it listens on a
/// UdpSocket, dispatching incoming packets to their per-peer [`Connection`],
/// and has an API for application code to send payloads to any peer.
pub struct EndPoint {
    receive_socket: Arc<UdpSocket>,
    send_pipeline: Arc<SendPipeline>,
    buffer_pool: Arc<PacketBufferPool>,
    config: Arc<RedgramConfig>,
    packet_handler: Option<Arc<dyn PacketHandler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    connections: RwLock<FxHashMap<SocketAddr, Arc<Connection>>>,
    closed: AtomicBool,
}

impl EndPoint {
    pub async fn bind(
        self_addr: SocketAddr,
        config: Arc<RedgramConfig>,
        packet_handler: Option<Arc<dyn PacketHandler>>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
    ) -> anyhow::Result<EndPoint> {
        config.validate()?;

        let receive_socket = Arc::new(UdpSocket::bind(self_addr).await?);
        info!("bound receive socket to {:?}", receive_socket.local_addr()?);

        let buffer_pool = Arc::new(PacketBufferPool::new(
            config.max_packet_size,
            config.buffer_pool_size,
        ));

        Ok(EndPoint {
            send_pipeline: Arc::new(SendPipeline::new(Arc::new(receive_socket.clone()))),
            receive_socket,
            buffer_pool,
            config,
            packet_handler,
            error_handler,
            connections: RwLock::new(FxHashMap::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.send_pipeline.local_addr()
    }

    pub async fn send_reliable(
        &self,
        to_addr: SocketAddr,
        payload: &[u8],
    ) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        self.connection_to(to_addr).await.write_reliable(payload).await
    }

    pub async fn send_unreliable(
        &self,
        to_addr: SocketAddr,
        payload: &[u8],
    ) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        self.connection_to(to_addr).await.write_unreliable(payload).await
    }

    async fn connection_to(&self, peer_addr: SocketAddr) -> Arc<Connection> {
        if let Some(connection) = self.connections.read().await.get(&peer_addr) {
            return connection.clone();
        }

        let mut connections = self.connections.write().await;
        match connections.entry(peer_addr) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                debug!("initializing connection for {:?}", peer_addr);
                let mut connection = Connection::new(
                    self.config.clone(),
                    peer_addr,
                    self.send_pipeline.clone(),
                    self.buffer_pool.clone(),
                    self.packet_handler.clone(),
                    self.error_handler.clone(),
                );
                connection.spawn_retransmit_loop();
                e.insert(Arc::new(connection)).clone()
            }
        }
    }

    /// Receive loop: parses headers and routes packets to their connections.
    /// Runs until the endpoint is closed. Malformed datagrams are dropped.
    pub async fn recv_loop(&self) {
        info!("starting receive loop");

        let mut buf = self.buffer_pool.get();
        loop {
            if self.closed.load(Ordering::Acquire) {
                info!("endpoint closed, stopping receive loop");
                return;
            }

            buf.maximize_len();
            let (num_read, from) = match self.receive_socket.recv_from(buf.as_mut()).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };
            buf.truncate(num_read);

            let mut parse_buf: &[u8] = buf.as_ref();
            let header = match PacketHeader::deser(&mut parse_buf) {
                Ok(header) => header,
                Err(_) => {
                    warn!("received packet with unparsable header from {:?} - dropping", from);
                    continue;
                }
            };

            let connection = self.connection_to(from).await;
            if let Err(e) = connection.read(header, parse_buf).await {
                warn!("failed to process packet from {:?}: {:#}", from, e);
            }
        }
    }

    /// Close every connection and stop the receive loop. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let connections = std::mem::take(&mut *self.connections.write().await);
        for connection in connections.values() {
            connection.close().await;
        }
        info!("endpoint closed");
    }
}
