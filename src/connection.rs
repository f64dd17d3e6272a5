use crate::buffers::buffer_pool::PacketBufferPool;
use crate::buffers::fixed_buffer::FixedBuf;
use crate::config::{RedgramConfig, ACK_BITSET_SIZE};
use crate::error::ConnectionError;
use crate::handler::{ErrorHandler, PacketHandler};
use crate::packet_header::PacketHeader;
use crate::send_pipeline::SendPipeline;
use crate::seq::seq_gt;
use crate::window::SequenceBuffer;
use anyhow::Context;
use bytes::BufMut;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, trace, warn};

/// State of one reliable packet retained in the send window.
#[derive(Default)]
struct SendEntry {
    /// Serialized packet (header + payload), kept until the entry is acked.
    buf: Option<FixedBuf>,
    acked: bool,
    /// Time of the most recent transmission, initial or retransmit.
    written: Option<Instant>,
    resent: u32,
}

impl SendEntry {
    fn should_resend(&self, now: Instant, resend_timeout: Duration) -> bool {
        !self.acked
            && self
                .written
                .is_some_and(|written| now.duration_since(written) >= resend_timeout)
    }
}

struct ConnectionInner {
    closed: bool,

    /// next sequence to assign on send
    wi: u16,
    /// next expected receive sequence
    ri: u16,
    /// oldest send sequence not yet acked
    oui: u16,
    /// oldest receive sequence not yet reported in an outbound ack
    lui: u16,

    last_send: Instant,

    send_window: SequenceBuffer<SendEntry>,
    receive_window: SequenceBuffer<()>,
}

impl ConnectionInner {
    /// True iff assigning one more send sequence keeps the in-flight window
    /// within the peer's receive window (windows are configured symmetrically).
    fn has_write_room(&self, read_buffer_size: usize) -> bool {
        !seq_gt(
            self.wi.wrapping_add(1),
            self.oui.wrapping_add(read_buffer_size as u16),
        )
    }

    fn next_write_index(&mut self) -> u16 {
        let idx = self.wi;
        self.wi = self.wi.wrapping_add(1);
        idx
    }

    fn next_ack_details(&self) -> (u16, u32) {
        let ack = self.ri.wrapping_sub(1);
        (ack, self.prepare_ack_bits(ack))
    }

    /// Bit `k` is set iff sequence `ack - k` has been received.
    fn prepare_ack_bits(&self, ack: u16) -> u32 {
        let mut ack_bits = 0u32;
        for k in 0..ACK_BITSET_SIZE {
            if self.receive_window.contains(ack.wrapping_sub(k)) {
                ack_bits |= 1 << k;
            }
        }
        ack_bits
    }

    /// Mark every sequence reported by `(ack, ack_bits)` acked in the send
    /// window, releasing its retained buffer. Stale and already-acked slots
    /// are ignored, so this is idempotent.
    fn apply_ack_bits(&mut self, ack: u16, mut ack_bits: u32, pool: &PacketBufferPool) {
        for k in 0..ACK_BITSET_SIZE {
            if ack_bits & 1 == 1 {
                let sequence = ack.wrapping_sub(k);
                if let Some(entry) = self.send_window.get_mut(sequence) {
                    if !entry.acked {
                        if let Some(buf) = entry.buf.take() {
                            pool.put(buf);
                        }
                        entry.acked = true;
                    }
                }
            }
            ack_bits >>= 1;
        }
    }

    /// Record an inbound reliable sequence. Returns false for duplicates.
    fn track_read(&mut self, sequence: u16) -> bool {
        if self.receive_window.contains(sequence) {
            return false;
        }

        if seq_gt(sequence.wrapping_add(1), self.ri) {
            // advancing past a gap: stale tags in the skipped slots must not
            // masquerade as received after the window wraps
            self.receive_window.clear_range(self.ri, sequence);
            self.ri = sequence.wrapping_add(1);
        }

        self.receive_window.insert(sequence, ());
        true
    }

    /// The peer is about to be told of receipts up to `ack`, so everything
    /// received contiguously from `lui` no longer needs a standalone report.
    fn track_acked(&mut self, ack: u16) {
        while self.lui <= ack && self.receive_window.contains(self.lui) {
            self.lui = self.lui.wrapping_add(1);
        }
        self.last_send = Instant::now();
    }

    /// Advance `oui` past contiguously acked entries.
    fn advance_oui(&mut self) {
        while self.send_window.get(self.oui).is_some_and(|entry| entry.acked) {
            self.oui = self.oui.wrapping_add(1);
        }
    }
}

struct ConnectionShared {
    config: Arc<RedgramConfig>,
    peer_addr: SocketAddr,
    send_pipeline: Arc<SendPipeline>,
    pool: Arc<PacketBufferPool>,
    packet_handler: Option<Arc<dyn PacketHandler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,

    /// single lock over all mutable connection state
    inner: Mutex<ConnectionInner>,
    /// writers park here until window room exists or the connection closes;
    /// notified on every `oui` advance and on close
    writer_gate: Notify,
    exit: watch::Sender<bool>,
}

/// A reliable ordered datagram connection to a single remote peer.
///
/// Reliable writes are retained in a ring-buffered send window and
/// retransmitted until the peer reports receipt through the ack bitset every
/// packet piggybacks; unordered writes bypass the window entirely. Inbound
/// packets are fed in by the endpoint's receive loop via [`Connection::read`].
pub struct Connection {
    shared: Arc<ConnectionShared>,
    retransmit_handle: Option<JoinHandle<()>>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.retransmit_handle.take() {
            handle.abort();
        }
    }
}

impl Connection {
    pub fn new(
        config: Arc<RedgramConfig>,
        peer_addr: SocketAddr,
        send_pipeline: Arc<SendPipeline>,
        pool: Arc<PacketBufferPool>,
        packet_handler: Option<Arc<dyn PacketHandler>>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
    ) -> Connection {
        let inner = ConnectionInner {
            closed: false,
            wi: 0,
            ri: 0,
            oui: 0,
            lui: 0,
            last_send: Instant::now(),
            send_window: SequenceBuffer::new(config.write_buffer_size),
            receive_window: SequenceBuffer::new(config.read_buffer_size),
        };

        Connection {
            shared: Arc::new(ConnectionShared {
                config,
                peer_addr,
                send_pipeline,
                pool,
                packet_handler,
                error_handler,
                inner: Mutex::new(inner),
                writer_gate: Notify::new(),
                exit: watch::channel(false).0,
            }),
            retransmit_handle: None,
        }
    }

    /// Start the periodic retransmission task. It runs until [`Connection::close`].
    pub fn spawn_retransmit_loop(&mut self) {
        if self.retransmit_handle.is_some() {
            warn!("retransmit loop already spawned");
            return;
        }
        self.retransmit_handle = Some(tokio::spawn(ConnectionShared::retransmit_loop(
            self.shared.clone(),
        )));
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.inner.lock().await.closed
    }

    /// Time data was last sent towards the peer, for idle housekeeping.
    pub async fn last_send(&self) -> Instant {
        self.shared.inner.lock().await.last_send
    }

    /// Send a payload with delivery guaranteed by retransmission. Suspends
    /// while the send window has no room relative to the oldest unacked
    /// packet; fails with [`ConnectionError::Closed`] once closed.
    pub async fn write_reliable(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        self.shared.write_packet(true, payload).await
    }

    /// Send a payload best-effort: no send-window slot, no retransmission.
    /// The packet still piggybacks the current ack state.
    pub async fn write_unreliable(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        self.shared.write_packet(false, payload).await
    }

    /// Process one inbound packet, already parsed by the endpoint.
    pub async fn read(&self, header: PacketHeader, payload: &[u8]) -> anyhow::Result<()> {
        self.shared.read(header, payload).await
    }

    /// Close the connection: stop the retransmit loop, wake blocked writers
    /// (they fail with [`ConnectionError::Closed`]), release retained buffers.
    /// Idempotent.
    pub async fn close(&self) {
        self.shared.close().await;
    }
}

impl ConnectionShared {
    async fn write_packet(&self, reliable: bool, payload: &[u8]) -> Result<(), ConnectionError> {
        let max_payload = self.config.max_packet_size - PacketHeader::SERIALIZED_LEN;
        if payload.len() > max_payload {
            return Err(ConnectionError::PayloadTooLarge {
                len: payload.len(),
                max: max_payload,
            });
        }

        let (sequence, ack, ack_bits) = if reliable {
            self.next_write_details().await?
        } else {
            let inner = self.inner.lock().await;
            if inner.closed {
                return Err(ConnectionError::Closed);
            }
            let (ack, ack_bits) = inner.next_ack_details();
            // unordered packets never draw from `wi`; their sequence field is
            // opaque to both windows
            (0, ack, ack_bits)
        };

        self.track_acked(ack).await;

        let header = PacketHeader {
            sequence,
            ack,
            ack_bits,
            unordered: !reliable,
            empty: false,
        };
        trace!(
            "send to {:?}: seq={} ack={} ack_bits={:#034b} reliable={}",
            self.peer_addr,
            sequence,
            ack,
            ack_bits,
            reliable
        );
        self.write(header, payload).await
    }

    /// Wait until the send window has room (or the connection closes), then
    /// claim the next sequence along with the ack state to piggyback.
    async fn next_write_details(&self) -> Result<(u16, u16, u32), ConnectionError> {
        let mut gate = pin!(self.writer_gate.notified());
        loop {
            // enable before checking the predicate so a notify between the
            // check and the await cannot be lost
            gate.as_mut().enable();
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(ConnectionError::Closed);
                }
                if inner.has_write_room(self.config.read_buffer_size) {
                    let idx = inner.next_write_index();
                    let (ack, ack_bits) = inner.next_ack_details();
                    return Ok((idx, ack, ack_bits));
                }
            }
            gate.as_mut().await;
            gate.set(self.writer_gate.notified());
        }
    }

    async fn track_acked(&self, ack: u16) {
        self.inner.lock().await.track_acked(ack);
    }

    async fn track_unacked(&self) {
        self.inner.lock().await.advance_oui();
        self.writer_gate.notify_waiters();
    }

    /// Serialize and transmit one packet. Reliable (non-empty) packets are
    /// installed in the send window for retransmission; everything else is
    /// recycled right after the transmit. EOF-like transport failures are
    /// swallowed - the retransmit loop or a later write will retry.
    async fn write(&self, header: PacketHeader, payload: &[u8]) -> Result<(), ConnectionError> {
        let mut buf = self.pool.get();
        header.ser(&mut buf);
        buf.put_slice(payload);

        let result = self.send_pipeline.transmit(self.peer_addr, buf.as_ref()).await;

        if header.unordered || header.empty {
            self.pool.put(buf);
        } else {
            self.track_write(header.sequence, buf).await;
        }

        match result {
            Err(e) if e.is_eof_like() => Ok(()),
            other => other,
        }
    }

    async fn track_write(&self, idx: u16, buf: FixedBuf) {
        let mut inner = self.inner.lock().await;

        if inner.closed {
            // teardown already drained the window; nothing may be retained
            self.pool.put(buf);
            return;
        }

        if seq_gt(idx.wrapping_add(1), inner.wi) {
            // an externally assigned sequence moved the high-water mark: clear
            // the skipped slots before they can alias wrapped sequences
            let wi = inner.wi;
            inner.send_window.clear_range(wi, idx);
            inner.wi = idx.wrapping_add(1);
        }

        let displaced = inner.send_window.insert(
            idx,
            SendEntry {
                buf: Some(buf),
                acked: false,
                written: Some(Instant::now()),
                resent: 0,
            },
        );
        if let Some(old) = displaced.buf {
            self.pool.put(old);
        }
    }

    async fn read(&self, header: PacketHeader, payload: &[u8]) -> anyhow::Result<()> {
        trace!(
            "recv from {:?}: seq={} ack={} ack_bits={:#034b} unordered={} empty={}",
            self.peer_addr,
            header.sequence,
            header.ack,
            header.ack_bits,
            header.unordered,
            header.empty
        );

        {
            let mut inner = self.inner.lock().await;
            inner.apply_ack_bits(header.ack, header.ack_bits, &self.pool);

            if !header.unordered && !inner.track_read(header.sequence) {
                trace!("dropping duplicate packet {}", header.sequence);
                return Ok(());
            }
        }

        self.track_unacked().await;

        self.write_acks_if_necessary()
            .await
            .context("failed to write acks when necessary")?;

        if header.empty {
            return Ok(());
        }

        if let Some(packet_handler) = &self.packet_handler {
            packet_handler
                .on_packet(self.peer_addr, header.sequence, payload)
                .await;
        }
        Ok(())
    }

    /// Emit standalone acks while full bitset windows of receipts have
    /// accumulated with no outbound traffic to piggyback them on. Looping
    /// drains several filled windows in one pass.
    async fn write_acks_if_necessary(&self) -> Result<(), ConnectionError> {
        while let Some(header) = self.create_ack_if_necessary().await {
            debug!(
                "standalone ack to {:?}: seq={} ack={} ack_bits={:#034b}",
                self.peer_addr, header.sequence, header.ack, header.ack_bits
            );
            self.write(header, &[]).await?;
        }
        Ok(())
    }

    async fn create_ack_if_necessary(&self) -> Option<PacketHeader> {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return None;
            }

            for k in 0..ACK_BITSET_SIZE {
                if !inner.receive_window.contains(inner.lui.wrapping_add(k)) {
                    return None;
                }
            }

            inner.lui = inner.lui.wrapping_add(ACK_BITSET_SIZE);
            inner.last_send = Instant::now();
        }

        // the standalone ack consumes a send sequence (but no slot), so it is
        // subject to the writer gate like any reliable write
        let mut gate = pin!(self.writer_gate.notified());
        loop {
            gate.as_mut().enable();
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return None;
                }
                if inner.has_write_room(self.config.read_buffer_size) {
                    let sequence = inner.next_write_index();
                    let ack = inner.lui.wrapping_sub(1);
                    let ack_bits = inner.prepare_ack_bits(ack);
                    return Some(PacketHeader {
                        sequence,
                        ack,
                        ack_bits,
                        unordered: false,
                        empty: true,
                    });
                }
            }
            gate.as_mut().await;
            gate.set(self.writer_gate.notified());
        }
    }

    async fn retransmit_loop(shared: Arc<ConnectionShared>) {
        let mut exit = shared.exit.subscribe();
        let mut ticker = interval_at(
            Instant::now() + shared.config.update_period,
            shared.config.update_period,
        );

        loop {
            if *exit.borrow_and_update() {
                debug!("retransmit loop for {:?} exiting", shared.peer_addr);
                return;
            }

            select! {
                _ = exit.changed() => {}
                _ = ticker.tick() => {
                    if let Err(e) = shared.retransmit_unacked_packets().await {
                        if let Some(error_handler) = &shared.error_handler {
                            error_handler.on_transmit_error(shared.peer_addr, e).await;
                        }
                    }
                }
            }
        }
    }

    /// Walk the send window from `oui` and retransmit entries whose last
    /// transmission has aged past the resend timeout. An EOF-like transport
    /// error aborts the pass cleanly; any other error terminates the pass and
    /// is reported to the error handler. The lock is held across the pass.
    async fn retransmit_unacked_packets(&self) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;

        let now = Instant::now();
        let oui = inner.oui;

        for k in 0..inner.send_window.len() {
            let sequence = oui.wrapping_add(k as u16);
            let Some(entry) = inner.send_window.get_mut(sequence) else {
                continue;
            };
            if !entry.should_resend(now, self.config.resend_timeout) {
                continue;
            }
            let Some(buf) = entry.buf.as_ref() else {
                continue;
            };

            trace!("resend to {:?}: seq={}", self.peer_addr, sequence);

            match self.send_pipeline.transmit(self.peer_addr, buf.as_ref()).await {
                Ok(()) => {
                    entry.written = Some(Instant::now());
                    entry.resent += 1;
                }
                Err(e) if e.is_eof_like() => break,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;

        for entry in inner.send_window.items_mut() {
            if let Some(buf) = entry.buf.take() {
                self.pool.put(buf);
            }
        }

        let _ = self.exit.send(true);
        self.writer_gate.notify_waiters();

        debug!("connection to {:?} closed", self.peer_addr);
    }
}
