//! A reliable ordered datagram protocol on top of UDP.
//!
//! For each remote peer, an [`end_point::EndPoint`] maintains a
//! [`connection::Connection`] that provides:
//!
//! * reliable delivery of 'reliable' packets with automatic retransmission -
//!   each packet is retained in a fixed-size send window until the peer
//!   reports receipt, and resent whenever its last transmission ages past the
//!   resend timeout
//! * best-effort delivery of 'unordered' packets that bypass the reliability
//!   machinery entirely
//! * acknowledgments piggybacked on every outbound packet as an `(ack,
//!   ack_bits)` pair: the latest received sequence plus a 32-bit mask covering
//!   the 32 sequences ending at it. When a full mask's worth of receipts
//!   accumulates with no outbound traffic to carry it, a standalone
//!   (payload-free) ack packet is emitted instead, bounding ack latency for
//!   one-directional traffic.
//!
//! Sequence numbers are 16 bits with wrap-around; all ordering uses
//! serial-number arithmetic (`a` is after `b` iff `(a - b) mod 2^16` is
//! below half the sequence space). Send and receive state live in ring
//! buffers whose sizes divide 65536, so a slot is reused by exactly the
//! sequences congruent to it and a per-slot sequence tag distinguishes live
//! entries from wrapped-around ones.
//!
//! A reliable write may suspend: the sender never keeps more sequences in
//! flight than the peer's receive window holds (windows are configured
//! symmetrically), so writers wait until the oldest unacked sequence advances
//! or the connection closes.
//!
//! There is no congestion control, fragmentation, encryption, or connection
//! handshake - peers sync up simply by exchanging packets.
//!
//! ## Header
//!
//! Every datagram carries a fixed 9-byte header, numbers in network byte
//! order (BE):
//!
//! ```ascii
//! 0: flags (u8): bit 0 'unordered', bit 1 'empty' (standalone ack)
//! 1: sequence (u16): sender's sequence for this datagram
//! 3: ack (u16): latest receive sequence observed by the sender
//! 5: ack bits (u32): bit k set iff sequence `ack - k` was received
//! ```

pub mod buffers;
pub mod config;
pub mod connection;
pub mod end_point;
pub mod error;
pub mod handler;
pub mod packet_header;
pub mod send_pipeline;

mod seq;
mod window;
