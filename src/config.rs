use crate::packet_header::PacketHeader;
use anyhow::bail;
use std::time::Duration;

/// Width of the ack bitset carried in every packet header, and the minimum
/// receive window size.
pub const ACK_BITSET_SIZE: u16 = 32;

pub struct RedgramConfig {
    /// Number of slots in the send window. Reliable packets are retained here
    /// until acked. Must be a nonzero divisor of 65536 so that wrap-around
    /// preserves slot identity.
    pub write_buffer_size: usize,

    /// Number of slots in the receive window, same divisor constraint, and at
    /// least [`ACK_BITSET_SIZE`] so ack bitsets are well-defined.
    ///
    /// The writer gate assumes the peer's receive window has this same size;
    /// deployments must configure both sides symmetrically.
    pub read_buffer_size: usize,

    /// How often the retransmit loop checks for unacked packets.
    pub update_period: Duration,

    /// Minimum age of an unacked packet before it is retransmitted.
    pub resend_timeout: Duration,

    /// Capacity of pooled packet buffers (header plus payload). With full
    /// Ethernet frames and no optional IP headers this is `1500 - 20 - 8`
    /// for IPv4.
    pub max_packet_size: usize,

    /// Number of buffers retained by the pool - buffers in excess of this are
    /// discarded when returned.
    pub buffer_pool_size: usize,
}

impl RedgramConfig {
    pub fn default_ipv4() -> RedgramConfig {
        RedgramConfig {
            write_buffer_size: 256,
            read_buffer_size: 256,
            update_period: Duration::from_millis(10),
            resend_timeout: Duration::from_millis(100),
            max_packet_size: 1472,
            buffer_pool_size: 4096,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.write_buffer_size == 0 || 65536 % self.write_buffer_size != 0 {
            bail!(
                "write buffer size must be a nonzero divisor of 65536, was {}",
                self.write_buffer_size
            );
        }
        if self.read_buffer_size == 0 || 65536 % self.read_buffer_size != 0 {
            bail!(
                "read buffer size must be a nonzero divisor of 65536, was {}",
                self.read_buffer_size
            );
        }
        if self.read_buffer_size < ACK_BITSET_SIZE as usize {
            bail!(
                "read buffer size must be at least {} to cover the ack bitset, was {}",
                ACK_BITSET_SIZE,
                self.read_buffer_size
            );
        }
        if self.update_period.is_zero() {
            bail!("update period must be nonzero");
        }
        if self.resend_timeout.is_zero() {
            bail!("resend timeout must be nonzero");
        }
        if self.max_packet_size <= PacketHeader::SERIALIZED_LEN {
            bail!(
                "max packet size must exceed the {}-byte packet header, was {}",
                PacketHeader::SERIALIZED_LEN,
                self.max_packet_size
            );
        }

        Ok(())
    }
}
