use anyhow::bail;
use bytes::{Buf, BufMut};

/// Header carried by every datagram, all numbers in network byte order (BE):
///
/// ```ascii
/// 0: flags (u8):
///    * bit 0: unordered - best-effort packet, receivers skip window tracking
///    * bit 1: empty - standalone ack without payload, not delivered upward
///    * bit 2-7: unused, must be 0
/// 1: sequence (u16): sender's sequence for this datagram
/// 3: ack (u16): latest receive sequence the sender has observed
/// 5: ack bits (u32): bit k set iff sequence `ack - k` has been received
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u16,
    pub ack: u16,
    pub ack_bits: u32,
    pub unordered: bool,
    pub empty: bool,
}

impl PacketHeader {
    pub const SERIALIZED_LEN: usize = 1 + 2 * size_of::<u16>() + size_of::<u32>();

    const FLAG_UNORDERED: u8 = 1 << 0;
    const FLAG_EMPTY: u8 = 1 << 1;

    pub fn ser(&self, buf: &mut impl BufMut) {
        let mut flags = 0u8;
        if self.unordered {
            flags |= Self::FLAG_UNORDERED;
        }
        if self.empty {
            flags |= Self::FLAG_EMPTY;
        }

        buf.put_u8(flags);
        buf.put_u16(self.sequence);
        buf.put_u16(self.ack);
        buf.put_u32(self.ack_bits);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        let flags = buf.try_get_u8()?;
        if flags & !(Self::FLAG_UNORDERED | Self::FLAG_EMPTY) != 0 {
            bail!("unknown flag bits in packet header: {:#010b}", flags);
        }

        let sequence = buf.try_get_u16()?;
        let ack = buf.try_get_u16()?;
        let ack_bits = buf.try_get_u32()?;

        Ok(PacketHeader {
            sequence,
            ack,
            ack_bits,
            unordered: flags & Self::FLAG_UNORDERED != 0,
            empty: flags & Self::FLAG_EMPTY != 0,
        })
    }
}
