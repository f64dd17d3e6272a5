use crate::buffers::fixed_buffer::FixedBuf;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Pool of packet buffers shared by all connections of an endpoint. Serialized
/// outbound packets are allocated here and returned when their slot is acked,
/// overwritten, or torn down.
pub struct PacketBufferPool {
    buf_size: usize,
    buffers: Mutex<Vec<FixedBuf>>,
}

impl PacketBufferPool {
    pub fn new(buf_size: usize, max_pool_size: usize) -> PacketBufferPool {
        PacketBufferPool {
            buf_size,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
        }
    }

    pub fn get(&self) -> FixedBuf {
        {
            let mut buffers = self.buffers.lock().unwrap();
            if let Some(buffer) = buffers.pop() {
                trace!("returning buffer from pool");
                return buffer;
            }
        }

        debug!("no buffer in pool: creating new buffer");
        FixedBuf::new(self.buf_size)
    }

    pub fn put(&self, mut buffer: FixedBuf) {
        assert_eq!(
            buffer.capacity(),
            self.buf_size,
            "returned buffer does not have the pool's capacity of {} bytes",
            self.buf_size
        );

        buffer.clear();

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.capacity() > buffers.len() {
            trace!("returning buffer to pool");
            buffers.push(buffer);
        } else {
            debug!("pool is full: discarding returned buffer");
        }
    }

    #[cfg(test)]
    pub fn pooled_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}
