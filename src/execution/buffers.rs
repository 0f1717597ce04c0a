use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::memory::{SCRATCH_BUFFER_CAPACITY, SCRATCH_POOL_SIZE};

/// Reusable byte buffers for fingerprint computation
///
/// Buffers that grew past four times the base capacity are dropped on return
/// instead of being pooled.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_capacity: usize,
    max_pooled: usize,
    reused: AtomicU64,
    allocated: AtomicU64,
}

impl BufferPool {
    pub fn new(buffer_capacity: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            buffer_capacity,
            max_pooled,
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// Run `f` with a cleared scratch buffer
    pub fn with_buffer<T>(&self, f: impl FnOnce(&mut Vec<u8>) -> T) -> T {
        let pooled = self.buffers.lock().pop();
        let mut buffer = match pooled {
            Some(buffer) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.buffer_capacity)
            }
        };
        buffer.clear();

        let output = f(&mut buffer);

        if buffer.capacity() <= self.buffer_capacity * 4 {
            let mut buffers = self.buffers.lock();
            if buffers.len() < self.max_pooled {
                buffers.push(buffer);
            }
        }
        output
    }

    /// Release every pooled buffer, returning how many were dropped
    pub fn reset(&self) -> usize {
        let mut buffers = self.buffers.lock();
        let released = buffers.len();
        buffers.clear();
        buffers.shrink_to_fit();
        released
    }

    pub fn pooled(&self) -> usize {
        self.buffers.lock().len()
    }

    /// (reused, freshly allocated) checkouts since creation
    pub fn checkout_counts(&self) -> (u64, u64) {
        (
            self.reused.load(Ordering::Relaxed),
            self.allocated.load(Ordering::Relaxed),
        )
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(SCRATCH_BUFFER_CAPACITY, SCRATCH_POOL_SIZE)
    }
}
