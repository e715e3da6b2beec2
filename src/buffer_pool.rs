use std::sync::{Arc, Mutex};

/// Size of one relay staging buffer. Reads complete with at most this many
/// bytes before the data is handed to the opposite side's write queue.
pub const STAGING_BUF_SIZE: usize = 16_384;

const MAX_POOL_SIZE: usize = 100;

/// Pool of relay staging buffers shared by all connections of a proxy.
///
/// The lock is only held for a push or pop, never across I/O.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(MAX_POOL_SIZE)),
        }
    }

    /// Get a buffer from the pool or allocate a fresh one.
    pub fn get(&self) -> Vec<u8> {
        let recycled = self.buffers.lock().expect("pool lock").pop();

        match recycled {
            Some(buffer) => {
                debug_assert_eq!(buffer.len(), STAGING_BUF_SIZE);
                buffer
            }
            None => vec![0u8; STAGING_BUF_SIZE],
        }
    }

    /// Return a buffer for reuse. Buffers that were resized or swapped out
    /// for something with the wrong capacity are dropped instead of pooled.
    pub fn put(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() < STAGING_BUF_SIZE || buffer.capacity() > STAGING_BUF_SIZE * 2 {
            return;
        }

        // Zero on return to avoid leaking tunnel data between connections
        buffer.clear();
        buffer.resize(STAGING_BUF_SIZE, 0);

        let mut pool = self.buffers.lock().expect("pool lock");
        if pool.len() < MAX_POOL_SIZE {
            pool.push(buffer);
        }
    }

    /// Number of buffers currently available for reuse.
    pub fn available(&self) -> usize {
        self.buffers.lock().expect("pool lock").len()
    }
}

/// RAII lease that returns its buffer to the pool on drop. Holds the pool by
/// `Arc` so a lease can live inside a spawned connection task.
#[derive(Debug)]
pub struct BufferLease {
    pool: Arc<BufferPool>,
    buffer: Option<Vec<u8>>,
}

impl BufferLease {
    pub fn new(pool: &Arc<BufferPool>) -> Self {
        Self {
            pool: Arc::clone(pool),
            buffer: Some(pool.get()),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer
            .as_mut()
            .expect("buffer should be present")
            .as_mut_slice()
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.put(buffer);
        }
    }
}
