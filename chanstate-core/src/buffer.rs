//! Network buffers handed to the channel-state write path.
//!
//! A [`Buffer`] is owned by exactly one party at a time and goes back to its recycler exactly
//! once: [`Buffer::recycle`] consumes the buffer, so a second recycle does not compile. A buffer
//! that is dropped without being recycled is still returned, but reported as leaked.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Kind of content a network buffer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Serialized records.
    DataBuffer,
    /// Serialized in-band event (end of partition, barrier, ...).
    EventBuffer,
    /// Event that overtakes data in the channel.
    PriorityEvent,
}

impl DataType {
    pub fn is_buffer(self) -> bool {
        matches!(self, DataType::DataBuffer)
    }
}

/// Receives memory segments of buffers that are released.
pub trait BufferRecycler: Send + Sync {
    fn recycle(&self, segment: Vec<u8>);

    /// Called for a buffer dropped without being recycled.
    fn reclaim_leaked(&self, segment: Vec<u8>) {
        self.recycle(segment);
    }
}

pub struct Buffer {
    data: Vec<u8>,
    data_type: DataType,
    recycler: Option<Arc<dyn BufferRecycler>>,
}

impl Buffer {
    pub fn new(data: Vec<u8>, data_type: DataType, recycler: Arc<dyn BufferRecycler>) -> Self {
        Self {
            data,
            data_type,
            recycler: Some(recycler),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Whether this buffer carries data rather than an event.
    pub fn is_buffer(&self) -> bool {
        self.data_type.is_buffer()
    }

    pub fn readable_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Return the memory segment to its recycler.
    pub fn recycle(mut self) {
        if let Some(recycler) = self.recycler.take() {
            recycler.recycle(std::mem::take(&mut self.data));
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("data_type", &self.data_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(recycler) = self.recycler.take() {
            tracing::warn!(
                data_type = ?self.data_type,
                len = self.data.len(),
                "buffer dropped without being recycled"
            );
            recycler.reclaim_leaked(std::mem::take(&mut self.data));
        }
    }
}

#[derive(Default)]
struct PoolState {
    free_segments: Mutex<Vec<Vec<u8>>>,
    requested: AtomicUsize,
    recycled: AtomicUsize,
    leaked: AtomicUsize,
}

impl PoolState {
    fn return_segment(&self, mut segment: Vec<u8>) {
        segment.clear();
        self.free_segments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(segment);
    }
}

impl BufferRecycler for PoolState {
    fn recycle(&self, segment: Vec<u8>) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
        self.return_segment(segment);
    }

    fn reclaim_leaked(&self, segment: Vec<u8>) {
        self.leaked.fetch_add(1, Ordering::SeqCst);
        self.return_segment(segment);
    }
}

/// Pool of network buffers that keeps count of every buffer it handed out.
#[derive(Clone, Default)]
pub struct NetworkBufferPool {
    state: Arc<PoolState>,
}

impl NetworkBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a data buffer holding a copy of `payload`.
    pub fn request_buffer(&self, payload: &[u8]) -> Buffer {
        self.request(payload, DataType::DataBuffer)
    }

    /// Request an event buffer holding a copy of `payload`.
    pub fn request_event(&self, payload: &[u8]) -> Buffer {
        self.request(payload, DataType::EventBuffer)
    }

    pub fn request(&self, payload: &[u8], data_type: DataType) -> Buffer {
        let mut segment = self
            .state
            .free_segments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        segment.extend_from_slice(payload);
        self.state.requested.fetch_add(1, Ordering::SeqCst);
        let recycler: Arc<dyn BufferRecycler> = self.state.clone();
        Buffer::new(segment, data_type, recycler)
    }

    pub fn requested(&self) -> usize {
        self.state.requested.load(Ordering::SeqCst)
    }

    pub fn recycled(&self) -> usize {
        self.state.recycled.load(Ordering::SeqCst)
    }

    pub fn leaked(&self) -> usize {
        self.state.leaked.load(Ordering::SeqCst)
    }

    /// Buffers handed out and not yet returned, recycled or leaked.
    pub fn outstanding(&self) -> usize {
        self.requested() - self.recycled() - self.leaked()
    }
}

#[cfg(test)]
#[path = "tests/buffer_tests.rs"]
mod tests;
