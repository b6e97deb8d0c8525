use std::sync::{
    Arc,
    Mutex,
};

/// Fixed set of frame buffers shared between a device and its sink.
///
/// Buffers handed out as [`FrameBuffer`] go back into the pool when dropped.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(count: usize, buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new((0..count).map(|_| vec![0; buffer_size]).collect()),
            buffer_size,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn free_buffers(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or_default()
    }

    /// Takes a free buffer, or `None` when every buffer is still held by the sink.
    pub fn acquire(self: &Arc<Self>) -> Option<FrameBuffer> {
        let data = self.free.lock().ok()?.pop()?;
        Some(FrameBuffer {
            data: Some(data),
            pool: Arc::clone(self),
        })
    }

    fn requeue(&self, data: Vec<u8>) {
        if let Ok(mut free) = self.free.lock() {
            free.push(data);
        }
    }
}

/// A filled frame buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct FrameBuffer {
    data: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl FrameBuffer {
    pub fn len(&self) -> usize {
        self.data.as_ref().map(Vec::len).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.requeue(data);
        }
    }
}
