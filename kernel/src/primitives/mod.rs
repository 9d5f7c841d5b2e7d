//! Terminal execution primitives
//!
//! The only two places the kernel performs real I/O on a caller's behalf:
//! spawning an OS process, or issuing an HTTP request. Everything above
//! them hands over a fully-resolved request; the primitives add nothing but
//! transport concerns (timeouts, retries, capture limits, streaming).

pub mod http;
pub mod subprocess;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Destination for streamed output (HTTP bodies, subprocess stdout)
///
/// Chunks are delivered in order and the primitive awaits each write, so a
/// slow sink backpressures the stream instead of growing a buffer.
#[async_trait]
pub trait OutputSink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()>;
}

/// Sink collecting chunks into memory, for tests and small transfers
#[derive(Clone, Default)]
pub struct CollectSink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().expect("collect sink lock poisoned").clone()
    }
}

#[async_trait]
impl OutputSink for CollectSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.buffer
            .lock()
            .expect("collect sink lock poisoned")
            .extend_from_slice(chunk);
        Ok(())
    }
}
