//! Output device abstraction
//!
//! The buffer queue talks to hardware only through these traits. A device
//! creates one `OutputQueue` per session; the queue allocates fixed-capacity
//! buffers, plays the ones it is given, and hands each buffer back through
//! the session's `CompletionHandler` once its content has been consumed.
//!
//! Ownership follows the buffer: `enqueue` moves a `QueueBuffer` into the
//! device, the completion handler moves it back. The `BufferId` stays
//! stable for the buffer's whole life.

use crate::audio::format::{PacketDescriptor, StreamFormat};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Identity of a queue buffer, assigned by the device at allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Fixed-capacity byte buffer cycled between the session and the device
#[derive(Debug)]
pub struct QueueBuffer {
    id: BufferId,
    data: Box<[u8]>,
    fill: usize,
}

impl QueueBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes
    pub fn new(id: BufferId, capacity: usize) -> Self {
        Self {
            id,
            data: vec![0u8; capacity].into_boxed_slice(),
            fill: 0,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Capacity fixed at allocation
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes of valid audio data
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// Set the number of valid bytes after a refill
    pub fn set_fill(&mut self, fill: usize) -> Result<()> {
        if fill > self.data.len() {
            return Err(Error::SourceRead(format!(
                "Source reported {} bytes for a {}-byte {}",
                fill,
                self.data.len(),
                self.id
            )));
        }
        self.fill = fill;
        Ok(())
    }

    /// Whole writable region, regardless of current fill
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Valid audio bytes
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.fill]
    }
}

/// Callback the device invokes when a buffer has finished playing
///
/// Invoked from the device's own callback context, never from inside an
/// `OutputQueue` method call.
pub type CompletionHandler = Arc<dyn Fn(QueueBuffer) + Send + Sync>;

/// An enqueue the device refused; the buffer comes back with the error
#[derive(Debug)]
pub struct EnqueueRejected {
    pub buffer: QueueBuffer,
    pub error: Error,
}

/// Factory for output queues
pub trait AudioDevice {
    /// Create a queue able to play `format`, reporting completions to
    /// `on_complete`.
    fn create_queue(
        &self,
        format: &StreamFormat,
        on_complete: CompletionHandler,
    ) -> Result<Box<dyn OutputQueue>>;
}

/// One playback queue owned by a session
///
/// Implementations must not call the completion handler synchronously from
/// any of these methods; the session holds its lock while calling them.
pub trait OutputQueue: Send {
    /// Allocate a buffer of `capacity` bytes with a fresh identity
    fn allocate_buffer(&mut self, capacity: usize) -> Result<QueueBuffer>;

    /// Queue a filled buffer for playback.
    ///
    /// `descriptors` is empty for constant-bitrate formats.
    fn enqueue(
        &mut self,
        buffer: QueueBuffer,
        descriptors: &[PacketDescriptor],
    ) -> std::result::Result<(), EnqueueRejected>;

    /// Hand the codec configuration blob to the device
    fn set_codec_config(&mut self, config: &[u8]) -> Result<()>;

    /// Output gain, 0.0 - 1.0
    fn set_gain(&mut self, gain: f32) -> Result<()>;

    /// Begin consuming enqueued buffers
    fn start(&mut self) -> Result<()>;

    /// Stop playback.
    ///
    /// `immediate == false` keeps playing what is already enqueued and stops
    /// once it has drained; `true` stops now.
    fn stop(&mut self, immediate: bool) -> Result<()>;

    /// Release the queue and every buffer it still holds
    fn dispose(&mut self) -> Result<()>;
}
