//! Output device driven by the test
//!
//! Enqueued buffers wait in a FIFO until the test calls `complete_next`,
//! which hands the oldest one back through the session's completion handler
//! the same way a real device's callback context would.

use aqp_player::audio::{
    AudioDevice, BufferId, CompletionHandler, EnqueueRejected, OutputQueue, PacketDescriptor,
    QueueBuffer, StreamFormat,
};
use aqp_player::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct EnqueueRecord {
    pub buffer: BufferId,
    pub bytes: usize,
    pub descriptors: Vec<PacketDescriptor>,
    /// First data byte, which the mock source sets to the packet index
    pub first_byte: Option<u8>,
}

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub queues_created: usize,
    pub buffers_allocated: usize,
    pub enqueues: Vec<EnqueueRecord>,
    pub codec_config: Option<Vec<u8>>,
    pub gain: Option<f32>,
    pub starts: usize,
    /// `immediate` flag of every stop call
    pub stops: Vec<bool>,
    pub disposals: usize,
}

#[derive(Default)]
struct DeviceState {
    log: DeviceLog,
    handler: Option<CompletionHandler>,
    in_flight: VecDeque<QueueBuffer>,
    fail_enqueue_at: Option<usize>,
    enqueue_calls: usize,
}

/// Cheap to clone; every clone observes the same queue
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `call`-th enqueue (0-based) fail with a device error
    pub fn failing_enqueue_at(self, call: usize) -> Self {
        self.state.lock().unwrap().fail_enqueue_at = Some(call);
        self
    }

    /// Inspect the call log
    pub fn with_log<R>(&self, f: impl FnOnce(&DeviceLog) -> R) -> R {
        f(&self.state.lock().unwrap().log)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    /// Finish the oldest queued buffer. Returns false when nothing is queued.
    pub fn complete_next(&self) -> bool {
        let (buffer, handler) = {
            let mut state = self.state.lock().unwrap();
            let Some(buffer) = state.in_flight.pop_front() else {
                return false;
            };
            (buffer, state.handler.clone())
        };
        // Called with no mock lock held; the handler re-enters via enqueue
        if let Some(handler) = handler {
            handler(buffer);
        }
        true
    }

    /// Complete buffers until the queue stays empty; returns how many
    pub fn complete_all(&self) -> usize {
        let mut completed = 0;
        while self.complete_next() {
            completed += 1;
        }
        completed
    }
}

impl AudioDevice for MockDevice {
    fn create_queue(
        &self,
        _format: &StreamFormat,
        on_complete: CompletionHandler,
    ) -> Result<Box<dyn OutputQueue>> {
        let mut state = self.state.lock().unwrap();
        state.log.queues_created += 1;
        state.handler = Some(on_complete);
        Ok(Box::new(MockQueue {
            state: Arc::clone(&self.state),
            next_id: 0,
        }))
    }
}

struct MockQueue {
    state: Arc<Mutex<DeviceState>>,
    next_id: usize,
}

impl OutputQueue for MockQueue {
    fn allocate_buffer(&mut self, capacity: usize) -> Result<QueueBuffer> {
        self.state.lock().unwrap().log.buffers_allocated += 1;
        let buffer = QueueBuffer::new(BufferId(100 + self.next_id), capacity);
        self.next_id += 1;
        Ok(buffer)
    }

    fn enqueue(
        &mut self,
        buffer: QueueBuffer,
        descriptors: &[PacketDescriptor],
    ) -> std::result::Result<(), EnqueueRejected> {
        let mut state = self.state.lock().unwrap();
        let call = state.enqueue_calls;
        state.enqueue_calls += 1;
        if state.fail_enqueue_at == Some(call) {
            return Err(EnqueueRejected {
                buffer,
                error: Error::Device("injected enqueue failure".to_string()),
            });
        }

        state.log.enqueues.push(EnqueueRecord {
            buffer: buffer.id(),
            bytes: buffer.fill(),
            descriptors: descriptors.to_vec(),
            first_byte: buffer.filled().first().copied(),
        });
        state.in_flight.push_back(buffer);
        Ok(())
    }

    fn set_codec_config(&mut self, config: &[u8]) -> Result<()> {
        self.state.lock().unwrap().log.codec_config = Some(config.to_vec());
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) -> Result<()> {
        self.state.lock().unwrap().log.gain = Some(gain);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.state.lock().unwrap().log.starts += 1;
        Ok(())
    }

    fn stop(&mut self, immediate: bool) -> Result<()> {
        self.state.lock().unwrap().log.stops.push(immediate);
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.disposals += 1;
        state.in_flight.clear();
        state.handler = None;
        Ok(())
    }
}
