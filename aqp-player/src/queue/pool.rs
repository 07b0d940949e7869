//! Fixed pool of queue buffers
//!
//! Exactly N buffers are allocated from the device once, tracked in an arena
//! by `BufferId`, and released together at cleanup. A buffer is either held
//! by the pool (Idle), out for refill under the session lock (Refilling), or
//! owned by the device (Enqueued).

use crate::audio::device::{BufferId, OutputQueue, QueueBuffer};
use crate::error::{Error, Result};
use tracing::debug;

/// Where a pool buffer currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Idle,
    Refilling,
    Enqueued,
}

#[derive(Debug)]
enum Slot {
    Idle(QueueBuffer),
    Refilling,
    Enqueued,
}

impl Slot {
    fn state(&self) -> BufferState {
        match self {
            Slot::Idle(_) => BufferState::Idle,
            Slot::Refilling => BufferState::Refilling,
            Slot::Enqueued => BufferState::Enqueued,
        }
    }
}

#[derive(Debug, Default)]
pub struct BufferPool {
    ids: Vec<BufferId>,
    slots: Vec<Slot>,
    buffer_size: usize,
}

impl BufferPool {
    /// Allocate `count` buffers of `buffer_size` bytes from the queue
    pub fn allocate(queue: &mut dyn OutputQueue, count: usize, buffer_size: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::Configuration(
                "Buffer pool needs at least one buffer".to_string(),
            ));
        }

        let mut ids = Vec::with_capacity(count);
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let buffer = queue.allocate_buffer(buffer_size)?;
            if buffer.capacity() != buffer_size {
                return Err(Error::Device(format!(
                    "Device allocated {} bytes for {}, expected {}",
                    buffer.capacity(),
                    buffer.id(),
                    buffer_size
                )));
            }
            if ids.contains(&buffer.id()) {
                return Err(Error::Device(format!(
                    "Device returned duplicate {}",
                    buffer.id()
                )));
            }
            ids.push(buffer.id());
            slots.push(Slot::Idle(buffer));
        }

        debug!("Allocated {} queue buffers of {} bytes", count, buffer_size);
        Ok(Self {
            ids,
            slots,
            buffer_size,
        })
    }

    /// Buffer identities in allocation order
    pub fn ids(&self) -> &[BufferId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Capacity shared by every buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Slot index of `id` in allocation order
    pub fn index_of(&self, id: BufferId) -> Option<usize> {
        self.ids.iter().position(|candidate| *candidate == id)
    }

    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.index_of(id).map(|index| self.slots[index].state())
    }

    /// Buffers currently owned by the device
    pub fn enqueued_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Enqueued))
            .count()
    }

    /// Take an idle buffer out for refill
    pub fn checkout(&mut self, id: BufferId) -> Result<QueueBuffer> {
        let index = self.slot_index(id)?;
        match std::mem::replace(&mut self.slots[index], Slot::Refilling) {
            Slot::Idle(buffer) => Ok(buffer),
            other => {
                let state = other.state();
                self.slots[index] = other;
                Err(Error::InvalidState(format!(
                    "{} is {:?}, cannot refill it",
                    id, state
                )))
            }
        }
    }

    /// Record that a checked-out buffer now belongs to the device
    pub fn mark_enqueued(&mut self, id: BufferId) -> Result<()> {
        let index = self.slot_index(id)?;
        match self.slots[index] {
            Slot::Refilling => {
                self.slots[index] = Slot::Enqueued;
                Ok(())
            }
            ref other => Err(Error::InvalidState(format!(
                "{} is {:?}, cannot mark it enqueued",
                id,
                other.state()
            ))),
        }
    }

    /// Return a buffer to the pool, either from a refill or a completion
    pub fn check_in(&mut self, buffer: QueueBuffer) -> Result<()> {
        let id = buffer.id();
        let index = self.slot_index(id)?;
        match self.slots[index] {
            Slot::Refilling | Slot::Enqueued => {
                self.slots[index] = Slot::Idle(buffer);
                Ok(())
            }
            Slot::Idle(_) => Err(Error::InvalidState(format!(
                "{} returned while already idle",
                id
            ))),
        }
    }

    /// Drop every buffer the pool still holds
    pub fn release(&mut self) {
        self.slots.clear();
        self.ids.clear();
    }

    fn slot_index(&self, id: BufferId) -> Result<usize> {
        self.index_of(id)
            .ok_or_else(|| Error::InvalidState(format!("{} does not belong to this pool", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::EnqueueRejected;
    use crate::audio::format::PacketDescriptor;

    #[derive(Default)]
    struct CountingQueue {
        next_id: usize,
    }

    impl OutputQueue for CountingQueue {
        fn allocate_buffer(&mut self, capacity: usize) -> Result<QueueBuffer> {
            let id = BufferId(self.next_id);
            self.next_id += 1;
            Ok(QueueBuffer::new(id, capacity))
        }

        fn enqueue(
            &mut self,
            _buffer: QueueBuffer,
            _descriptors: &[PacketDescriptor],
        ) -> std::result::Result<(), EnqueueRejected> {
            Ok(())
        }

        fn set_codec_config(&mut self, _config: &[u8]) -> Result<()> {
            Ok(())
        }

        fn set_gain(&mut self, _gain: f32) -> Result<()> {
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self, _immediate: bool) -> Result<()> {
            Ok(())
        }

        fn dispose(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_allocates_exactly_n_idle_buffers() {
        let mut queue = CountingQueue::default();
        let pool = BufferPool::allocate(&mut queue, 3, 1024).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.buffer_size(), 1024);
        assert_eq!(pool.enqueued_count(), 0);
        for id in pool.ids() {
            assert_eq!(pool.state(*id), Some(BufferState::Idle));
        }
    }

    #[test]
    fn test_zero_buffers_rejected() {
        let mut queue = CountingQueue::default();
        assert!(matches!(
            BufferPool::allocate(&mut queue, 0, 1024),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_buffer_cycle() {
        let mut queue = CountingQueue::default();
        let mut pool = BufferPool::allocate(&mut queue, 3, 64).unwrap();
        let id = pool.ids()[1];

        let buffer = pool.checkout(id).unwrap();
        assert_eq!(pool.state(id), Some(BufferState::Refilling));

        pool.mark_enqueued(id).unwrap();
        assert_eq!(pool.enqueued_count(), 1);

        // Device hands the buffer back on completion
        pool.check_in(buffer).unwrap();
        assert_eq!(pool.state(id), Some(BufferState::Idle));
        assert_eq!(pool.enqueued_count(), 0);
    }

    #[test]
    fn test_cannot_checkout_enqueued_buffer() {
        let mut queue = CountingQueue::default();
        let mut pool = BufferPool::allocate(&mut queue, 3, 64).unwrap();
        let id = pool.ids()[0];

        let _buffer = pool.checkout(id).unwrap();
        pool.mark_enqueued(id).unwrap();

        assert!(matches!(pool.checkout(id), Err(Error::InvalidState(_))));
        assert_eq!(pool.state(id), Some(BufferState::Enqueued));
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let mut queue = CountingQueue::default();
        let mut pool = BufferPool::allocate(&mut queue, 3, 64).unwrap();
        let stranger = QueueBuffer::new(BufferId(99), 64);
        assert!(matches!(pool.check_in(stranger), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_release_empties_pool() {
        let mut queue = CountingQueue::default();
        let mut pool = BufferPool::allocate(&mut queue, 3, 64).unwrap();
        pool.release();
        assert!(pool.is_empty());
        assert!(pool.ids().is_empty());
    }
}
