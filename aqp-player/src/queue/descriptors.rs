//! Packet descriptor scratch store
//!
//! Variable-bitrate reads describe each packet's offset and size. The store
//! holds one reusable array sized at `packets_to_read`, overwritten in place
//! on every refill. Constant-bitrate streams hold no array at all: the
//! device derives offsets from the fixed packet size.

use crate::audio::format::{PacketDescriptor, StreamFormat};

#[derive(Debug, Default)]
pub struct PacketDescriptorStore {
    scratch: Option<Box<[PacketDescriptor]>>,
}

impl PacketDescriptorStore {
    /// Allocate the scratch array iff `format` is variable-bitrate
    pub fn for_format(format: &StreamFormat, packets_to_read: u32) -> Self {
        let scratch = format
            .is_vbr()
            .then(|| vec![PacketDescriptor::default(); packets_to_read as usize].into_boxed_slice());
        Self { scratch }
    }

    /// True when reads must produce descriptors
    pub fn is_active(&self) -> bool {
        self.scratch.is_some()
    }

    /// Scratch region handed to the source (None for CBR)
    pub fn scratch_mut(&mut self) -> Option<&mut [PacketDescriptor]> {
        self.scratch.as_deref_mut()
    }

    /// First `packets` descriptors from the last read; empty for CBR
    pub fn filled(&self, packets: usize) -> &[PacketDescriptor] {
        match &self.scratch {
            Some(scratch) => &scratch[..packets.min(scratch.len())],
            None => &[],
        }
    }

    pub fn capacity(&self) -> usize {
        self.scratch.as_ref().map_or(0, |s| s.len())
    }

    /// Drop the array. Safe to call more than once.
    pub fn release(&mut self) {
        self.scratch = None;
    }
}
