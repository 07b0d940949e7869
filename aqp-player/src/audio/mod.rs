//! Audio subsystem for aqp-player
//!
//! This module provides the two collaborators of the buffer queue:
//! - Packet sources (raw packets in stream order, never decoded)
//! - Output devices (queues that play buffers and hand them back)
//!
//! plus the concrete implementations:
//! - Symphonia demuxing for files
//! - cpal output for linear PCM

pub mod device;
pub mod format;
pub mod output;
pub mod source;
pub mod symphonia_source;

// Re-exports for external use (tests, other modules)
pub use device::{
    AudioDevice, BufferId, CompletionHandler, EnqueueRejected, OutputQueue, QueueBuffer,
};
pub use format::{PacketDescriptor, SampleEncoding, StreamFormat};
pub use output::{CpalDevice, PcmLayout};
pub use source::{PacketRead, PacketSource};
pub use symphonia_source::SymphoniaSource;
