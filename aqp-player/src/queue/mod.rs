//! Buffer queue engine
//!
//! A fixed pool of buffers cycles between the packet source and the output
//! device. Each time the device finishes a buffer, the refill controller
//! reads the next run of packets into it and queues it again, until the
//! source runs dry or the host stops playback.

pub mod cursor;
pub mod descriptors;
pub mod lifecycle;
pub mod pool;
pub mod refill;
mod session;
pub mod sizer;
pub mod stats;

pub use lifecycle::QueuePlayer;
pub use refill::RefillOutcome;
pub use sizer::{derive_buffer_size, derive_buffer_size_with, BufferSizing, SizingLimits};
pub use stats::PipelineStats;
