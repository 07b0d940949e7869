//! # AQP Player Library (aqp-player)
//!
//! Pull-driven audio playback over a fixed pool of queue buffers.
//!
//! **Purpose:** Read packets from a source, keep a small ring of buffers
//! queued on the output device, and refill each buffer as the device hands
//! it back until the stream ends or the host stops playback.
//!
//! **Architecture:** symphonia (demux) → buffer queue → cpal (output)

pub mod audio;
pub mod config;
pub mod error;
pub mod queue;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use queue::QueuePlayer;
