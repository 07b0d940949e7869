//! Test helper modules for AQP Player integration tests
//!
//! Provides reusable test infrastructure components:
//! - MockSource: scripted packet source with failure injection
//! - MockDevice: output device whose completions are driven by the test
//! - Audio generator: WAV and MP3 fixtures for the symphonia source

#![allow(dead_code)]

pub mod audio_generator;
pub mod mock_device;
pub mod mock_source;

use aqp_player::queue::SizingLimits;
use aqp_player::PlayerConfig;

/// Config whose buffers hold exactly `packets_per_buffer` packets of
/// `packet_size` bytes
pub fn config_for_packets(packet_size: u32, packets_per_buffer: u32) -> PlayerConfig {
    let bytes = packet_size * packets_per_buffer;
    let mut config = PlayerConfig::default();
    config.limits = SizingLimits {
        min_buffer_size: bytes,
        max_buffer_size: bytes,
    };
    config
}
