//! Buffer sizing heuristic
//!
//! Converts a target fill duration into a concrete buffer byte size and the
//! number of packets to request per refill.

use crate::audio::format::StreamFormat;
use tracing::debug;

/// Default upper bound for one buffer (320 KiB)
pub const MAX_BUFFER_SIZE: u32 = 0x50000;

/// Default lower bound for one buffer (16 KiB)
pub const MIN_BUFFER_SIZE: u32 = 0x4000;

/// Absolute byte bounds applied after the time-based estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingLimits {
    pub min_buffer_size: u32,
    pub max_buffer_size: u32,
}

impl Default for SizingLimits {
    fn default() -> Self {
        Self {
            min_buffer_size: MIN_BUFFER_SIZE,
            max_buffer_size: MAX_BUFFER_SIZE,
        }
    }
}

/// Result of the sizing heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizing {
    /// Capacity of every queue buffer, in bytes
    pub buffer_size: u32,
    /// Packets requested per refill
    pub packets_to_read: u32,
}

/// Size buffers with the default 16 KiB - 320 KiB bounds
pub fn derive_buffer_size(
    format: &StreamFormat,
    max_packet_size: u32,
    target_seconds: f64,
) -> BufferSizing {
    derive_buffer_size_with(&SizingLimits::default(), format, max_packet_size, target_seconds)
}

/// Size buffers to hold roughly `target_seconds` of audio.
///
/// Fixed framing: `(sample_rate / frames_per_packet) * seconds * max_packet_size`.
/// Variable framing: `max(max_buffer_size, max_packet_size)`, not time based.
///
/// The clamp-down check runs first and only fires when the estimate also
/// exceeds `max_packet_size`, so a single packet always fits. Zero inputs
/// produce a zero-packet sizing that callers must reject.
pub fn derive_buffer_size_with(
    limits: &SizingLimits,
    format: &StreamFormat,
    max_packet_size: u32,
    target_seconds: f64,
) -> BufferSizing {
    let estimate: u32 = if format.frames_per_packet != 0 {
        let packets_for_time =
            format.sample_rate / f64::from(format.frames_per_packet) * target_seconds;
        // Saturating float-to-int cast; NaN becomes 0
        (packets_for_time * f64::from(max_packet_size)) as u32
    } else {
        limits.max_buffer_size.max(max_packet_size)
    };

    let buffer_size = if estimate > limits.max_buffer_size && estimate > max_packet_size {
        limits.max_buffer_size
    } else if estimate < limits.min_buffer_size {
        limits.min_buffer_size
    } else {
        estimate
    };

    let packets_to_read = buffer_size.checked_div(max_packet_size).unwrap_or(0);

    debug!(
        "Derived buffer size: estimate={} buffer_size={} max_packet_size={} packets_to_read={}",
        estimate, buffer_size, max_packet_size, packets_to_read
    );

    BufferSizing {
        buffer_size,
        packets_to_read,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleEncoding;

    fn aac_like() -> StreamFormat {
        StreamFormat {
            sample_rate: 44100.0,
            channels_per_frame: 2,
            bits_per_sample: 0,
            frames_per_packet: 1024,
            bytes_per_packet: 512,
            encoding: SampleEncoding::Encoded,
        }
    }

    #[test]
    fn test_small_estimate_raised_to_minimum() {
        // 44100 / 1024 * 0.5 * 512 = 11025 bytes < 16 KiB
        let sizing = derive_buffer_size(&aac_like(), 512, 0.5);
        assert_eq!(sizing.buffer_size, 16384);
        assert_eq!(sizing.packets_to_read, 32);
    }

    #[test]
    fn test_time_based_estimate_unclamped() {
        // 44100 / 1 * 0.5 * 4 = 88200 bytes
        let format = StreamFormat::linear_pcm(44100.0, 2, 16, SampleEncoding::SignedInteger);
        let sizing = derive_buffer_size(&format, 4, 0.5);
        assert_eq!(sizing.buffer_size, 88200);
        assert_eq!(sizing.packets_to_read, 22050);
    }

    #[test]
    fn test_large_estimate_clamped_to_maximum() {
        let format = StreamFormat::linear_pcm(192000.0, 8, 32, SampleEncoding::SignedInteger);
        let sizing = derive_buffer_size(&format, 32, 2.0);
        assert_eq!(sizing.buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(sizing.packets_to_read, MAX_BUFFER_SIZE / 32);
    }

    #[test]
    fn test_variable_framing_uses_packet_ceiling() {
        let format = StreamFormat::variable_bitrate(44100.0, 2, 0);
        let sizing = derive_buffer_size(&format, 1500, 0.5);
        assert_eq!(sizing.buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(sizing.packets_to_read, MAX_BUFFER_SIZE / 1500);
    }

    #[test]
    fn test_oversized_packet_never_clamped_below_itself() {
        let format = StreamFormat::variable_bitrate(44100.0, 2, 0);
        let huge_packet = MAX_BUFFER_SIZE * 2;
        let sizing = derive_buffer_size(&format, huge_packet, 0.5);
        assert_eq!(sizing.buffer_size, huge_packet);
        assert_eq!(sizing.packets_to_read, 1);
    }

    #[test]
    fn test_zero_packet_size_yields_zero_packets() {
        let sizing = derive_buffer_size(&aac_like(), 0, 0.5);
        assert_eq!(sizing.buffer_size, MIN_BUFFER_SIZE);
        assert_eq!(sizing.packets_to_read, 0);
    }

    #[test]
    fn test_custom_limits_applied() {
        let limits = SizingLimits {
            min_buffer_size: 1024,
            max_buffer_size: 4096,
        };
        let format = StreamFormat::linear_pcm(44100.0, 2, 16, SampleEncoding::SignedInteger);
        let sizing = derive_buffer_size_with(&limits, &format, 4, 0.5);
        assert_eq!(sizing.buffer_size, 4096);
        assert_eq!(sizing.packets_to_read, 1024);
    }
}
