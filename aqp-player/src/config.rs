//! Player configuration
//!
//! Built from the `[playback]` section of the bootstrap TOML file, then
//! adjusted by command-line overrides and validated once before a session
//! is created.

use crate::audio::format::StreamFormat;
use crate::error::{Error, Result};
use crate::queue::sizer::{BufferSizing, SizingLimits};
use aqp_common::config::PlaybackConfig;
use std::time::Duration;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Effective settings for one playback session
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Seconds of audio each buffer should hold
    pub target_seconds: f64,
    /// Buffers cycling through the output queue
    pub buffer_count: usize,
    /// Byte bounds for one buffer
    pub limits: SizingLimits,
    /// Output gain, 0.0 - 1.0
    pub gain: f32,
    /// Slack added on top of the queued audio when waiting for Stopping → Stopped
    pub drain_grace: Duration,
    /// How often the host checks `is_running`
    pub poll_interval: Duration,
    /// Output device name; None picks the system default
    pub device: Option<String>,
    pub event_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self::from_playback(&PlaybackConfig::default())
    }
}

impl PlayerConfig {
    /// Take every setting from the TOML `[playback]` section
    pub fn from_playback(playback: &PlaybackConfig) -> Self {
        Self {
            target_seconds: playback.target_buffer_seconds,
            buffer_count: playback.buffer_count,
            limits: SizingLimits {
                min_buffer_size: playback.min_buffer_bytes,
                max_buffer_size: playback.max_buffer_bytes,
            },
            gain: playback.gain,
            drain_grace: Duration::from_millis(playback.drain_grace_ms),
            poll_interval: Duration::from_millis(playback.poll_interval_ms),
            device: playback.device.clone(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_target_seconds(mut self, target_seconds: f64) -> Self {
        self.target_seconds = target_seconds;
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    /// How long a stopping session may take to play out what is queued
    ///
    /// A full queue holds `buffer_count` buffers. Constant-bitrate streams
    /// convert those bytes to seconds; variable-bitrate ones assume each
    /// buffer holds `target_seconds`. `drain_grace` is added on top.
    pub fn drain_timeout(&self, format: &StreamFormat, sizing: &BufferSizing) -> Duration {
        let buffers = self.buffer_count as f64;
        let bytes_per_second = if format.is_vbr() {
            0.0
        } else {
            format.sample_rate / f64::from(format.frames_per_packet)
                * f64::from(format.bytes_per_packet)
        };
        let queued_seconds = if bytes_per_second > 0.0 && bytes_per_second.is_finite() {
            buffers * f64::from(sizing.buffer_size) / bytes_per_second
        } else {
            buffers * self.target_seconds
        };
        let queued = Duration::try_from_secs_f64(queued_seconds).unwrap_or(Duration::ZERO);
        self.drain_grace.saturating_add(queued)
    }

    /// Reject settings that cannot produce a working queue
    pub fn validate(&self) -> Result<()> {
        if !(self.target_seconds > 0.0 && self.target_seconds.is_finite()) {
            return Err(Error::Configuration(format!(
                "target buffer duration must be positive, got {}",
                self.target_seconds
            )));
        }
        if self.buffer_count == 0 {
            return Err(Error::Configuration(
                "buffer_count must be at least 1".to_string(),
            ));
        }
        if self.limits.min_buffer_size > self.limits.max_buffer_size {
            return Err(Error::Configuration(format!(
                "min_buffer_bytes ({}) exceeds max_buffer_bytes ({})",
                self.limits.min_buffer_size, self.limits.max_buffer_size
            )));
        }
        if !(0.0..=1.0).contains(&self.gain) {
            return Err(Error::Configuration(format!(
                "gain must be within 0.0 - 1.0, got {}",
                self.gain
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleEncoding;
    use aqp_common::config::TomlConfig;

    #[test]
    fn test_defaults_match_bootstrap_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.target_seconds, 0.5);
        assert_eq!(config.buffer_count, 3);
        assert_eq!(config.limits, SizingLimits::default());
        assert_eq!(config.gain, 1.0);
        assert_eq!(config.drain_grace, Duration::from_millis(1000));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(config.device.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_section() {
        let toml = TomlConfig::from_toml_str(
            r#"
            [playback]
            target_buffer_seconds = 1.25
            buffer_count = 4
            gain = 0.5
            device = "USB DAC"
            "#,
        )
        .unwrap();

        let config = PlayerConfig::from_playback(&toml.playback);
        assert_eq!(config.target_seconds, 1.25);
        assert_eq!(config.buffer_count, 4);
        assert_eq!(config.gain, 0.5);
        assert_eq!(config.device.as_deref(), Some("USB DAC"));
    }

    #[test]
    fn test_overrides_applied() {
        let config = PlayerConfig::default()
            .with_target_seconds(2.0)
            .with_gain(0.25)
            .with_buffer_count(5);
        assert_eq!(config.target_seconds, 2.0);
        assert_eq!(config.gain, 0.25);
        assert_eq!(config.buffer_count, 5);
    }

    #[test]
    fn test_drain_timeout_covers_queued_pcm() {
        let config = PlayerConfig::default().with_target_seconds(0.6);
        let format = StreamFormat::linear_pcm(44100.0, 2, 16, SampleEncoding::SignedInteger);
        // 0.6 s of 44.1 kHz stereo s16
        let sizing = BufferSizing {
            buffer_size: 105_840,
            packets_to_read: 26_460,
        };

        let timeout = config.drain_timeout(&format, &sizing);
        assert!((timeout.as_secs_f64() - 2.8).abs() < 1e-6, "{:?}", timeout);
        assert!(timeout > config.drain_grace);
    }

    #[test]
    fn test_drain_timeout_uses_byte_count_not_target() {
        // A buffer clamped to the ceiling holds less than the target
        let config = PlayerConfig::default().with_target_seconds(10.0);
        let format = StreamFormat::linear_pcm(48000.0, 2, 16, SampleEncoding::SignedInteger);
        let sizing = BufferSizing {
            buffer_size: 192_000,
            packets_to_read: 48_000,
        };
        assert_eq!(config.drain_timeout(&format, &sizing), Duration::from_secs(4));
    }

    #[test]
    fn test_drain_timeout_for_variable_bitrate_uses_target() {
        let config = PlayerConfig::default()
            .with_target_seconds(0.5)
            .with_buffer_count(4);
        let format = StreamFormat::variable_bitrate(44100.0, 2, 0);
        let sizing = BufferSizing {
            buffer_size: 327_680,
            packets_to_read: 313,
        };
        assert_eq!(config.drain_timeout(&format, &sizing), Duration::from_secs(3));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let base = PlayerConfig::default();

        assert!(matches!(
            base.clone().with_target_seconds(0.0).validate(),
            Err(Error::Configuration(_))
        ));
        assert!(base.clone().with_target_seconds(f64::NAN).validate().is_err());
        assert!(base.clone().with_buffer_count(0).validate().is_err());
        assert!(base.clone().with_gain(1.5).validate().is_err());
        assert!(base.clone().with_gain(-0.1).validate().is_err());

        let mut inverted = base;
        inverted.limits = SizingLimits {
            min_buffer_size: 4096,
            max_buffer_size: 1024,
        };
        assert!(inverted.validate().is_err());
    }
}
