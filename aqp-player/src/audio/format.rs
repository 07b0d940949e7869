//! Stream format and packet description types
//!
//! A `StreamFormat` is negotiated once when the source is opened and never
//! changes for the lifetime of a session.

use crate::error::{Error, Result};

/// How the bytes of a packet encode audio
///
/// Only linear PCM can be played without a decoder; everything else is
/// `Encoded` and is opaque to the buffer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Little-endian signed integer PCM
    SignedInteger,
    /// Little-endian unsigned integer PCM (8-bit WAV)
    UnsignedInteger,
    /// Little-endian IEEE float PCM
    Float,
    /// Compressed codec payload
    Encoded,
}

/// Audio data format of the stream being played
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    /// Frames per second
    pub sample_rate: f64,
    /// Interleaved channels in each frame
    pub channels_per_frame: u32,
    /// Bits per channel sample (0 for compressed formats)
    pub bits_per_sample: u32,
    /// Frames in each packet (0 = variable framing)
    pub frames_per_packet: u32,
    /// Bytes in each packet (0 = variable packet size)
    pub bytes_per_packet: u32,
    /// Payload encoding
    pub encoding: SampleEncoding,
}

impl StreamFormat {
    /// Interleaved linear PCM: one frame per packet
    pub fn linear_pcm(
        sample_rate: f64,
        channels_per_frame: u32,
        bits_per_sample: u32,
        encoding: SampleEncoding,
    ) -> Self {
        Self {
            sample_rate,
            channels_per_frame,
            bits_per_sample,
            frames_per_packet: 1,
            bytes_per_packet: channels_per_frame * bits_per_sample.div_ceil(8),
            encoding,
        }
    }

    /// Compressed variable-bitrate stream
    ///
    /// `frames_per_packet` may be 0 when the codec does not fix it.
    pub fn variable_bitrate(sample_rate: f64, channels_per_frame: u32, frames_per_packet: u32) -> Self {
        Self {
            sample_rate,
            channels_per_frame,
            bits_per_sample: 0,
            frames_per_packet,
            bytes_per_packet: 0,
            encoding: SampleEncoding::Encoded,
        }
    }

    /// Either zero field forces per-packet descriptions
    pub fn is_vbr(&self) -> bool {
        self.bytes_per_packet == 0 || self.frames_per_packet == 0
    }

    /// Bytes in one interleaved frame, for PCM formats
    pub fn bytes_per_frame(&self) -> Option<u32> {
        match self.encoding {
            SampleEncoding::Encoded => None,
            _ if self.bits_per_sample == 0 => None,
            _ => Some(self.channels_per_frame * self.bits_per_sample.div_ceil(8)),
        }
    }

    /// Whether the payload is playable PCM
    pub fn is_linear_pcm(&self) -> bool {
        self.encoding != SampleEncoding::Encoded
    }

    /// Reject formats no session can be built on
    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(Error::Configuration(format!(
                "Stream sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.channels_per_frame == 0 {
            return Err(Error::Configuration(
                "Stream reports zero channels per frame".to_string(),
            ));
        }
        if self.is_linear_pcm() && self.bits_per_sample == 0 {
            return Err(Error::Configuration(
                "PCM stream reports zero bits per sample".to_string(),
            ));
        }
        Ok(())
    }
}

/// Location of one packet inside a buffer's byte content (VBR only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketDescriptor {
    /// Byte offset from the start of the buffer
    pub offset: u64,
    /// Packet size in bytes
    pub size: u32,
    /// Frames in this packet when the format has variable framing, else 0
    pub variable_frames: u32,
}
