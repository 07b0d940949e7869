//! Audio Test File Generation Utilities
//!
//! Generates small files with known content for the symphonia source:
//! - Silent audio (all zeros)
//! - Ramps whose sample values encode their frame index
//! - MPEG-1 Layer III streams whose frame sizes follow a bitrate pattern

use hound::{WavSpec, WavWriter};
use std::io::Write;
use std::path::Path;

/// Standard test sample rate (44.1 kHz)
pub const TEST_SAMPLE_RATE: u32 = 44100;

/// Generate a silent 16-bit stereo WAV file of `frames` frames
pub fn generate_silent_wav<P: AsRef<Path>>(path: P, frames: u32) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for _ in 0..frames * 2 {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Generate a 16-bit WAV file where every sample of frame `n` is `n as i16`
///
/// Lets tests check that packets come back in order and none are lost.
pub fn generate_pcm16_wav<P: AsRef<Path>>(
    path: P,
    channels: u16,
    frames: u32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for frame in 0..frames {
        for _ in 0..channels {
            writer.write_sample(frame as i16)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Samples per channel in one MPEG-1 Layer III frame
pub const MP3_FRAME_SAMPLES: u32 = 1152;

/// MPEG-1 Layer III bitrates by header index, in kbit/s
const MP3_BITRATES: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];

/// Byte length of a 44.1 kHz MPEG-1 Layer III frame, header included
pub fn mp3_frame_len(bitrate_index: u8) -> u32 {
    144 * MP3_BITRATES[bitrate_index as usize] * 1000 / TEST_SAMPLE_RATE
}

/// Generate a stereo 44.1 kHz MP3 stream with one frame per bitrate index
///
/// Frame bodies are zero, so the demuxer splits the file cleanly but the
/// audio is never meant to be decoded. Returns each frame's byte length.
pub fn generate_mp3<P: AsRef<Path>>(path: P, bitrate_indices: &[u8]) -> std::io::Result<Vec<u32>> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    let mut sizes = Vec::with_capacity(bitrate_indices.len());
    for &index in bitrate_indices {
        assert!((1..15).contains(&index), "bitrate index {} not usable", index);
        let len = mp3_frame_len(index);
        // Sync, MPEG-1, Layer III, no CRC; 44.1 kHz, no padding; stereo
        let header = [0xFF, 0xFB, index << 4, 0x00];
        file.write_all(&header)?;
        file.write_all(&vec![0u8; len as usize - header.len()])?;
        sizes.push(len);
    }
    file.flush()?;
    Ok(sizes)
}
