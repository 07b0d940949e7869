//! Packet source backed by symphonia's demuxers
//!
//! Symphonia is used only to split the container into packets; nothing is
//! decoded here. Linear PCM tracks are exposed as constant-bitrate streams
//! with one frame per packet, so a demuxed PCM block is cut into frames.
//! Every other codec is exposed as a variable-bitrate stream with one
//! packet per demuxed packet.
//!
//! Reads are strictly sequential. The player never seeks, so a read that
//! does not start where the previous one ended is rejected.

use crate::audio::format::{PacketDescriptor, SampleEncoding, StreamFormat};
use crate::audio::source::{PacketRead, PacketSource};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use symphonia::core::codecs::{
    CodecParameters, CodecType, CODEC_TYPE_NULL, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_S8, CODEC_TYPE_PCM_U8,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

/// PCM codecs that can be handed to the device as-is
const PASSTHROUGH_PCM: [(CodecType, SampleEncoding, u32); 6] = [
    (CODEC_TYPE_PCM_S8, SampleEncoding::SignedInteger, 8),
    (CODEC_TYPE_PCM_S16LE, SampleEncoding::SignedInteger, 16),
    (CODEC_TYPE_PCM_S24LE, SampleEncoding::SignedInteger, 24),
    (CODEC_TYPE_PCM_S32LE, SampleEncoding::SignedInteger, 32),
    (CODEC_TYPE_PCM_U8, SampleEncoding::UnsignedInteger, 8),
    (CODEC_TYPE_PCM_F32LE, SampleEncoding::Float, 32),
];

/// Demuxed packet not yet fully delivered
struct PendingPacket {
    data: Vec<u8>,
    offset: usize,
    frames: u64,
}

impl PendingPacket {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

/// File-backed packet source
pub struct SymphoniaSource {
    path: PathBuf,
    reader: Option<Box<dyn FormatReader>>,
    track_id: u32,
    format: StreamFormat,
    max_packet_size: u32,
    codec_config: Option<Vec<u8>>,
    next_packet: u64,
    pending: Option<PendingPacket>,
    exhausted: bool,
}

impl SymphoniaSource {
    /// Path this source was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the next packet `read_packets` expects
    pub fn position(&self) -> u64 {
        self.next_packet
    }

    fn probe(path: &Path) -> Result<Box<dyn FormatReader>> {
        let file = std::fs::File::open(path).map_err(|e| {
            Error::Configuration(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                Error::Configuration(format!("Failed to probe {}: {}", path.display(), e))
            })?;
        Ok(probed.format)
    }

    fn default_track(reader: &dyn FormatReader) -> Result<(u32, CodecParameters)> {
        let track = reader
            .default_track()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .or_else(|| {
                reader
                    .tracks()
                    .iter()
                    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            })
            .ok_or_else(|| Error::Configuration("No audio track found".to_string()))?;
        Ok((track.id, track.codec_params.clone()))
    }

    /// Map symphonia codec parameters to a stream format
    fn stream_format(params: &CodecParameters) -> Result<StreamFormat> {
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Configuration("Sample rate not found".to_string()))?;
        let channels = params
            .channels
            .map(|c| c.count() as u32)
            .ok_or_else(|| Error::Configuration("Channel count not found".to_string()))?;

        let pcm = PASSTHROUGH_PCM
            .iter()
            .find(|(codec, _, _)| *codec == params.codec);
        Ok(match pcm {
            Some(&(_, encoding, bits)) => {
                StreamFormat::linear_pcm(f64::from(sample_rate), channels, bits, encoding)
            }
            None => StreamFormat::variable_bitrate(
                f64::from(sample_rate),
                channels,
                params.max_frames_per_packet.unwrap_or(0) as u32,
            ),
        })
    }

    /// Decoder configuration the device needs before the first packet
    fn codec_config_of(params: &CodecParameters) -> Option<Vec<u8>> {
        params
            .extra_data
            .as_deref()
            .filter(|data| !data.is_empty())
            .map(<[u8]>::to_vec)
    }

    /// Walk the whole track once to find the largest packet
    fn scan_max_packet_size(path: &Path, track_id: u32) -> Result<(u32, u64)> {
        let mut reader = Self::probe(path)?;
        let mut max_size = 0usize;
        let mut count = 0u64;
        while let Some(packet) = Self::next_track_packet(reader.as_mut(), track_id)? {
            max_size = max_size.max(packet.data.len());
            count += 1;
        }
        let max_size = u32::try_from(max_size).map_err(|_| {
            Error::Configuration(format!("Packet of {} bytes is too large", max_size))
        })?;
        Ok((max_size, count))
    }

    fn next_track_packet(
        reader: &mut dyn FormatReader,
        track_id: u32,
    ) -> Result<Option<PendingPacket>> {
        loop {
            match reader.next_packet() {
                Ok(packet) if packet.track_id() != track_id || packet.data.is_empty() => continue,
                Ok(packet) => {
                    return Ok(Some(PendingPacket {
                        frames: packet.dur,
                        data: packet.data.into_vec(),
                        offset: 0,
                    }))
                }
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(Error::SourceRead(format!("Failed to read packet: {}", e))),
            }
        }
    }

    /// Current partially delivered packet, or the next one from the file
    fn fill_pending(&mut self) -> Result<Option<&mut PendingPacket>> {
        let needs_packet = self
            .pending
            .as_ref()
            .map_or(true, |p| p.remaining().is_empty());
        if needs_packet && !self.exhausted {
            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| Error::InvalidState("Source already closed".to_string()))?;
            self.pending = Self::next_track_packet(&mut **reader, self.track_id)?;
            if self.pending.is_none() {
                debug!("Reached end of {}", self.path.display());
                self.exhausted = true;
            }
        }
        Ok(self.pending.as_mut().filter(|p| !p.remaining().is_empty()))
    }

    /// Cut whole frames out of the demuxed PCM blocks
    fn read_frames(&mut self, bytes_per_frame: usize, max_packets: u32, out: &mut [u8]) -> Result<PacketRead> {
        let wanted = (max_packets as usize).min(out.len() / bytes_per_frame);
        let mut frames = 0usize;
        let mut written = 0usize;

        while frames < wanted {
            let Some(pending) = self.fill_pending()? else {
                break;
            };
            let available = pending.remaining().len() / bytes_per_frame;
            if available == 0 {
                // Trailing partial frame
                pending.offset = pending.data.len();
                continue;
            }
            let take = available.min(wanted - frames);
            let len = take * bytes_per_frame;
            out[written..written + len].copy_from_slice(&pending.remaining()[..len]);
            pending.offset += len;
            written += len;
            frames += take;
        }

        Ok(PacketRead {
            bytes: written as u32,
            packets: frames as u32,
        })
    }

    /// One descriptor per demuxed packet
    fn read_variable(
        &mut self,
        max_packets: u32,
        out: &mut [u8],
        descriptors: &mut [PacketDescriptor],
    ) -> Result<PacketRead> {
        let wanted = (max_packets as usize).min(descriptors.len());
        let record_frames = self.format.frames_per_packet == 0;
        let mut packets = 0usize;
        let mut written = 0usize;

        while packets < wanted {
            let Some(pending) = self.fill_pending()? else {
                break;
            };
            let size = pending.remaining().len();
            if written + size > out.len() {
                if packets == 0 {
                    return Err(Error::SourceRead(format!(
                        "Packet of {} bytes does not fit a {}-byte buffer",
                        size,
                        out.len()
                    )));
                }
                // Stays pending for the next read
                break;
            }
            out[written..written + size].copy_from_slice(pending.remaining());
            descriptors[packets] = PacketDescriptor {
                offset: written as u64,
                size: size as u32,
                variable_frames: if record_frames { pending.frames as u32 } else { 0 },
            };
            pending.offset = pending.data.len();
            written += size;
            packets += 1;
        }

        Ok(PacketRead {
            bytes: written as u32,
            packets: packets as u32,
        })
    }
}

impl PacketSource for SymphoniaSource {
    fn open(identifier: &str) -> Result<Self> {
        let path = PathBuf::from(identifier);
        let reader = Self::probe(&path)?;
        let (track_id, params) = Self::default_track(reader.as_ref())?;
        let format = Self::stream_format(&params)?;

        let max_packet_size = match format.bytes_per_frame() {
            Some(bytes_per_frame) if !format.is_vbr() => bytes_per_frame,
            _ => {
                let (max_size, count) = Self::scan_max_packet_size(&path, track_id)?;
                debug!("Scanned {} packets, largest {} bytes", count, max_size);
                max_size
            }
        };

        debug!(
            "Opened {}: {:?} ({} Hz, {} ch), max packet {} bytes",
            path.display(),
            params.codec,
            format.sample_rate,
            format.channels_per_frame,
            max_packet_size
        );

        Ok(Self {
            path,
            reader: Some(reader),
            track_id,
            format,
            max_packet_size,
            codec_config: Self::codec_config_of(&params),
            next_packet: 0,
            pending: None,
            exhausted: false,
        })
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn max_packet_size(&self) -> u32 {
        self.max_packet_size
    }

    fn codec_config(&self) -> Option<Vec<u8>> {
        self.codec_config.clone()
    }

    fn read_packets(
        &mut self,
        start_packet: u64,
        max_packets: u32,
        out: &mut [u8],
        descriptors: Option<&mut [PacketDescriptor]>,
    ) -> Result<PacketRead> {
        if start_packet != self.next_packet {
            return Err(Error::SourceRead(format!(
                "Non-sequential read at packet {} (next is {})",
                start_packet, self.next_packet
            )));
        }

        let read = match (self.format.is_vbr(), self.format.bytes_per_frame()) {
            (false, Some(bytes_per_frame)) => {
                self.read_frames(bytes_per_frame as usize, max_packets, out)?
            }
            (true, _) => {
                let descriptors = descriptors.ok_or_else(|| {
                    Error::InvalidState(
                        "Variable-bitrate read needs a descriptor array".to_string(),
                    )
                })?;
                self.read_variable(max_packets, out, descriptors)?
            }
            (false, None) => {
                return Err(Error::InvalidState(format!(
                    "Cannot frame packets for {:?}",
                    self.format.encoding
                )))
            }
        };

        self.next_packet += u64::from(read.packets);
        trace!(
            "Read {} packets ({} bytes) from {}",
            read.packets,
            read.bytes,
            self.path.display()
        );
        Ok(read)
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        self.pending = None;
        Ok(())
    }
}
