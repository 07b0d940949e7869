//! Packet source abstraction
//!
//! A source yields raw packet bytes (never decoded samples) in stream order.

use crate::audio::format::{PacketDescriptor, StreamFormat};
use crate::error::Result;

/// Outcome of one `read_packets` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketRead {
    /// Bytes written to the output buffer
    pub bytes: u32,
    /// Whole packets written; zero means end of stream
    pub packets: u32,
}

impl PacketRead {
    pub fn end_of_stream() -> Self {
        Self::default()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.packets == 0
    }
}

/// Demuxer-side collaborator of the buffer queue
pub trait PacketSource: Send {
    /// Open a source by identifier (file path, URL, ...)
    fn open(identifier: &str) -> Result<Self>
    where
        Self: Sized;

    /// Stream format, fixed for the source's lifetime
    fn format(&self) -> StreamFormat;

    /// Upper bound on the size of any packet, in bytes
    fn max_packet_size(&self) -> u32;

    /// Out-of-band codec configuration blob, if the format has one
    fn codec_config(&self) -> Option<Vec<u8>>;

    /// Read up to `max_packets` whole packets starting at `start_packet`.
    ///
    /// `out.len()` is the byte limit. For variable-bitrate formats the
    /// source writes one descriptor per packet into `descriptors`, which
    /// also caps the packet count. Fewer packets than requested is normal;
    /// zero packets means the stream is exhausted.
    fn read_packets(
        &mut self,
        start_packet: u64,
        max_packets: u32,
        out: &mut [u8],
        descriptors: Option<&mut [PacketDescriptor]>,
    ) -> Result<PacketRead>;

    /// Release the underlying stream
    fn close(&mut self) -> Result<()>;
}
