//! Scripted packet source
//!
//! Serves a fixed list of packets in order and records every call so tests
//! can check exactly what the refill path asked for. Each packet's bytes are
//! filled with its index (mod 256), which makes enqueued buffers easy to
//! identify.

use aqp_player::audio::{PacketDescriptor, PacketRead, PacketSource, SampleEncoding, StreamFormat};
use aqp_player::{Error, Result};
use std::sync::{Arc, Mutex};

/// One `read_packets` call as seen by the source
#[derive(Debug, Clone, PartialEq)]
pub struct ReadCall {
    pub start_packet: u64,
    pub max_packets: u32,
    pub max_bytes: usize,
    pub with_descriptors: bool,
    pub returned_packets: u32,
    pub returned_bytes: u32,
}

#[derive(Debug, Default)]
pub struct SourceLog {
    pub reads: Vec<ReadCall>,
    pub close_calls: usize,
}

impl SourceLog {
    /// Reads that delivered at least one packet
    pub fn data_reads(&self) -> usize {
        self.reads.iter().filter(|r| r.returned_packets > 0).count()
    }

    pub fn packets_delivered(&self) -> u64 {
        self.reads.iter().map(|r| u64::from(r.returned_packets)).sum()
    }
}

pub struct MockSource {
    format: StreamFormat,
    packets: Vec<u32>,
    max_packet_size: u32,
    codec_config: Option<Vec<u8>>,
    fail_on_read: Option<usize>,
    next_packet: u64,
    log: Arc<Mutex<SourceLog>>,
}

impl MockSource {
    /// `count` fixed-size packets of 16-bit stereo PCM (4 bytes each)
    pub fn cbr(count: usize) -> Self {
        let format = StreamFormat::linear_pcm(44100.0, 2, 16, SampleEncoding::SignedInteger);
        let size = format.bytes_per_packet;
        Self::with_packets(format, vec![size; count])
    }

    /// Variable-bitrate packets with the given sizes
    pub fn vbr(sizes: &[u32]) -> Self {
        Self::with_packets(StreamFormat::variable_bitrate(44100.0, 2, 1152), sizes.to_vec())
    }

    /// Packets of `sizes` under an arbitrary format
    pub fn with_packets(format: StreamFormat, sizes: Vec<u32>) -> Self {
        let max_packet_size = sizes.iter().copied().max().unwrap_or(format.bytes_per_packet);
        Self {
            format,
            packets: sizes,
            max_packet_size,
            codec_config: None,
            fail_on_read: None,
            next_packet: 0,
            log: Arc::new(Mutex::new(SourceLog::default())),
        }
    }

    pub fn with_codec_config(mut self, config: &[u8]) -> Self {
        self.codec_config = Some(config.to_vec());
        self
    }

    pub fn with_max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Make the `call`-th read (0-based) fail with a source read error
    pub fn failing_on_read(mut self, call: usize) -> Self {
        self.fail_on_read = Some(call);
        self
    }

    /// Handle to the call log that survives boxing the source
    pub fn log(&self) -> Arc<Mutex<SourceLog>> {
        Arc::clone(&self.log)
    }
}

impl PacketSource for MockSource {
    fn open(identifier: &str) -> Result<Self> {
        match identifier.strip_prefix("mock:") {
            Some(count) => count
                .parse()
                .map(Self::cbr)
                .map_err(|_| Error::Configuration(format!("bad mock identifier {}", identifier))),
            None => Err(Error::Configuration(format!("cannot open {}", identifier))),
        }
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
        mut descriptors: Option<&mut [PacketDescriptor]>,
    ) -> Result<PacketRead> {
        let mut log = self.log.lock().unwrap();
        let call_index = log.reads.len();
        let mut call = ReadCall {
            start_packet,
            max_packets,
            max_bytes: out.len(),
            with_descriptors: descriptors.is_some(),
            returned_packets: 0,
            returned_bytes: 0,
        };

        if self.fail_on_read == Some(call_index) {
            log.reads.push(call);
            return Err(Error::SourceRead("injected read failure".to_string()));
        }
        assert_eq!(start_packet, self.next_packet, "reads must be sequential");

        let limit = match descriptors.as_deref() {
            Some(d) => (max_packets as usize).min(d.len()),
            None => max_packets as usize,
        };
        let mut written = 0usize;
        let mut packets = 0usize;
        while packets < limit {
            let index = self.next_packet as usize + packets;
            let Some(&size) = self.packets.get(index) else {
                break;
            };
            let size = size as usize;
            if written + size > out.len() {
                break;
            }
            out[written..written + size].fill(index as u8);
            if let Some(d) = descriptors.as_deref_mut() {
                d[packets] = PacketDescriptor {
                    offset: written as u64,
                    size: size as u32,
                    variable_frames: 0,
                };
            }
            written += size;
            packets += 1;
        }

        self.next_packet += packets as u64;
        call.returned_packets = packets as u32;
        call.returned_bytes = written as u32;
        log.reads.push(call);

        Ok(PacketRead {
            bytes: written as u32,
            packets: packets as u32,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().close_calls += 1;
        Ok(())
    }
}
