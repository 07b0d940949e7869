//! Per-session pipeline counters

use serde::Serialize;

/// Counters updated under the session lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// `read_packets` calls, including the one that hit end of stream
    pub read_calls: u64,
    /// Reads that returned data
    pub refills: u64,
    /// Buffers the device accepted
    pub enqueues: u64,
    pub packets_read: u64,
    pub bytes_read: u64,
    /// Buffers handed back by the device
    pub completions: u64,
    /// Completions that arrived while Running with nothing else in flight
    pub underrun_warnings: u64,
    /// Refills skipped because the session no longer accepted them
    pub skipped_refills: u64,
}

impl PipelineStats {
    pub(crate) fn record_read(&mut self, packets: u32, bytes: u32) {
        self.read_calls += 1;
        if packets > 0 {
            self.refills += 1;
        }
        self.packets_read += u64::from(packets);
        self.bytes_read += u64::from(bytes);
    }

    pub(crate) fn record_enqueue(&mut self) {
        self.enqueues += 1;
    }
}
