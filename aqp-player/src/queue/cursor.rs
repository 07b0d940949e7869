//! Stream cursor: index of the next packet to request from the source

/// Next unread packet index. Only moves forward, and only by the number of
/// packets a read actually returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCursor {
    next_packet: u64,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> u64 {
        self.next_packet
    }

    /// Advance past `packets` packets; returns the new position
    pub fn advance(&mut self, packets: u32) -> u64 {
        self.next_packet = self.next_packet.saturating_add(u64::from(packets));
        self.next_packet
    }
}
