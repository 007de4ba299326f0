//! Per-endpoint traffic counters.
//!
//! Counters are monotonic wrapping 64-bit values, kept separately for the
//! input and output directions. The framers record into their own
//! [`DirectionStats`]; the endpoint controller combines both halves into a
//! [`Statistics`] snapshot on demand and optionally zeroes them.

/// Counters for one traffic direction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirectionStats {
    /// Close, ping and pong frames.
    pub control_frames: u64,
    pub text_messages: u64,
    /// Uncompressed text payload bytes.
    pub text_bytes: u64,
    pub binary_messages: u64,
    /// Uncompressed binary payload bytes.
    pub binary_bytes: u64,
    /// Messages that crossed the wire compressed.
    pub compressed_messages: u64,
    /// Compressed payload bytes as transferred.
    pub compressed_bytes: u64,
    /// Uncompressed minus compressed byte total; negative when compression
    /// expanded the payloads.
    pub bytes_saved: i64,
}

impl DirectionStats {
    pub(crate) fn record_text(&mut self, len: usize) {
        self.text_messages = self.text_messages.wrapping_add(1);
        self.text_bytes = self.text_bytes.wrapping_add(len as u64);
    }

    pub(crate) fn record_binary(&mut self, len: usize) {
        self.binary_messages = self.binary_messages.wrapping_add(1);
        self.binary_bytes = self.binary_bytes.wrapping_add(len as u64);
    }

    pub(crate) fn record_control(&mut self) {
        self.control_frames = self.control_frames.wrapping_add(1);
    }

    pub(crate) fn record_compressed(&mut self, raw_len: usize, wire_len: usize) {
        self.compressed_messages = self.compressed_messages.wrapping_add(1);
        self.compressed_bytes = self.compressed_bytes.wrapping_add(wire_len as u64);
        self.bytes_saved = self
            .bytes_saved
            .wrapping_add(raw_len as i64 - wire_len as i64);
    }
}

/// A snapshot of both directions' counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub input: DirectionStats,
    pub output: DirectionStats,
}
