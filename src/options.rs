//! Endpoint configuration.

use std::ops::Range;
use std::time::Duration;

use crate::compression::CompressionLevel;

/// Default payload-size range for which `Compress::Auto` compresses.
/// Payloads under 8 bytes rarely shrink.
const AUTO_COMPRESSION_FLOOR: usize = 8;

/// Per-endpoint options. Immutable once the endpoint is created.
///
/// ```
/// use socketeer::Options;
/// use std::time::Duration;
///
/// let options = Options::default()
///     .with_subprotocols(["chat.v2", "chat.v1"])
///     .with_opening_handshake_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Ordered client preference list for `Sec-WebSocket-Protocol`.
    pub subprotocols: Vec<String>,
    /// Answer inbound pings with matching pongs.
    pub automatically_respond_to_pings: bool,
    /// How many redirect hops the client handshake follows.
    pub maximum_redirects: u32,
    /// Time limit for the whole opening handshake, redirects included.
    pub opening_handshake_timeout: Duration,
    /// How long to wait for the peer's close frame after sending ours.
    pub closing_handshake_timeout: Duration,
    /// Transport hint; ignored by transports that cannot honor it.
    pub enable_fast_open: bool,
    /// Inbound messages above this size close the connection with 1009.
    pub maximum_incoming_message_payload_size: usize,
    /// Transport read granularity in bytes.
    pub receive_chunk_size: usize,
    /// Extra request headers; names the handshake owns are ignored.
    pub extra_headers: Vec<(String, String)>,
    /// Offer `permessage-deflate` during the handshake.
    pub enable_compression: bool,
    /// DEFLATE effort level for outbound compression.
    pub compression_level: CompressionLevel,
    /// Payload sizes for which `Compress::Auto` compresses text messages.
    pub text_auto_compression_range: Range<usize>,
    /// Payload sizes for which `Compress::Auto` compresses binary messages.
    pub binary_auto_compression_range: Range<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            subprotocols: Vec::new(),
            automatically_respond_to_pings: true,
            maximum_redirects: 5,
            opening_handshake_timeout: Duration::from_secs(30),
            closing_handshake_timeout: Duration::from_secs(30),
            enable_fast_open: false,
            maximum_incoming_message_payload_size: usize::MAX,
            receive_chunk_size: 32 * 1024,
            extra_headers: Vec::new(),
            enable_compression: true,
            compression_level: CompressionLevel::default(),
            text_auto_compression_range: AUTO_COMPRESSION_FLOOR..usize::MAX,
            binary_auto_compression_range: AUTO_COMPRESSION_FLOOR..usize::MAX,
        }
    }
}

impl Options {
    pub fn with_subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = subprotocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_automatic_pong(mut self, enabled: bool) -> Self {
        self.automatically_respond_to_pings = enabled;
        self
    }

    pub fn with_maximum_redirects(mut self, limit: u32) -> Self {
        self.maximum_redirects = limit;
        self
    }

    pub fn with_opening_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.opening_handshake_timeout = timeout;
        self
    }

    pub fn with_closing_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.closing_handshake_timeout = timeout;
        self
    }

    pub fn with_fast_open(mut self, enabled: bool) -> Self {
        self.enable_fast_open = enabled;
        self
    }

    pub fn with_maximum_incoming_message_payload_size(mut self, limit: usize) -> Self {
        self.maximum_incoming_message_payload_size = limit;
        self
    }

    pub fn with_receive_chunk_size(mut self, size: usize) -> Self {
        self.receive_chunk_size = size;
        self
    }

    pub fn with_extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    pub fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_text_auto_compression_range(mut self, range: Range<usize>) -> Self {
        self.text_auto_compression_range = range;
        self
    }

    pub fn with_binary_auto_compression_range(mut self, range: Range<usize>) -> Self {
        self.binary_auto_compression_range = range;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let options = Options::default();
        assert!(options.subprotocols.is_empty());
        assert!(options.automatically_respond_to_pings);
        assert_eq!(options.maximum_redirects, 5);
        assert_eq!(options.opening_handshake_timeout, Duration::from_secs(30));
        assert_eq!(options.closing_handshake_timeout, Duration::from_secs(30));
        assert!(!options.enable_fast_open);
        assert_eq!(options.maximum_incoming_message_payload_size, usize::MAX);
        assert_eq!(options.receive_chunk_size, 32 * 1024);
        assert!(options.extra_headers.is_empty());
        assert!(options.enable_compression);
        assert_eq!(options.text_auto_compression_range, 8..usize::MAX);
        assert_eq!(options.binary_auto_compression_range, 8..usize::MAX);
    }

    #[test]
    fn builder_chains() {
        let options = Options::default()
            .with_subprotocols(["a", "b"])
            .with_maximum_redirects(2)
            .with_compression(false)
            .with_extra_header("authorization", "Bearer token");
        assert_eq!(options.subprotocols, ["a", "b"]);
        assert_eq!(options.maximum_redirects, 2);
        assert!(!options.enable_compression);
        assert_eq!(options.extra_headers.len(), 1);
    }
}
