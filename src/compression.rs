//! `permessage-deflate` negotiation and per-message DEFLATE streams
//! ([RFC 7692](https://datatracker.ietf.org/doc/html/rfc7692)).
//!
//! [`CompressionOffer`] models the four negotiable parameters and
//! round-trips through the parameterized-token codec. [`Deflater`] and
//! [`Inflater`] wrap raw (headerless) DEFLATE streams: the deflater flushes
//! each message with a sync flush (context preserved) or a full flush
//! (no-context-takeover) and strips the trailing `00 00 ff ff` block; the
//! inflater appends that block back before inflating and resets its stream
//! between messages when the no-context-takeover setting applies to its
//! direction.

use std::io;

use bytes::{BufMut, BytesMut};
use flate2::Status;

use crate::params::Parameterized;
use crate::Role;

pub use flate2::Compression as CompressionLevel;

/// The extension token this library negotiates.
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// The sync-flush marker DEFLATE appends at each flush point. Stripped from
/// compressed messages on the wire and re-appended before inflating.
const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// A `permessage-deflate` parameter set.
///
/// The window-bits fields are tri-valued: `None` means the parameter was
/// absent, `Some(None)` means it appeared without a value, `Some(Some(n))`
/// carries a negotiated window size in 8..=15.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionOffer {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: Option<Option<u8>>,
    pub client_max_window_bits: Option<Option<u8>>,
}

impl CompressionOffer {
    /// Parses one extension entry. Returns `None` when the entry is not a
    /// syntactically valid `permessage-deflate` offer: wrong token, unknown
    /// or duplicated parameters, or window bits outside 8..=15.
    pub fn from_params(params: &Parameterized) -> Option<Self> {
        if !params.token_is(PERMESSAGE_DEFLATE) {
            return None;
        }
        let mut offer = Self::default();
        for (name, value) in &params.params {
            match name.to_ascii_lowercase().as_str() {
                "server_no_context_takeover" => {
                    if offer.server_no_context_takeover || value.is_some() {
                        return None;
                    }
                    offer.server_no_context_takeover = true;
                }
                "client_no_context_takeover" => {
                    if offer.client_no_context_takeover || value.is_some() {
                        return None;
                    }
                    offer.client_no_context_takeover = true;
                }
                "server_max_window_bits" => {
                    if offer.server_max_window_bits.is_some() {
                        return None;
                    }
                    offer.server_max_window_bits = Some(parse_window_bits(value.as_deref())?);
                }
                "client_max_window_bits" => {
                    if offer.client_max_window_bits.is_some() {
                        return None;
                    }
                    offer.client_max_window_bits = Some(parse_window_bits(value.as_deref())?);
                }
                _ => return None,
            }
        }
        Some(offer)
    }

    /// Picks the first syntactically valid offer from an extension list.
    pub fn first_valid(offers: &[Parameterized]) -> Option<Self> {
        offers.iter().find_map(Self::from_params)
    }

    /// Formats the offer back into header-value form.
    pub fn to_params(&self) -> Parameterized {
        let mut params = Parameterized::new(PERMESSAGE_DEFLATE);
        if self.server_no_context_takeover {
            params = params.with_param("server_no_context_takeover", None);
        }
        if self.client_no_context_takeover {
            params = params.with_param("client_no_context_takeover", None);
        }
        if let Some(bits) = self.server_max_window_bits {
            params = params.with_param("server_max_window_bits", window_bits_value(bits).as_deref());
        }
        if let Some(bits) = self.client_max_window_bits {
            params = params.with_param("client_max_window_bits", window_bits_value(bits).as_deref());
        }
        params
    }

    /// Server side: builds the response parameters for a client offer.
    ///
    /// A `server_no_context_takeover` request is honored verbatim, and the
    /// response never claims `client_max_window_bits` unless the client
    /// offered it. Valueless window-bits parameters are dropped — stating a
    /// value the client did not give would not be a subset of the offer.
    pub fn respond(&self) -> CompressionOffer {
        CompressionOffer {
            server_no_context_takeover: self.server_no_context_takeover,
            client_no_context_takeover: self.client_no_context_takeover,
            server_max_window_bits: self.server_max_window_bits.flatten().map(Some),
            client_max_window_bits: self.client_max_window_bits.flatten().map(Some),
        }
    }

    /// Client side: whether a server response is an acceptable subset of
    /// this offer. Responses must carry concrete window-bits values.
    pub fn accepts(&self, response: &CompressionOffer) -> bool {
        if response.server_no_context_takeover && !self.server_no_context_takeover {
            return false;
        }
        if response.client_no_context_takeover && !self.client_no_context_takeover {
            return false;
        }
        if !window_subset(self.server_max_window_bits, response.server_max_window_bits) {
            return false;
        }
        if !window_subset(self.client_max_window_bits, response.client_max_window_bits) {
            return false;
        }
        true
    }

    /// Whether this endpoint's outbound compression context resets between
    /// messages under the negotiated parameters.
    pub fn outbound_resets(&self, role: Role) -> bool {
        match role {
            Role::Client => self.client_no_context_takeover,
            Role::Server => self.server_no_context_takeover,
        }
    }

    /// Whether this endpoint's inbound decompression context resets between
    /// messages under the negotiated parameters.
    pub fn inbound_resets(&self, role: Role) -> bool {
        match role {
            Role::Client => self.server_no_context_takeover,
            Role::Server => self.client_no_context_takeover,
        }
    }

    #[cfg(feature = "zlib")]
    fn window_bits_for(&self, direction_of: Role) -> Option<u8> {
        match direction_of {
            Role::Client => self.client_max_window_bits.flatten(),
            Role::Server => self.server_max_window_bits.flatten(),
        }
    }

    /// Builds the compressor for this endpoint's outbound direction.
    pub fn deflater(&self, role: Role, level: CompressionLevel) -> Deflater {
        let resets = self.outbound_resets(role);
        #[cfg(feature = "zlib")]
        if let Some(bits) = self.window_bits_for(role) {
            // zlib rejects an 8-bit window; 9 is the smallest it accepts.
            return Deflater::with_window_bits(level, bits.max(9), resets);
        }
        Deflater::new(level, resets)
    }

    /// Builds the decompressor for this endpoint's inbound direction.
    pub fn inflater(&self, role: Role) -> Inflater {
        let resets = self.inbound_resets(role);
        #[cfg(feature = "zlib")]
        if let Some(bits) = self.window_bits_for(role.peer()) {
            return Inflater::with_window_bits(bits.max(9), resets);
        }
        Inflater::new(resets)
    }
}

fn parse_window_bits(value: Option<&str>) -> Option<Option<u8>> {
    match value {
        None => Some(None),
        Some(text) => {
            let bits: u8 = text.parse().ok()?;
            (8..=15).contains(&bits).then_some(Some(bits))
        }
    }
}

fn window_bits_value(bits: Option<u8>) -> Option<String> {
    bits.map(|b| b.to_string())
}

/// A window-bits parameter in a response is acceptable when the client
/// offered the parameter and the response value does not exceed the offered
/// one.
fn window_subset(offered: Option<Option<u8>>, response: Option<Option<u8>>) -> bool {
    match response {
        None => true,
        Some(None) => false,
        Some(Some(bits)) => match offered {
            None => false,
            Some(None) => true,
            Some(Some(max)) => bits <= max,
        },
    }
}

// ================ Streaming DEFLATE ====================

/// Returns a writable slice over the buffer's spare capacity, growing it
/// when full.
fn spare(output: &mut BytesMut) -> &mut [u8] {
    if output.len() == output.capacity() {
        output.reserve(1024);
    }
    let uninit = output.spare_capacity_mut();
    // The compressor only ever writes into this slice before it is read.
    unsafe { &mut *(uninit as *mut [std::mem::MaybeUninit<u8>] as *mut [u8]) }
}

fn corrupt_stream() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "corrupt deflate stream")
}

/// Per-message compressor for one endpoint's outbound direction.
///
/// Operates in raw DEFLATE mode. Each call to [`deflate`](Self::deflate)
/// compresses a whole message and flushes it so the peer can inflate it
/// independently; the trailing `00 00 ff ff` block is stripped from the
/// result per RFC 7692 Section 7.2.1.
pub struct Deflater {
    output: BytesMut,
    compress: flate2::Compress,
    reset_context: bool,
}

impl Deflater {
    /// A deflater with the backend's full 15-bit window.
    pub fn new(level: CompressionLevel, reset_context: bool) -> Self {
        Self {
            output: BytesMut::with_capacity(1024),
            compress: flate2::Compress::new(level, false),
            reset_context,
        }
    }

    /// A deflater with a negotiated LZ77 window size (9..=15).
    #[cfg(feature = "zlib")]
    pub fn with_window_bits(level: CompressionLevel, window_bits: u8, reset_context: bool) -> Self {
        Self {
            output: BytesMut::with_capacity(1024),
            compress: flate2::Compress::new_with_window_bits(level, false, window_bits),
            reset_context,
        }
    }

    /// Compresses one message, returning its wire payload.
    pub fn deflate(&mut self, mut input: &[u8]) -> io::Result<BytesMut> {
        while !input.is_empty() {
            let consumed = self.write(input)?;
            input = &input[consumed..];
        }
        self.flush()
    }

    fn write(&mut self, input: &[u8]) -> io::Result<usize> {
        let dst = spare(&mut self.output);

        let before_out = self.compress.total_out();
        let before_in = self.compress.total_in();

        let status = self.compress.compress(input, dst, flate2::FlushCompress::None);

        let written = (self.compress.total_out() - before_out) as usize;
        let consumed = (self.compress.total_in() - before_in) as usize;
        unsafe { self.output.advance_mut(written) };

        match status {
            Ok(Status::Ok) => Ok(consumed),
            Ok(Status::StreamEnd | Status::BufError) | Err(_) => Err(corrupt_stream()),
        }
    }

    fn flush(&mut self) -> io::Result<BytesMut> {
        // Sync flush keeps the sliding window; full flush erases it, which
        // is exactly the no-context-takeover behavior.
        let mode = if self.reset_context {
            flate2::FlushCompress::Full
        } else {
            flate2::FlushCompress::Sync
        };

        let dst = spare(&mut self.output);
        let before_out = self.compress.total_out();
        self.compress
            .compress(&[], dst, mode)
            .map_err(|_| corrupt_stream())?;
        let written = (self.compress.total_out() - before_out) as usize;
        unsafe { self.output.advance_mut(written) };

        loop {
            let dst = spare(&mut self.output);
            let before_out = self.compress.total_out();
            self.compress
                .compress(&[], dst, flate2::FlushCompress::None)
                .map_err(|_| corrupt_stream())?;

            if before_out == self.compress.total_out() {
                if self.output.ends_with(&DEFLATE_TAIL) {
                    self.output.truncate(self.output.len() - DEFLATE_TAIL.len());
                }
                break Ok(self.output.split());
            }

            let written = (self.compress.total_out() - before_out) as usize;
            unsafe { self.output.advance_mut(written) };
        }
    }
}

/// Per-message decompressor for one endpoint's inbound direction.
pub struct Inflater {
    output: BytesMut,
    decompress: flate2::Decompress,
    reset_context: bool,
}

impl Inflater {
    /// An inflater with the backend's full 15-bit window.
    pub fn new(reset_context: bool) -> Self {
        Self {
            output: BytesMut::with_capacity(1024),
            decompress: flate2::Decompress::new(false),
            reset_context,
        }
    }

    /// An inflater with a negotiated LZ77 window size (9..=15).
    #[cfg(feature = "zlib")]
    pub fn with_window_bits(window_bits: u8, reset_context: bool) -> Self {
        Self {
            output: BytesMut::with_capacity(1024),
            decompress: flate2::Decompress::new_with_window_bits(false, window_bits),
            reset_context,
        }
    }

    /// Inflates one message payload (as received, without the flush tail).
    pub fn inflate(&mut self, input: &[u8]) -> io::Result<BytesMut> {
        if self.reset_context {
            self.decompress.reset(false);
        }
        self.write(input)?;
        // Re-append the block the sender stripped (RFC 7692 Section 7.2.2).
        self.write(&DEFLATE_TAIL)?;
        self.flush()
    }

    fn write(&mut self, mut input: &[u8]) -> io::Result<()> {
        while !input.is_empty() {
            let dst = spare(&mut self.output);

            let before_out = self.decompress.total_out();
            let before_in = self.decompress.total_in();

            let status = self
                .decompress
                .decompress(input, dst, flate2::FlushDecompress::None);

            let written = (self.decompress.total_out() - before_out) as usize;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            unsafe { self.output.advance_mut(written) };
            input = &input[consumed..];

            match status {
                Ok(Status::Ok | Status::BufError | Status::StreamEnd) => {}
                Err(_) => return Err(corrupt_stream()),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<BytesMut> {
        let dst = spare(&mut self.output);
        let before_out = self.decompress.total_out();
        self.decompress
            .decompress(&[], dst, flate2::FlushDecompress::Sync)
            .map_err(|_| corrupt_stream())?;
        let written = (self.decompress.total_out() - before_out) as usize;
        unsafe { self.output.advance_mut(written) };

        loop {
            let dst = spare(&mut self.output);
            let before_out = self.decompress.total_out();
            self.decompress
                .decompress(&[], dst, flate2::FlushDecompress::None)
                .map_err(|_| corrupt_stream())?;

            if before_out == self.decompress.total_out() {
                break Ok(self.output.split());
            }

            let written = (self.decompress.total_out() - before_out) as usize;
            unsafe { self.output.advance_mut(written) };
        }
    }
}
