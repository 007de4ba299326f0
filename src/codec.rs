//! Bidirectional frame codec.
//!
//! [`OutputFramer`] turns a logical [`Frame`] into wire buffers: a header
//! plus an optionally masked (and optionally compressed) payload. Every
//! outbound application message is a single FIN frame; the library never
//! fragments outgoing messages.
//!
//! [`InputFramer`] is an incremental byte-driven state machine. Bytes go in
//! through [`receive`](InputFramer::receive) in whatever chunks the
//! transport produces; decoded frames (or typed protocol errors) come out
//! of [`next`](InputFramer::next). It enforces mask direction, reassembles
//! fragmented messages, inflates compressed messages on their final frame,
//! and applies the maximum-message-size policy against declared lengths
//! before buffering payload bytes. Any protocol error or an oversized
//! message latches the framer: everything after the fatal frame is ignored.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::close::CloseCode;
use crate::compression::{Deflater, Inflater};
use crate::frame::{
    self, Frame, OpCode, Violation, MAX_CONTROL_PAYLOAD,
};
use crate::mask::apply_mask;
use crate::stats::DirectionStats;
use crate::Role;

/// Longest possible frame header: 2 bytes, 8 length bytes, 4 mask bytes.
const MAX_HEADER: usize = 14;

// ================ OutputFramer ====================

/// Encodes logical frames into wire bytes for one endpoint's outbound
/// direction.
pub struct OutputFramer {
    role: Role,
    deflater: Option<Deflater>,
    /// Outbound traffic counters, sampled by the endpoint.
    pub(crate) stats: DirectionStats,
}

impl OutputFramer {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            deflater: None,
            stats: DirectionStats::default(),
        }
    }

    /// Installs the negotiated compressor. Until this is called, requests
    /// to compress are ignored and payloads go out verbatim.
    pub fn enable_compression(&mut self, deflater: Deflater) {
        self.deflater = Some(deflater);
    }

    pub fn compression_available(&self) -> bool {
        self.deflater.is_some()
    }

    /// Encodes `frame` into wire buffers: the header, then the payload when
    /// non-empty. `compress` asks for per-message compression; it only
    /// applies to text and binary frames and only when a compressor was
    /// negotiated.
    pub fn encode(&mut self, frame: &Frame, compress: bool) -> std::io::Result<Vec<Bytes>> {
        let (opcode, payload, compressed) = match frame {
            Frame::Text(text) => {
                self.stats.record_text(text.len());
                self.prepare_data(OpCode::Text, text.as_bytes(), compress)?
            }
            Frame::Binary(data) => {
                self.stats.record_binary(data.len());
                self.prepare_data(OpCode::Binary, data, compress)?
            }
            Frame::Close(code, reason) => {
                self.stats.record_control();
                // Restricted codes never go on the wire.
                let code = code.filter(|c| !c.is_restricted());
                let payload = frame::encode_close_payload(code, reason);
                (OpCode::Close, BytesMut::from(&payload[..]), false)
            }
            Frame::Ping(data) => {
                self.stats.record_control();
                (OpCode::Ping, truncate_control(data), false)
            }
            Frame::Pong(data) => {
                self.stats.record_control();
                (OpCode::Pong, truncate_control(data), false)
            }
            Frame::ProtocolError(_) | Frame::MessageTooBig => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "frame is not transmittable",
                ));
            }
        };

        Ok(self.write_frame(opcode, payload, compressed))
    }

    fn prepare_data(
        &mut self,
        opcode: OpCode,
        payload: &[u8],
        compress: bool,
    ) -> std::io::Result<(OpCode, BytesMut, bool)> {
        if compress {
            if let Some(deflater) = self.deflater.as_mut() {
                let compressed = deflater.deflate(payload)?;
                self.stats.record_compressed(payload.len(), compressed.len());
                return Ok((opcode, compressed, true));
            }
        }
        Ok((opcode, BytesMut::from(payload), false))
    }

    fn write_frame(&mut self, opcode: OpCode, mut payload: BytesMut, compressed: bool) -> Vec<Bytes> {
        let mask = match self.role {
            Role::Server => None,
            Role::Client => Some(fresh_mask_key()),
        };

        let mut header = BytesMut::with_capacity(MAX_HEADER);
        // Single-frame messages only: FIN is always set.
        header.extend_from_slice(&[0x80 | (compressed as u8) << 6 | u8::from(opcode)]);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        let len = payload.len();
        if len < 126 {
            header.extend_from_slice(&[mask_bit | len as u8]);
        } else if len < 65536 {
            header.extend_from_slice(&[mask_bit | 126]);
            header.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            header.extend_from_slice(&[mask_bit | 127]);
            header.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if let Some(key) = mask {
            header.extend_from_slice(&key);
            apply_mask(&mut payload, key);
        }

        let mut buffers = vec![header.freeze()];
        if !payload.is_empty() {
            buffers.push(payload.freeze());
        }
        buffers
    }
}

/// A fresh non-zero random masking key.
fn fresh_mask_key() -> [u8; 4] {
    loop {
        let key: [u8; 4] = rand::random();
        if key != [0; 4] {
            return key;
        }
    }
}

/// Control frames carry at most 125 bytes; longer inputs are cut off.
fn truncate_control(data: &Bytes) -> BytesMut {
    let end = data.len().min(MAX_CONTROL_PAYLOAD);
    BytesMut::from(&data[..end])
}

// ================ InputFramer ====================

/// Parser position within a frame, mirroring the wire layout.
enum State {
    /// Expecting the first header byte (FIN, RSV, opcode).
    Opcode,
    /// Expecting the second header byte (MASK, 7-bit length).
    Length { header: FrameHeader },
    /// Collecting a 16-bit extended length.
    ShortExtendedLength { header: FrameHeader, buf: [u8; 2], got: usize },
    /// Collecting a 64-bit extended length.
    LongExtendedLength { header: FrameHeader, buf: [u8; 8], got: usize },
    /// Collecting the 4-byte masking key.
    MaskKey { header: FrameHeader, len: usize, buf: [u8; 4], got: usize },
    /// Collecting a data frame's payload.
    MessagePayload { header: FrameHeader, mask: Option<[u8; 4]>, collected: BytesMut, remaining: usize },
    /// Collecting a control frame's payload.
    ControlPayload { header: FrameHeader, mask: Option<[u8; 4]>, collected: BytesMut, remaining: usize },
}

/// The fixed part of a frame header, known after the first two bytes.
#[derive(Clone, Copy)]
struct FrameHeader {
    fin: bool,
    rsv1: bool,
    opcode: OpCode,
    masked: bool,
}

/// A fragmented message being reassembled.
struct MessageInProgress {
    opcode: OpCode,
    compressed: bool,
    payload: BytesMut,
}

/// Decodes wire bytes into logical frames for one endpoint's inbound
/// direction.
pub struct InputFramer {
    role: Role,
    max_message_size: usize,
    inflater: Option<Inflater>,
    state: State,
    message: Option<MessageInProgress>,
    decoded: VecDeque<Frame>,
    failed: bool,
    /// Inbound traffic counters, sampled by the endpoint.
    pub(crate) stats: DirectionStats,
}

impl InputFramer {
    pub fn new(role: Role, max_message_size: usize) -> Self {
        Self {
            role,
            max_message_size,
            inflater: None,
            state: State::Opcode,
            message: None,
            decoded: VecDeque::new(),
            failed: false,
            stats: DirectionStats::default(),
        }
    }

    /// Installs the negotiated decompressor; RSV1 frames are rejected until
    /// this is called.
    pub fn enable_compression(&mut self, inflater: Inflater) {
        self.inflater = Some(inflater);
    }

    /// Whether a fatal frame has been emitted; all further input is
    /// ignored.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Takes the next decoded frame, if any.
    pub fn next(&mut self) -> Option<Frame> {
        self.decoded.pop_front()
    }

    /// Feeds transport bytes into the state machine.
    pub fn receive(&mut self, input: &[u8]) {
        let mut rest = input;
        while !rest.is_empty() && !self.failed {
            rest = self.step(rest);
        }
    }

    /// Consumes as much of `input` as the current state allows, returning
    /// the remainder.
    fn step<'a>(&mut self, input: &'a [u8]) -> &'a [u8] {
        match &mut self.state {
            State::Opcode => {
                self.on_opcode_byte(input[0]);
                &input[1..]
            }
            State::Length { header } => {
                let header = *header;
                self.on_length_byte(header, input[0]);
                &input[1..]
            }
            State::ShortExtendedLength { header, buf, got } => {
                let take = (buf.len() - *got).min(input.len());
                buf[*got..*got + take].copy_from_slice(&input[..take]);
                *got += take;
                if *got == buf.len() {
                    let header = *header;
                    let len = u16::from_be_bytes(*buf) as u64;
                    self.on_length(header, len);
                }
                &input[take..]
            }
            State::LongExtendedLength { header, buf, got } => {
                let take = (buf.len() - *got).min(input.len());
                buf[*got..*got + take].copy_from_slice(&input[..take]);
                *got += take;
                if *got == buf.len() {
                    let header = *header;
                    let len = u64::from_be_bytes(*buf);
                    self.on_length(header, len);
                }
                &input[take..]
            }
            State::MaskKey { header, len, buf, got } => {
                let take = (buf.len() - *got).min(input.len());
                buf[*got..*got + take].copy_from_slice(&input[..take]);
                *got += take;
                if *got == buf.len() {
                    let (header, len, key) = (*header, *len, *buf);
                    self.enter_payload(header, Some(key), len);
                }
                &input[take..]
            }
            State::MessagePayload { collected, remaining, .. }
            | State::ControlPayload { collected, remaining, .. } => {
                let take = (*remaining).min(input.len());
                collected.extend_from_slice(&input[..take]);
                *remaining -= take;
                if *remaining == 0 {
                    self.finish_payload();
                }
                &input[take..]
            }
        }
    }

    fn fail(&mut self, violation: Violation) {
        self.decoded.push_back(Frame::ProtocolError(violation));
        self.failed = true;
    }

    fn on_opcode_byte(&mut self, byte: u8) {
        let fin = byte & 0x80 != 0;
        let rsv1 = byte & 0x40 != 0;
        if byte & 0x30 != 0 {
            return self.fail(Violation::ReservedBitsNonzero);
        }
        let Some(opcode) = OpCode::from_wire(byte & 0x0F) else {
            return self.fail(Violation::InvalidOpcode(byte & 0x0F));
        };

        if opcode.is_control() {
            if !fin {
                return self.fail(Violation::FragmentedControlFrame);
            }
            if rsv1 {
                return self.fail(Violation::UnexpectedCompressedFrame);
            }
        } else if opcode.starts_message() {
            if self.message.is_some() {
                return self.fail(Violation::MessageAlreadyInProgress);
            }
            // RSV1 marks a compressed message, valid only when the
            // extension was negotiated, and only on the start frame.
            if rsv1 && self.inflater.is_none() {
                return self.fail(Violation::UnexpectedCompressedFrame);
            }
        } else {
            if self.message.is_none() {
                return self.fail(Violation::UnexpectedContinuation);
            }
            if rsv1 {
                return self.fail(Violation::UnexpectedCompressedFrame);
            }
        }

        self.state = State::Length {
            header: FrameHeader {
                fin,
                rsv1,
                opcode,
                masked: false,
            },
        };
    }

    fn on_length_byte(&mut self, mut header: FrameHeader, byte: u8) {
        header.masked = byte & 0x80 != 0;
        match (self.role, header.masked) {
            // A client must never receive masked frames, a server must
            // never receive unmasked ones.
            (Role::Client, true) => return self.fail(Violation::MaskedPayloadForbidden),
            (Role::Server, false) => return self.fail(Violation::UnmaskedPayloadForbidden),
            _ => {}
        }

        let length_code = byte & 0x7F;
        if header.opcode.is_control() && length_code as usize > MAX_CONTROL_PAYLOAD {
            return self.fail(Violation::OversizedControlFrame);
        }

        match length_code {
            126 => {
                self.state = State::ShortExtendedLength {
                    header,
                    buf: [0; 2],
                    got: 0,
                };
            }
            127 => {
                self.state = State::LongExtendedLength {
                    header,
                    buf: [0; 8],
                    got: 0,
                };
            }
            len => self.on_length(header, len as u64),
        }
    }

    /// Runs once the full declared length is known, before any payload byte
    /// is buffered.
    fn on_length(&mut self, header: FrameHeader, declared: u64) {
        if declared > i64::MAX as u64 {
            return self.fail(Violation::InvalidLength);
        }
        let Ok(len) = usize::try_from(declared) else {
            return self.fail(Violation::InvalidLength);
        };

        if !header.opcode.is_control() {
            let buffered = self.message.as_ref().map_or(0, |m| m.payload.len());
            if buffered.saturating_add(len) > self.max_message_size {
                self.decoded.push_back(Frame::MessageTooBig);
                self.failed = true;
                return;
            }
        }

        if header.masked {
            self.state = State::MaskKey {
                header,
                len,
                buf: [0; 4],
                got: 0,
            };
        } else {
            self.enter_payload(header, None, len);
        }
    }

    fn enter_payload(&mut self, header: FrameHeader, mask: Option<[u8; 4]>, len: usize) {
        let collected = BytesMut::with_capacity(len.min(64 * 1024));
        if header.opcode.is_control() {
            self.state = State::ControlPayload {
                header,
                mask,
                collected,
                remaining: len,
            };
        } else {
            self.state = State::MessagePayload {
                header,
                mask,
                collected,
                remaining: len,
            };
        }
        if len == 0 {
            self.finish_payload();
        }
    }

    fn finish_payload(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Opcode);
        let (header, mask, mut collected, control) = match state {
            State::MessagePayload { header, mask, collected, .. } => {
                (header, mask, collected, false)
            }
            State::ControlPayload { header, mask, collected, .. } => {
                (header, mask, collected, true)
            }
            _ => unreachable!("finish_payload outside a payload state"),
        };

        if let Some(key) = mask {
            apply_mask(&mut collected, key);
        }

        if control {
            self.finish_control_frame(header.opcode, collected.freeze());
        } else {
            self.finish_data_frame(header, collected);
        }
    }

    fn finish_control_frame(&mut self, opcode: OpCode, payload: Bytes) {
        self.stats.record_control();
        match opcode {
            OpCode::Ping => self.decoded.push_back(Frame::Ping(payload)),
            OpCode::Pong => self.decoded.push_back(Frame::Pong(payload)),
            OpCode::Close => match frame::decode_close_payload(&payload) {
                Ok((code, reason)) => self.decoded.push_back(Frame::Close(code, reason)),
                Err(violation) => self.fail(violation),
            },
            _ => unreachable!("data opcode in control path"),
        }
    }

    fn finish_data_frame(&mut self, header: FrameHeader, collected: BytesMut) {
        match self.message.as_mut() {
            Some(message) => message.payload.extend_from_slice(&collected),
            None => {
                self.message = Some(MessageInProgress {
                    opcode: header.opcode,
                    compressed: header.rsv1,
                    payload: collected,
                });
            }
        }

        if !header.fin {
            return;
        }
        let MessageInProgress {
            opcode,
            compressed,
            payload,
        } = self.message.take().expect("message in progress");

        let payload = if compressed {
            let inflater = self.inflater.as_mut().expect("negotiated inflater");
            match inflater.inflate(&payload) {
                Ok(inflated) => {
                    self.stats.record_compressed(inflated.len(), payload.len());
                    inflated
                }
                Err(_) => return self.fail(Violation::BadDeflatePayload),
            }
        } else {
            payload
        };

        match opcode {
            OpCode::Text => match String::from_utf8(payload.to_vec()) {
                Ok(text) => {
                    self.stats.record_text(text.len());
                    self.decoded.push_back(Frame::Text(text));
                }
                Err(_) => self.fail(Violation::InvalidUtf8),
            },
            OpCode::Binary => {
                self.stats.record_binary(payload.len());
                self.decoded.push_back(Frame::Binary(payload.freeze()));
            }
            _ => unreachable!("continuation cannot start a message"),
        }
    }
}
