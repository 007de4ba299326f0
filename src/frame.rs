//! Logical WebSocket frames.
//!
//! The wire format ([RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2))
//! is handled by the framers in [`crate::codec`]; this module defines the
//! decoded, typed view the endpoint controller works with, the opcode
//! registry, and the close-frame payload layout.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```

use bytes::Bytes;

use crate::close::CloseCode;

/// Control frames may carry at most 125 payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// A close frame's reason fits in 125 bytes minus the two-byte code.
pub const MAX_CLOSE_REASON: usize = 123;

/// Frame type identifier, 4 bits on the wire.
///
/// `Continuation`, `Text` and `Binary` are data opcodes; `Close`, `Ping`
/// and `Pong` are control opcodes. The ranges 0x3–0x7 and 0xB–0xF are
/// reserved and rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Control frames manage the connection and must not be fragmented.
    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Text and binary start a new message.
    pub fn starts_message(&self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }

    pub(crate) fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }
}

impl From<OpCode> for u8 {
    fn from(opcode: OpCode) -> u8 {
        match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A protocol violation detected by the input framer.
///
/// These are never transmitted; the controller turns them into a local
/// close with code 1002 and the display string as the reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("Reserved bits must be zero")]
    ReservedBitsNonzero,
    #[error("Invalid opcode ({0:#x})")]
    InvalidOpcode(u8),
    #[error("Masked payload forbidden")]
    MaskedPayloadForbidden,
    #[error("Unmasked payload forbidden")]
    UnmaskedPayloadForbidden,
    #[error("Continuation frame outside a message")]
    UnexpectedContinuation,
    #[error("Message started before the previous one finished")]
    MessageAlreadyInProgress,
    #[error("Control frames must not be fragmented")]
    FragmentedControlFrame,
    #[error("Control frame payload too long")]
    OversizedControlFrame,
    #[error("Invalid payload length")]
    InvalidLength,
    #[error("Unexpected compressed frame")]
    UnexpectedCompressedFrame,
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,
    #[error("Invalid close frame payload")]
    BadClosePayload,
    #[error("Invalid compressed payload")]
    BadDeflatePayload,
}

/// A decoded logical frame.
///
/// `ProtocolError` and `MessageTooBig` only flow from the input framer to
/// the controller; the output framer refuses to encode them.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close(Option<CloseCode>, String),
    Ping(Bytes),
    Pong(Bytes),
    ProtocolError(Violation),
    MessageTooBig,
}

impl Frame {
    pub fn text(payload: impl Into<String>) -> Self {
        Frame::Text(payload.into())
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Frame::Binary(payload.into())
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Frame::Ping(payload.into())
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Frame::Pong(payload.into())
    }

    /// The wire opcode, for frames that have one.
    pub fn opcode(&self) -> Option<OpCode> {
        match self {
            Frame::Text(_) => Some(OpCode::Text),
            Frame::Binary(_) => Some(OpCode::Binary),
            Frame::Close(..) => Some(OpCode::Close),
            Frame::Ping(_) => Some(OpCode::Ping),
            Frame::Pong(_) => Some(OpCode::Pong),
            Frame::ProtocolError(_) | Frame::MessageTooBig => None,
        }
    }
}

/// Truncates `text` to at most `max` bytes without splitting a codepoint.
pub(crate) fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Builds a close frame payload: empty when no code is given, otherwise the
/// big-endian code followed by the reason truncated to fit a control frame.
pub(crate) fn encode_close_payload(code: Option<CloseCode>, reason: &str) -> Bytes {
    let Some(code) = code else {
        return Bytes::new();
    };
    let reason = truncate_utf8(reason, MAX_CLOSE_REASON);
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&u16::from(code).to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload.into()
}

/// Decodes a close frame payload into an optional code and a reason.
///
/// An empty payload means "no code"; a one-byte payload is malformed, as is
/// a reason that is not UTF-8.
pub(crate) fn decode_close_payload(payload: &[u8]) -> Result<(Option<CloseCode>, String), Violation> {
    match payload.len() {
        0 => Ok((None, String::new())),
        1 => Err(Violation::BadClosePayload),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason = std::str::from_utf8(&payload[2..])
                .map_err(|_| Violation::BadClosePayload)?
                .to_owned();
            Ok((Some(CloseCode::from(code)), reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod opcode_tests {
        use super::*;

        #[test]
        fn control_classification() {
            assert!(OpCode::Close.is_control());
            assert!(OpCode::Ping.is_control());
            assert!(OpCode::Pong.is_control());
            assert!(!OpCode::Continuation.is_control());
            assert!(!OpCode::Text.is_control());
            assert!(!OpCode::Binary.is_control());
        }

        #[test]
        fn wire_round_trip() {
            for opcode in [
                OpCode::Continuation,
                OpCode::Text,
                OpCode::Binary,
                OpCode::Close,
                OpCode::Ping,
                OpCode::Pong,
            ] {
                assert_eq!(OpCode::from_wire(u8::from(opcode)), Some(opcode));
            }
        }

        #[test]
        fn reserved_values_rejected() {
            for value in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
                assert_eq!(OpCode::from_wire(value), None);
            }
        }
    }

    mod close_payload_tests {
        use super::*;

        #[test]
        fn no_code_is_empty() {
            assert!(encode_close_payload(None, "ignored").is_empty());
        }

        #[test]
        fn code_and_reason_round_trip() {
            let payload = encode_close_payload(Some(CloseCode::GoingAway), "bye");
            assert_eq!(&payload[..2], &1001u16.to_be_bytes());
            let (code, reason) = decode_close_payload(&payload).unwrap();
            assert_eq!(code, Some(CloseCode::GoingAway));
            assert_eq!(reason, "bye");
        }

        #[test]
        fn empty_payload_decodes_to_no_code() {
            assert_eq!(decode_close_payload(&[]).unwrap(), (None, String::new()));
        }

        #[test]
        fn one_byte_payload_is_malformed() {
            assert_eq!(
                decode_close_payload(&[0x03]),
                Err(Violation::BadClosePayload)
            );
        }

        #[test]
        fn bad_utf8_reason_is_malformed() {
            assert_eq!(
                decode_close_payload(&[0x03, 0xE8, 0xFF, 0xFE]),
                Err(Violation::BadClosePayload)
            );
        }

        #[test]
        fn reason_truncates_on_codepoint_boundary() {
            // 62 two-byte codepoints = 124 bytes; the 123-byte limit must
            // not split the final one.
            let reason = "é".repeat(62);
            let payload = encode_close_payload(Some(CloseCode::Normal), &reason);
            assert_eq!(payload.len(), 2 + 122);
            let (_, decoded) = decode_close_payload(&payload).unwrap();
            assert_eq!(decoded, "é".repeat(61));
        }
    }

    #[test]
    fn truncate_utf8_boundaries() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
        assert_eq!(truncate_utf8("hello", 3), "hel");
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("héllo", 3), "hé");
    }
}
