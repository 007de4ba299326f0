//! Minimal incremental HTTP/1.1 message codec.
//!
//! Just enough of HTTP/1.1 to carry the WebSocket opening handshake plus
//! short bodies on rejection responses: an append-and-poll parser built on
//! [`tokio_util::codec::Decoder`] and an encoder producing header blocks in
//! a fixed order. Bodies are framed by `Content-Length`, by chunked
//! transfer-encoding, or (responses only, when the status permits content)
//! by connection close.
//!
//! Header names are lower-cased on parse; duplicate headers fold with a
//! `", "` join; folded continuation lines (obs-fold) are tolerated. Header
//! bytes are ISO-8859-1 in both directions.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::params::Parameterized;

/// Maximum allowed header block size (64 KiB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of headers.
const MAX_HEADERS: usize = 128;

/// Maximum allowed start-line length.
const MAX_START_LINE: usize = 8192;

/// Maximum allowed body size (16 MiB).
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Maximum chunk-size line length.
const MAX_CHUNK_LINE: usize = 1024;

/// Header names a caller may not supply as extras; they are owned by the
/// handshake machinery and silently dropped when encoding.
const OWNED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "expect",
    "host",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Returns `true` for header names the library reserves for itself:
/// anything starting with `sec-` or `proxy-`, plus the connection-control
/// set. Matching is case-insensitive.
pub fn is_forbidden_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("sec-")
        || lower.starts_with("proxy-")
        || OWNED_HEADERS.contains(&lower.as_str())
}

/// Whether a response status permits a message body (RFC 7230 3.3.3):
/// false for 1xx, 204 and 304.
pub fn allows_content(status: u16) -> bool {
    !matches!(status, 100..=199 | 204 | 304)
}

/// Malformed or oversized HTTP traffic.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed start line")]
    BadStartLine,
    #[error("malformed header line")]
    BadHeader,
    #[error("malformed HTTP version")]
    BadVersion,
    #[error("invalid Content-Length")]
    BadContentLength,
    #[error("malformed chunked encoding")]
    BadChunk,
    #[error("header block too large")]
    HeadersTooLarge,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("start line too long")]
    StartLineTooLong,
    #[error("body exceeds size limit")]
    BodyTooLarge,
    #[error("connection closed mid-message")]
    TruncatedMessage,
    #[error("header value is not ISO-8859-1")]
    NotLatin1,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Case-insensitive header map preserving insertion order.
///
/// Names are stored lower-cased. [`append`](Self::append) folds repeated
/// names with `", "`, matching how the parser combines duplicate headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the folded value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces any existing value for `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Adds a value for `name`, folding with `", "` if already present.
    pub fn append(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1.push_str(", ");
            entry.1.push_str(value);
        } else {
            self.entries.push((name, value.to_owned()));
        }
    }

    pub fn remove(&mut self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.entries.retain(|(n, _)| *n != name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Splits a header value on commas into trimmed, non-empty tokens.
    pub fn token_list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Case-insensitive membership test in a comma-separated token list.
    pub fn token_list_contains(&self, name: &str, token: &str) -> bool {
        self.token_list(name)
            .iter()
            .any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Parses `Content-Type` through the parameterized-token codec.
    pub fn content_type(&self) -> Option<Parameterized> {
        self.get("content-type")
            .and_then(|v| Parameterized::parse(v).ok())
    }

    /// Parses `Sec-WebSocket-Extensions` as a list of offers; unparsable
    /// values are dropped rather than failing the whole header.
    pub fn sec_websocket_extensions(&self) -> Vec<Parameterized> {
        self.get("sec-websocket-extensions")
            .and_then(|v| Parameterized::parse_list(v).ok())
            .unwrap_or_default()
    }

    fn content_length(&self) -> Result<Option<usize>, HttpError> {
        match self.get("content-length") {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| HttpError::BadContentLength),
        }
    }

    fn is_chunked(&self) -> bool {
        self.token_list_contains("transfer-encoding", "chunked")
    }
}

/// A parsed HTTP/1.1 request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: (u8, u8),
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Request {
    /// A bodyless GET request for `target`.
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            method: "GET".to_owned(),
            target: target.into(),
            version: (1, 1),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

/// A parsed HTTP/1.1 response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub version: (u8, u8),
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            version: (1, 1),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// A plain-text response with `Content-Type` and `Content-Length` set.
    pub fn plain_text(status: u16, reason: &str, body: &str) -> Self {
        let mut response = Self::new(status, reason);
        response
            .headers
            .set("content-type", "text/plain; charset=utf-8");
        response
            .headers
            .set("content-length", body.len().to_string());
        response.body = body.as_bytes().to_vec();
        response
    }
}

// ================ Parsing ====================

/// The start line of either message kind.
trait StartLine: Sized {
    /// Parse the first non-empty line of the head.
    fn parse(line: &str) -> Result<Self, HttpError>;
    /// Attach the parsed headers.
    fn with_headers(self, headers: Headers) -> Self;
    fn headers(&self) -> &Headers;
    fn set_body(&mut self, body: Vec<u8>);
    /// Whether a head without explicit body framing reads until EOF.
    fn reads_to_eof(&self) -> bool;
}

fn parse_version(text: &str) -> Result<(u8, u8), HttpError> {
    let rest = text.strip_prefix("HTTP/").ok_or(HttpError::BadVersion)?;
    let (major, minor) = rest.split_once('.').ok_or(HttpError::BadVersion)?;
    let major = major.parse().map_err(|_| HttpError::BadVersion)?;
    let minor = minor.parse().map_err(|_| HttpError::BadVersion)?;
    Ok((major, minor))
}

impl StartLine for Request {
    fn parse(line: &str) -> Result<Self, HttpError> {
        let mut parts = line.split_ascii_whitespace();
        let method = parts.next().ok_or(HttpError::BadStartLine)?;
        let target = parts.next().ok_or(HttpError::BadStartLine)?;
        let version = parts.next().ok_or(HttpError::BadStartLine)?;
        if parts.next().is_some() {
            return Err(HttpError::BadStartLine);
        }
        Ok(Request {
            method: method.to_owned(),
            target: target.to_owned(),
            version: parse_version(version)?,
            headers: Headers::new(),
            body: Vec::new(),
        })
    }

    fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    fn reads_to_eof(&self) -> bool {
        // Requests without body framing have no body.
        false
    }
}

impl StartLine for Response {
    fn parse(line: &str) -> Result<Self, HttpError> {
        let (version, rest) = line.split_once(' ').ok_or(HttpError::BadStartLine)?;
        let (status, reason) = match rest.split_once(' ') {
            Some((status, reason)) => (status, reason),
            None => (rest, ""),
        };
        if status.len() != 3 {
            return Err(HttpError::BadStartLine);
        }
        let status: u16 = status.parse().map_err(|_| HttpError::BadStartLine)?;
        Ok(Response {
            status,
            reason: reason.trim().to_owned(),
            version: parse_version(version)?,
            headers: Headers::new(),
            body: Vec::new(),
        })
    }

    fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    fn reads_to_eof(&self) -> bool {
        allows_content(self.status)
    }
}

/// Find the end of the header block, returning the index just past
/// `\r\n\r\n`.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Decode the ISO-8859-1 head block into a string (every byte maps to the
/// code point of the same value).
fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn parse_head<M: StartLine>(src: &mut BytesMut) -> Result<Option<M>, HttpError> {
    // Tolerate stray empty lines before the start line.
    while src.starts_with(b"\r\n") {
        src.advance(2);
    }

    let Some(end) = find_head_end(src.as_ref()) else {
        if src.len() > MAX_HEAD_SIZE {
            return Err(HttpError::HeadersTooLarge);
        }
        if let Some(line_end) = src.as_ref().windows(2).position(|w| w == b"\r\n") {
            if line_end > MAX_START_LINE {
                return Err(HttpError::StartLineTooLong);
            }
        } else if src.len() > MAX_START_LINE {
            return Err(HttpError::StartLineTooLong);
        }
        return Ok(None);
    };
    if end > MAX_HEAD_SIZE {
        return Err(HttpError::HeadersTooLarge);
    }

    let head_bytes = src.split_to(end);
    let head = latin1_to_string(&head_bytes[..end - 4]);

    let mut lines = head.split("\r\n");
    let start_line = lines.next().ok_or(HttpError::BadStartLine)?;
    if start_line.len() > MAX_START_LINE {
        return Err(HttpError::StartLineTooLong);
    }
    let message = M::parse(start_line)?;

    let mut headers = Headers::new();
    let mut last_name: Option<String> = None;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        // Obs-fold: a continuation line extends the previous value.
        if line.starts_with(' ') || line.starts_with('\t') {
            let name = last_name.as_deref().ok_or(HttpError::BadHeader)?;
            let folded = format!("{} {}", headers.get(name).unwrap_or(""), line.trim());
            headers.set(name, folded);
            continue;
        }
        let (name, value) = line.split_once(':').ok_or(HttpError::BadHeader)?;
        let name = name.trim();
        if name.is_empty() || name.contains(' ') {
            return Err(HttpError::BadHeader);
        }
        headers.append(name, value.trim());
        last_name = Some(name.to_ascii_lowercase());
        if headers.len() > MAX_HEADERS {
            return Err(HttpError::TooManyHeaders);
        }
    }

    Ok(Some(message.with_headers(headers)))
}

#[derive(Debug)]
enum ChunkPhase {
    SizeLine,
    Data { remaining: usize },
    DataCrlf,
    Trailer,
}

/// Incremental hex-length chunked-body decoder. Trailer headers are read
/// and discarded; the handshake has no use for them.
#[derive(Debug)]
struct ChunkedDecoder {
    phase: ChunkPhase,
    body: Vec<u8>,
}

impl ChunkedDecoder {
    fn new() -> Self {
        Self {
            phase: ChunkPhase::SizeLine,
            body: Vec::new(),
        }
    }

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, HttpError> {
        loop {
            match self.phase {
                ChunkPhase::SizeLine => {
                    let Some(line) = split_crlf_line(src, MAX_CHUNK_LINE)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.phase = ChunkPhase::Trailer;
                        continue;
                    }
                    if self.body.len().saturating_add(size) > MAX_BODY_SIZE {
                        return Err(HttpError::BodyTooLarge);
                    }
                    self.phase = ChunkPhase::Data { remaining: size };
                }
                ChunkPhase::Data { remaining } => {
                    if src.len() < remaining {
                        return Ok(None);
                    }
                    self.body.extend_from_slice(&src.split_to(remaining));
                    self.phase = ChunkPhase::DataCrlf;
                }
                ChunkPhase::DataCrlf => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(HttpError::BadChunk);
                    }
                    src.advance(2);
                    self.phase = ChunkPhase::SizeLine;
                }
                ChunkPhase::Trailer => {
                    let Some(line) = split_crlf_line(src, MAX_HEAD_SIZE)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.phase = ChunkPhase::SizeLine;
                        return Ok(Some(std::mem::take(&mut self.body)));
                    }
                }
            }
        }
    }
}

fn split_crlf_line(src: &mut BytesMut, max_len: usize) -> Result<Option<BytesMut>, HttpError> {
    let Some(end) = src.as_ref().windows(2).position(|w| w == b"\r\n") else {
        if src.len() > max_len {
            return Err(HttpError::BadChunk);
        }
        return Ok(None);
    };
    if end > max_len {
        return Err(HttpError::BadChunk);
    }
    let line = src.split_to(end);
    src.advance(2);
    Ok(Some(line))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, HttpError> {
    let line = std::str::from_utf8(line).map_err(|_| HttpError::BadChunk)?;
    // Chunk extensions after ';' are tolerated and ignored.
    let size = line.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(HttpError::BadChunk);
    }
    usize::from_str_radix(size, 16).map_err(|_| HttpError::BadChunk)
}

#[derive(Debug)]
enum DecodeState<M> {
    Head,
    FixedBody { message: M, remaining: usize },
    ChunkedBody { message: M, chunks: ChunkedDecoder },
    EofBody { message: M, body: Vec<u8> },
}

/// Shared decode loop for requests and responses.
fn decode_message<M: StartLine>(
    state: &mut DecodeState<M>,
    src: &mut BytesMut,
    at_eof: bool,
) -> Result<Option<M>, HttpError> {
    loop {
        match state {
            DecodeState::Head => {
                let Some(message) = parse_head::<M>(src)? else {
                    if at_eof && !src.is_empty() {
                        return Err(HttpError::TruncatedMessage);
                    }
                    return Ok(None);
                };

                if let Some(length) = message.headers().content_length()? {
                    if length > MAX_BODY_SIZE {
                        return Err(HttpError::BodyTooLarge);
                    }
                    if length == 0 {
                        return Ok(Some(message));
                    }
                    *state = DecodeState::FixedBody {
                        message,
                        remaining: length,
                    };
                } else if message.headers().is_chunked() {
                    *state = DecodeState::ChunkedBody {
                        message,
                        chunks: ChunkedDecoder::new(),
                    };
                } else if message.reads_to_eof() {
                    *state = DecodeState::EofBody {
                        message,
                        body: Vec::new(),
                    };
                } else {
                    return Ok(Some(message));
                }
            }
            DecodeState::FixedBody { remaining, .. } => {
                if src.len() < *remaining {
                    if at_eof {
                        return Err(HttpError::TruncatedMessage);
                    }
                    return Ok(None);
                }
                let body = src.split_to(*remaining).to_vec();
                let DecodeState::FixedBody { mut message, .. } =
                    std::mem::replace(state, DecodeState::Head)
                else {
                    unreachable!()
                };
                message.set_body(body);
                return Ok(Some(message));
            }
            DecodeState::ChunkedBody { chunks, .. } => {
                let Some(body) = chunks.decode(src)? else {
                    if at_eof {
                        return Err(HttpError::TruncatedMessage);
                    }
                    return Ok(None);
                };
                let DecodeState::ChunkedBody { mut message, .. } =
                    std::mem::replace(state, DecodeState::Head)
                else {
                    unreachable!()
                };
                message.set_body(body);
                return Ok(Some(message));
            }
            DecodeState::EofBody { body, .. } => {
                body.extend_from_slice(src);
                src.clear();
                if !at_eof {
                    return Ok(None);
                }
                if body.len() > MAX_BODY_SIZE {
                    return Err(HttpError::BodyTooLarge);
                }
                let DecodeState::EofBody { mut message, body } =
                    std::mem::replace(state, DecodeState::Head)
                else {
                    unreachable!()
                };
                message.set_body(body);
                return Ok(Some(message));
            }
        }
    }
}

/// Server-side codec: decodes requests, encodes responses.
pub struct RequestCodec {
    state: DecodeState<Request>,
}

impl RequestCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
        }
    }
}

impl Default for RequestCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = HttpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, HttpError> {
        decode_message(&mut self.state, src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Request>, HttpError> {
        decode_message(&mut self.state, src, true)
    }
}

impl Encoder<Response> for RequestCodec {
    type Error = HttpError;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), HttpError> {
        encode_response(&response, dst)
    }
}

/// Client-side codec: decodes responses, encodes requests.
pub struct ResponseCodec {
    state: DecodeState<Response>,
}

impl ResponseCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
        }
    }
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ResponseCodec {
    type Item = Response;
    type Error = HttpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, HttpError> {
        decode_message(&mut self.state, src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Response>, HttpError> {
        decode_message(&mut self.state, src, true)
    }
}

impl Encoder<Request> for ResponseCodec {
    type Error = HttpError;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> Result<(), HttpError> {
        encode_request(&request, dst)
    }
}

// ================ Encoding ====================

/// Fixed emission order for known headers; extras follow in insertion order.
const HEADER_ORDER: &[&str] = &[
    "host",
    "location",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-protocol",
    "sec-websocket-version",
    "sec-websocket-accept",
    "sec-websocket-extensions",
    "content-length",
    "content-type",
];

/// Canonical on-the-wire capitalization for the known headers.
fn display_name(lower: &str) -> String {
    let mut out = String::with_capacity(lower.len());
    let mut upper_next = true;
    for c in lower.chars() {
        if upper_next {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        upper_next = c == '-';
    }
    // The WebSocket headers carry an inner capital S.
    if let Some(rest) = out.strip_prefix("Sec-Websocket-") {
        return format!("Sec-WebSocket-{rest}");
    }
    out
}

fn push_latin1(dst: &mut BytesMut, text: &str) -> Result<(), HttpError> {
    for c in text.chars() {
        let code = c as u32;
        if code > 0xFF {
            return Err(HttpError::NotLatin1);
        }
        dst.put_u8(code as u8);
    }
    Ok(())
}

fn encode_headers(headers: &Headers, dst: &mut BytesMut) -> Result<(), HttpError> {
    let mut emit = |name: &str, value: &str| -> Result<(), HttpError> {
        push_latin1(dst, &display_name(name))?;
        dst.put_slice(b": ");
        push_latin1(dst, value)?;
        dst.put_slice(b"\r\n");
        Ok(())
    };

    for &known in HEADER_ORDER {
        if let Some(value) = headers.get(known) {
            emit(known, value)?;
        }
    }
    for (name, value) in headers.iter() {
        if HEADER_ORDER.contains(&name) {
            continue;
        }
        // Extras using reserved names are dropped without comment.
        if is_forbidden_header(name) {
            continue;
        }
        emit(name, value)?;
    }
    dst.put_slice(b"\r\n");
    Ok(())
}

pub fn encode_request(request: &Request, dst: &mut BytesMut) -> Result<(), HttpError> {
    push_latin1(
        dst,
        &format!(
            "{} {} HTTP/{}.{}\r\n",
            request.method, request.target, request.version.0, request.version.1
        ),
    )?;
    encode_headers(&request.headers, dst)?;
    dst.put_slice(&request.body);
    Ok(())
}

pub fn encode_response(response: &Response, dst: &mut BytesMut) -> Result<(), HttpError> {
    push_latin1(
        dst,
        &format!(
            "HTTP/{}.{} {} {}\r\n",
            response.version.0, response.version.1, response.status, response.reason
        ),
    )?;
    encode_headers(&response.headers, dst)?;
    dst.put_slice(&response.body);
    Ok(())
}

/// Convenience wrapper producing a frozen buffer.
pub fn request_bytes(request: &Request) -> Result<Bytes, HttpError> {
    let mut dst = BytesMut::with_capacity(256 + request.headers.len() * 48);
    encode_request(request, &mut dst)?;
    Ok(dst.freeze())
}

pub fn response_bytes(response: &Response) -> Result<Bytes, HttpError> {
    let mut dst = BytesMut::with_capacity(256 + response.headers.len() * 48);
    encode_response(response, &mut dst)?;
    Ok(dst.freeze())
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.target)
    }
}
