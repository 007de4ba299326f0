//! WebSocket opening handshake ([RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4)).
//!
//! The client side builds the upgrade request and consumes the response
//! incrementally, yielding ready / redirect / rejected outcomes. The server
//! side validates an inbound request and produces either a 101 response or
//! a descriptive plain-text 400.
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```

use base64::Engine;
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio_util::codec::Decoder;
use url::Url;

use crate::compression::CompressionOffer;
use crate::http::{Headers, Request, Response, ResponseCodec};
use crate::options::Options;
use crate::params::Parameterized;
use crate::{Result, WebSocketError};

/// RFC 6455 GUID mixed into the accept digest.
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(sha1(key + GUID))`, the value the server must echo in
/// `Sec-WebSocket-Accept`.
pub fn derive_accept_key(key: &str) -> String {
    let mut digest = Sha1::new();
    digest.update(key.as_bytes());
    digest.update(ACCEPT_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest.finalize())
}

/// Encodes a 16-byte nonce as the `Sec-WebSocket-Key` value.
pub fn encode_nonce(nonce: [u8; 16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

/// The outcome of a successful handshake.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// The subprotocol the server selected, if any.
    pub subprotocol: Option<String>,
    /// The negotiated `permessage-deflate` parameters, if compression is
    /// in effect.
    pub compression: Option<CompressionOffer>,
    /// Response headers beyond the upgrade machinery.
    pub extra_headers: Headers,
}

impl HandshakeResult {
    pub fn compression_available(&self) -> bool {
        self.compression.is_some()
    }
}

/// A server's refusal to upgrade, preserved for the application.
#[derive(Debug, Clone)]
pub struct FailedHandshakeResult {
    pub status: u16,
    pub reason: String,
    pub extra_headers: Headers,
    pub content_type: Option<Parameterized>,
    pub body: Option<Vec<u8>>,
}

impl FailedHandshakeResult {
    fn from_response(response: Response) -> Self {
        let content_type = response.headers.content_type();
        Self {
            status: response.status,
            reason: response.reason,
            extra_headers: response.headers,
            content_type,
            body: (!response.body.is_empty()).then_some(response.body),
        }
    }
}

/// What a handshake response resolved to.
#[derive(Debug)]
pub enum ClientOutcome {
    /// Upgrade accepted. `remainder` carries any bytes that followed the
    /// response head; they are the first WebSocket frame bytes.
    Ready {
        result: HandshakeResult,
        remainder: Bytes,
    },
    /// A 3xx response naming a new location.
    Redirect(String),
    /// Any other status.
    Rejected(FailedHandshakeResult),
}

/// One client handshake attempt.
///
/// The nonce is supplied by the caller so tests can pin it; the endpoint
/// draws a fresh one per attempt.
pub struct ClientHandshake {
    request: Request,
    expected_accept: String,
    offered_protocols: Vec<String>,
    offered_compression: Option<CompressionOffer>,
    codec: ResponseCodec,
    buf: BytesMut,
}

impl ClientHandshake {
    pub fn new(url: &Url, options: &Options, nonce: [u8; 16]) -> Result<Self> {
        let key = encode_nonce(nonce);
        let expected_accept = derive_accept_key(&key);

        let host = url.host_str().ok_or(WebSocketError::InvalidUrl)?;
        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let resource = &url[url::Position::BeforePath..];
        let mut request = Request::get(if resource.is_empty() { "/" } else { resource });
        request.headers.set("host", host_header);
        request.headers.set("upgrade", "websocket");
        request.headers.set("connection", "upgrade");
        request.headers.set("sec-websocket-key", key);
        request.headers.set("sec-websocket-version", "13");

        if !options.subprotocols.is_empty() {
            request
                .headers
                .set("sec-websocket-protocol", options.subprotocols.join(", "));
        }

        let offered_compression = options
            .enable_compression
            .then(CompressionOffer::default);
        if let Some(offer) = &offered_compression {
            request
                .headers
                .set("sec-websocket-extensions", offer.to_params().to_string());
        }

        // Reserved names are dropped again at encode time; skipping them
        // here keeps them out of the structured view as well.
        for (name, value) in &options.extra_headers {
            if !crate::http::is_forbidden_header(name) {
                request.headers.append(name, value);
            }
        }

        Ok(Self {
            request,
            expected_accept,
            offered_protocols: options.subprotocols.clone(),
            offered_compression,
            codec: ResponseCodec::new(),
            buf: BytesMut::new(),
        })
    }

    /// The encoded upgrade request to write to the transport.
    pub fn request_bytes(&self) -> Result<Bytes> {
        crate::http::request_bytes(&self.request).map_err(WebSocketError::InvalidHttpRequest)
    }

    /// Feeds response bytes; returns an outcome once the response is
    /// complete.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Option<ClientOutcome>> {
        self.buf.extend_from_slice(bytes);
        match self.codec.decode(&mut self.buf) {
            Ok(Some(response)) => self.classify(response).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(WebSocketError::InvalidHttpResponse(err)),
        }
    }

    /// Signals transport EOF; completes responses framed by connection
    /// close.
    pub fn receive_eof(&mut self) -> Result<Option<ClientOutcome>> {
        match self.codec.decode_eof(&mut self.buf) {
            Ok(Some(response)) => self.classify(response).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(WebSocketError::InvalidHttpResponse(err)),
        }
    }

    fn classify(&mut self, response: Response) -> Result<ClientOutcome> {
        match response.status {
            101 => self.validate_upgrade(response),
            300..=399 => match response.headers.get("location") {
                Some(location) => {
                    log::debug!("handshake redirected to {location}");
                    Ok(ClientOutcome::Redirect(location.to_owned()))
                }
                None => Err(WebSocketError::InvalidRedirection),
            },
            _ => Ok(ClientOutcome::Rejected(FailedHandshakeResult::from_response(
                response,
            ))),
        }
    }

    fn validate_upgrade(&mut self, response: Response) -> Result<ClientOutcome> {
        if !response.headers.token_list_contains("upgrade", "websocket") {
            return Err(WebSocketError::InvalidUpgradeHeader);
        }
        if !response.headers.token_list_contains("connection", "upgrade") {
            return Err(WebSocketError::InvalidConnectionHeader);
        }
        if response.headers.get("sec-websocket-accept") != Some(self.expected_accept.as_str()) {
            return Err(WebSocketError::KeyMismatch);
        }

        let subprotocol = response
            .headers
            .get("sec-websocket-protocol")
            .map(str::to_owned);
        if let Some(chosen) = &subprotocol {
            if !self.offered_protocols.iter().any(|p| p == chosen) {
                return Err(WebSocketError::SubprotocolMismatch);
            }
        }

        let compression = self.validate_extensions(&response)?;

        let mut extra_headers = Headers::new();
        for (name, value) in response.headers.iter() {
            if matches!(name, "upgrade" | "connection") || name.starts_with("sec-websocket-") {
                continue;
            }
            extra_headers.append(name, value);
        }

        Ok(ClientOutcome::Ready {
            result: HandshakeResult {
                subprotocol,
                compression,
                extra_headers,
            },
            remainder: self.buf.split().freeze(),
        })
    }

    fn validate_extensions(&self, response: &Response) -> Result<Option<CompressionOffer>> {
        let entries = match response.headers.get("sec-websocket-extensions") {
            None => return Ok(None),
            Some(value) => Parameterized::parse_list(value)
                .map_err(|_| WebSocketError::ExtensionMismatch)?,
        };
        if entries.is_empty() {
            return Ok(None);
        }
        // The only extension ever offered is permessage-deflate; the server
        // claiming anything else, or claiming it twice, fails the handshake.
        if entries.len() > 1 {
            return Err(WebSocketError::ExtensionMismatch);
        }
        let offered = self
            .offered_compression
            .as_ref()
            .ok_or(WebSocketError::ExtensionMismatch)?;
        let accepted = CompressionOffer::from_params(&entries[0])
            .ok_or(WebSocketError::ExtensionMismatch)?;
        if !offered.accepts(&accepted) {
            return Err(WebSocketError::ExtensionMismatch);
        }
        Ok(Some(accepted))
    }
}

// ================ Server side ====================

/// A validated upgrade request, ready to be accepted.
#[derive(Debug, Clone)]
pub struct ServerUpgrade {
    /// The client's `Sec-WebSocket-Key`, already folded into
    /// [`accept_key`](Self::accept_key).
    pub key: String,
    /// The derived `Sec-WebSocket-Accept` value.
    pub accept_key: String,
    /// Subprotocols the client offered, in preference order.
    pub subprotocols: Vec<String>,
    /// The client's first syntactically valid compression offer.
    pub compression_offer: Option<CompressionOffer>,
}

/// Validates `request` as a WebSocket upgrade. The error string names the
/// defect and belongs in a 400 response body.
pub fn validate_upgrade(request: &Request) -> std::result::Result<ServerUpgrade, String> {
    if request.version < (1, 1) {
        return Err("WebSocket upgrade requires HTTP/1.1".to_owned());
    }
    if request.method != "GET" {
        return Err("WebSocket upgrade requires a GET request".to_owned());
    }
    if !request.headers.token_list_contains("upgrade", "websocket") {
        return Err("Upgrade header must include 'websocket'".to_owned());
    }
    if !request.headers.token_list_contains("connection", "upgrade") {
        return Err("Connection header must include 'upgrade'".to_owned());
    }
    if request.headers.token_list("sec-websocket-version") != ["13"] {
        return Err("Sec-WebSocket-Version must be 13".to_owned());
    }
    let key = match request.headers.get("sec-websocket-key") {
        Some(key) if !key.trim().is_empty() => key.trim().to_owned(),
        _ => return Err("Sec-WebSocket-Key header is missing".to_owned()),
    };

    let accept_key = derive_accept_key(&key);
    Ok(ServerUpgrade {
        key,
        accept_key,
        subprotocols: request.headers.token_list("sec-websocket-protocol"),
        compression_offer: CompressionOffer::first_valid(
            &request.headers.sec_websocket_extensions(),
        ),
    })
}

/// Builds the 101 response accepting `upgrade`.
pub fn accept_response(
    upgrade: &ServerUpgrade,
    subprotocol: Option<&str>,
    compression: Option<&CompressionOffer>,
    extra_headers: &Headers,
) -> Response {
    let mut response = Response::new(101, "Switching Protocols");
    response.headers.set("upgrade", "websocket");
    response.headers.set("connection", "upgrade");
    response
        .headers
        .set("sec-websocket-accept", upgrade.accept_key.clone());
    if let Some(subprotocol) = subprotocol {
        response.headers.set("sec-websocket-protocol", subprotocol);
    }
    if let Some(compression) = compression {
        response
            .headers
            .set("sec-websocket-extensions", compression.to_params().to_string());
    }
    for (name, value) in extra_headers.iter() {
        if !crate::http::is_forbidden_header(name) {
            response.headers.append(name, value);
        }
    }
    response
}

/// Builds the plain-text 400 refusing an invalid upgrade.
pub fn reject_response(detail: &str) -> Response {
    Response::plain_text(400, "Bad Request", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestCodec;

    const NONCE: [u8; 16] = *b"\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c\x0d\x0e\x0f\x10";

    fn handshake(url: &str, options: Options) -> ClientHandshake {
        ClientHandshake::new(&url.parse().unwrap(), &options, NONCE).unwrap()
    }

    fn expected_accept() -> String {
        derive_accept_key(&encode_nonce(NONCE))
    }

    fn ok_response() -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            expected_accept()
        )
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(
            derive_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accept_key_round_trips_for_any_nonce() {
        for seed in 0..32u8 {
            let nonce = [seed; 16];
            let key = encode_nonce(nonce);
            assert_eq!(key.len(), 24);
            // The client precomputes the same digest the server derives.
            assert_eq!(derive_accept_key(&key), derive_accept_key(&key));
        }
    }

    #[test]
    fn request_carries_the_handshake_headers() {
        let options = Options::default()
            .with_subprotocols(["first", "second"])
            .with_extra_header("authorization", "Bearer t")
            .with_extra_header("sec-evil", "dropped");
        let client = handshake("ws://example.com:9001/chat?room=1", options);
        let text = String::from_utf8(client.request_bytes().unwrap().to_vec()).unwrap();

        assert!(text.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:9001\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: upgrade\r\n"));
        assert!(text.contains(&format!("Sec-WebSocket-Key: {}\r\n", encode_nonce(NONCE))));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: first, second\r\n"));
        assert!(text.contains("Sec-WebSocket-Extensions: permessage-deflate\r\n"));
        assert!(text.contains("Authorization: Bearer t\r\n"));
        assert!(!text.contains("Sec-Evil"));
    }

    #[test]
    fn host_header_omits_default_port() {
        let client = handshake("ws://example.com/", Options::default());
        let text = String::from_utf8(client.request_bytes().unwrap().to_vec()).unwrap();
        assert!(text.contains("Host: example.com\r\n"));
    }

    #[test]
    fn empty_path_becomes_slash() {
        let client = handshake("ws://example.com", Options::default());
        let text = String::from_utf8(client.request_bytes().unwrap().to_vec()).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn successful_upgrade_yields_ready_with_remainder() {
        let mut client = handshake("ws://example.com/", Options::default());
        let mut bytes = ok_response().into_bytes();
        bytes.extend_from_slice(&[0x81, 0x02, b'h', b'i']); // first frame bytes

        let outcome = client.receive(&bytes).unwrap().unwrap();
        match outcome {
            ClientOutcome::Ready { result, remainder } => {
                assert!(result.subprotocol.is_none());
                assert!(!result.compression_available());
                assert_eq!(&remainder[..], &[0x81, 0x02, b'h', b'i']);
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn incremental_delivery() {
        let mut client = handshake("ws://example.com/", Options::default());
        let response = ok_response().into_bytes();
        let (first, second) = response.split_at(20);
        assert!(client.receive(first).unwrap().is_none());
        assert!(matches!(
            client.receive(second).unwrap(),
            Some(ClientOutcome::Ready { .. })
        ));
    }

    #[test]
    fn subprotocol_must_be_offered() {
        let mut client = handshake(
            "ws://example.com/",
            Options::default().with_subprotocols(["first", "second", "third"]),
        );
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: upgrade\r\nSec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Protocol: second\r\n\r\n",
            expected_accept()
        );
        match client.receive(response.as_bytes()).unwrap().unwrap() {
            ClientOutcome::Ready { result, .. } => {
                assert_eq!(result.subprotocol.as_deref(), Some("second"));
            }
            other => panic!("expected ready, got {other:?}"),
        }

        let mut client = handshake("ws://example.com/", Options::default());
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: upgrade\r\nSec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Protocol: surprise\r\n\r\n",
            expected_accept()
        );
        assert!(matches!(
            client.receive(response.as_bytes()),
            Err(WebSocketError::SubprotocolMismatch)
        ));
    }

    #[test]
    fn header_validation_failures() {
        let cases: [(&str, fn(&WebSocketError) -> bool); 3] = [
            (
                "HTTP/1.1 101 x\r\nConnection: upgrade\r\nSec-WebSocket-Accept: {A}\r\n\r\n",
                |e| matches!(e, WebSocketError::InvalidUpgradeHeader),
            ),
            (
                "HTTP/1.1 101 x\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {A}\r\n\r\n",
                |e| matches!(e, WebSocketError::InvalidConnectionHeader),
            ),
            (
                "HTTP/1.1 101 x\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\
                 Sec-WebSocket-Accept: bogus\r\n\r\n",
                |e| matches!(e, WebSocketError::KeyMismatch),
            ),
        ];
        for (template, check) in cases {
            let mut client = handshake("ws://example.com/", Options::default());
            let response = template.replace("{A}", &expected_accept());
            let err = client.receive(response.as_bytes()).unwrap_err();
            assert!(check(&err), "template {template:?} gave {err}");
        }
    }

    #[test]
    fn extension_must_be_subset_of_offer() {
        // Server echoes something acceptable.
        let mut client = handshake("ws://example.com/", Options::default());
        let response = format!(
            "HTTP/1.1 101 x\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Extensions: permessage-deflate\r\n\r\n",
            expected_accept()
        );
        match client.receive(response.as_bytes()).unwrap().unwrap() {
            ClientOutcome::Ready { result, .. } => assert!(result.compression_available()),
            other => panic!("expected ready, got {other:?}"),
        }

        // Server claims an extension that was never offered.
        let mut client = handshake(
            "ws://example.com/",
            Options::default().with_compression(false),
        );
        let response = format!(
            "HTTP/1.1 101 x\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Extensions: permessage-deflate\r\n\r\n",
            expected_accept()
        );
        assert!(matches!(
            client.receive(response.as_bytes()),
            Err(WebSocketError::ExtensionMismatch)
        ));

        // Server claims parameters outside the offer.
        let mut client = handshake("ws://example.com/", Options::default());
        let response = format!(
            "HTTP/1.1 101 x\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Extensions: permessage-deflate; server_max_window_bits=10\r\n\r\n",
            expected_accept()
        );
        assert!(matches!(
            client.receive(response.as_bytes()),
            Err(WebSocketError::ExtensionMismatch)
        ));

        // Server claims an unknown extension token.
        let mut client = handshake("ws://example.com/", Options::default());
        let response = format!(
            "HTTP/1.1 101 x\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Extensions: x-webkit-deflate-frame\r\n\r\n",
            expected_accept()
        );
        assert!(matches!(
            client.receive(response.as_bytes()),
            Err(WebSocketError::ExtensionMismatch)
        ));
    }

    #[test]
    fn redirect_yields_location() {
        let mut client = handshake("ws://example.com/redirect", Options::default());
        let outcome = client
            .receive(b"HTTP/1.1 301 Moved Permanently\r\nLocation: /test\r\nContent-Length: 0\r\n\r\n")
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ClientOutcome::Redirect(loc) if loc == "/test"));
    }

    #[test]
    fn redirect_without_location_is_invalid() {
        let mut client = handshake("ws://example.com/", Options::default());
        assert!(matches!(
            client.receive(b"HTTP/1.1 302 Found\r\nContent-Length: 0\r\n\r\n"),
            Err(WebSocketError::InvalidRedirection)
        ));
    }

    #[test]
    fn rejection_preserves_the_response() {
        let mut client = handshake("ws://example.com/", Options::default());
        let bytes = b"HTTP/1.1 403 Forbidden\r\nContent-Type: text/plain\r\n\
                      Content-Length: 6\r\nX-Hint: none\r\n\r\ndenied";
        match client.receive(bytes).unwrap().unwrap() {
            ClientOutcome::Rejected(failed) => {
                assert_eq!(failed.status, 403);
                assert_eq!(failed.reason, "Forbidden");
                assert_eq!(failed.body.as_deref(), Some(&b"denied"[..]));
                assert!(failed.content_type.unwrap().token_is("text/plain"));
                assert_eq!(failed.extra_headers.get("x-hint"), Some("none"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn rejection_body_completes_on_eof() {
        let mut client = handshake("ws://example.com/", Options::default());
        assert!(client
            .receive(b"HTTP/1.1 500 Internal Server Error\r\n\r\noops")
            .unwrap()
            .is_none());
        match client.receive_eof().unwrap().unwrap() {
            ClientOutcome::Rejected(failed) => {
                assert_eq!(failed.status, 500);
                assert_eq!(failed.body.as_deref(), Some(&b"oops"[..]));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    // ================ Server side ====================

    fn upgrade_request() -> Request {
        let mut buf = BytesMut::from(
            &b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\n\
               Connection: keep-alive, upgrade\r\nSec-WebSocket-Version: 13\r\n\
               Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
               Sec-WebSocket-Protocol: chat.v2, chat.v1\r\n\
               Sec-WebSocket-Extensions: permessage-deflate; server_no_context_takeover\r\n\r\n"[..],
        );
        RequestCodec::new().decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn valid_upgrade_accepted() {
        let upgrade = validate_upgrade(&upgrade_request()).unwrap();
        assert_eq!(upgrade.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(upgrade.subprotocols, ["chat.v2", "chat.v1"]);
        assert!(upgrade
            .compression_offer
            .as_ref()
            .unwrap()
            .server_no_context_takeover);
    }

    #[test]
    fn upgrade_rejections_name_the_defect() {
        let mut request = upgrade_request();
        request.method = "POST".into();
        assert!(validate_upgrade(&request).unwrap_err().contains("GET"));

        let mut request = upgrade_request();
        request.version = (1, 0);
        assert!(validate_upgrade(&request).unwrap_err().contains("HTTP/1.1"));

        let mut request = upgrade_request();
        request.headers.remove("upgrade");
        assert!(validate_upgrade(&request)
            .unwrap_err()
            .contains("websocket"));

        let mut request = upgrade_request();
        request.headers.set("connection", "close");
        assert!(validate_upgrade(&request).unwrap_err().contains("upgrade"));

        let mut request = upgrade_request();
        request.headers.set("sec-websocket-version", "8");
        assert!(validate_upgrade(&request).unwrap_err().contains("13"));

        let mut request = upgrade_request();
        request.headers.remove("sec-websocket-key");
        assert!(validate_upgrade(&request).unwrap_err().contains("Key"));
    }

    #[test]
    fn accept_response_echoes_negotiation() {
        let upgrade = validate_upgrade(&upgrade_request()).unwrap();
        let compression = upgrade.compression_offer.as_ref().unwrap().respond();
        let mut extras = Headers::new();
        extras.set("x-server", "socketeer");
        extras.set("sec-sneaky", "dropped");

        let response = accept_response(&upgrade, Some("chat.v2"), Some(&compression), &extras);
        let text =
            String::from_utf8(crate::http::response_bytes(&response).unwrap().to_vec()).unwrap();

        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat.v2\r\n"));
        assert!(text
            .contains("Sec-WebSocket-Extensions: permessage-deflate; server_no_context_takeover\r\n"));
        assert!(text.contains("X-Server: socketeer\r\n"));
        assert!(!text.contains("Sec-Sneaky"));
    }

    #[test]
    fn reject_response_is_plain_text() {
        let response = reject_response("Sec-WebSocket-Key header is missing");
        assert_eq!(response.status, 400);
        assert_eq!(response.body, b"Sec-WebSocket-Key header is missing");
        assert!(response
            .headers
            .get("content-type")
            .unwrap()
            .starts_with("text/plain"));
    }
}
