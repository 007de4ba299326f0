//! Server front-end.
//!
//! [`Server`] owns a listening socket, buffers each inbound connection
//! through the HTTP request parser, and surfaces complete well-formed
//! requests as [`ServerRequest`] values. The application resolves each
//! request exactly once — [`respond`](ServerRequest::respond),
//! [`respond_text`](ServerRequest::respond_text),
//! [`redirect`](ServerRequest::redirect) or
//! [`upgrade`](ServerRequest::upgrade) — and resolution consumes it.
//! Dropping an unresolved request closes the underlying connection.

use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use url::Url;

use crate::endpoint::{Endpoint, Events};
use crate::handshake::{accept_response, reject_response, validate_upgrade, HandshakeResult};
use crate::http::{self, Headers, Request, RequestCodec, Response};
use crate::options::Options;
use crate::params::Parameterized;
use crate::transport::TcpTransport;
use crate::{Result, WebSocketError};

/// How many parsed requests may queue before connection readers wait.
const REQUEST_BACKLOG: usize = 32;

/// A listening WebSocket server.
pub struct Server {
    local_addr: SocketAddr,
    requests: mpsc::Receiver<ServerRequest>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl Server {
    /// Binds a listener and starts accepting connections.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(REQUEST_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(listener, tx));
        Ok(Server {
            local_addr,
            requests: rx,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The next complete request from any connection. `None` once the
    /// listener has shut down.
    pub async fn next_request(&mut self) -> Option<ServerRequest> {
        self.requests.recv().await
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<ServerRequest>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(request) = read_request(stream, peer).await {
                        let _ = tx.send(request).await;
                    }
                });
            }
            Err(err) => {
                log::debug!("accept failed: {err}");
            }
        }
    }
}

/// Buffers one connection through the request parser. Malformed requests
/// get a 400 and the connection is dropped.
async fn read_request(mut stream: TcpStream, peer: SocketAddr) -> Option<ServerRequest> {
    let mut codec = RequestCodec::new();
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match codec.decode(&mut buf) {
            Ok(Some(request)) => {
                return Some(ServerRequest {
                    request,
                    remainder: buf.freeze(),
                    stream,
                    peer,
                });
            }
            Ok(None) => {}
            Err(err) => {
                log::debug!("invalid HTTP request from {peer}: {err}");
                let response = Response::plain_text(400, "Bad Request", "invalid HTTP request");
                if let Ok(bytes) = http::response_bytes(&response) {
                    let _ = stream.write_all(&bytes).await;
                }
                return None;
            }
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) => return None,
            Ok(_) => {}
            Err(err) => {
                log::debug!("read failed from {peer}: {err}");
                return None;
            }
        }
    }
}

/// One parsed inbound request, awaiting resolution.
///
/// Accessors expose the parsed request; the consuming methods resolve it.
pub struct ServerRequest {
    request: Request,
    remainder: Bytes,
    stream: TcpStream,
    peer: SocketAddr,
}

impl ServerRequest {
    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn target(&self) -> &str {
        &self.request.target
    }

    pub fn host(&self) -> Option<&str> {
        self.request.headers.get("host")
    }

    pub fn headers(&self) -> &Headers {
        &self.request.headers
    }

    pub fn content_type(&self) -> Option<Parameterized> {
        self.request.headers.content_type()
    }

    pub fn body(&self) -> &[u8] {
        &self.request.body
    }

    /// Whether the request asks for a WebSocket upgrade.
    pub fn is_upgrade_request(&self) -> bool {
        self.request
            .headers
            .token_list_contains("upgrade", "websocket")
            && self
                .request
                .headers
                .token_list_contains("connection", "upgrade")
    }

    /// Subprotocols the client offered, in preference order.
    pub fn subprotocols(&self) -> Vec<String> {
        self.request.headers.token_list("sec-websocket-protocol")
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sends `response` and closes the connection.
    pub async fn respond(mut self, response: Response) -> io::Result<()> {
        let bytes = http::response_bytes(&response)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        self.stream.write_all(&bytes).await?;
        self.stream.shutdown().await
    }

    /// Sends a plain-text response and closes the connection.
    pub async fn respond_text(self, status: u16, body: &str) -> io::Result<()> {
        self.respond(Response::plain_text(status, default_reason(status), body))
            .await
    }

    /// Sends a redirect to `location` and closes the connection.
    pub async fn redirect(self, location: &str, status: u16) -> io::Result<()> {
        let mut response = Response::new(status, default_reason(status));
        response.headers.set("location", location);
        response.headers.set("content-length", "0");
        self.respond(response).await
    }

    /// Accepts the upgrade and hands back a fully open endpoint.
    ///
    /// Validation failure sends a plain-text 400 naming the defect and
    /// closes the connection.
    pub async fn upgrade(
        mut self,
        subprotocol: Option<&str>,
        extra_headers: Headers,
        options: Options,
    ) -> Result<(Endpoint, Events)> {
        let upgrade = match validate_upgrade(&self.request) {
            Ok(upgrade) => upgrade,
            Err(detail) => {
                log::debug!("rejecting upgrade from {}: {detail}", self.peer);
                let response = reject_response(&detail);
                if let Ok(bytes) = http::response_bytes(&response) {
                    let _ = self.stream.write_all(&bytes).await;
                }
                let _ = self.stream.shutdown().await;
                return Err(WebSocketError::UpgradeFailed(detail));
            }
        };

        let compression = if options.enable_compression {
            upgrade.compression_offer.as_ref().map(|offer| offer.respond())
        } else {
            None
        };

        let response = accept_response(&upgrade, subprotocol, compression.as_ref(), &extra_headers);
        let bytes = http::response_bytes(&response).map_err(WebSocketError::InvalidHttpResponse)?;
        self.stream
            .write_all(&bytes)
            .await
            .map_err(WebSocketError::ConnectionFailed)?;

        let url = self.endpoint_url();
        let result = HandshakeResult {
            subprotocol: subprotocol.map(str::to_owned),
            compression,
            extra_headers: Headers::new(),
        };
        let transport = TcpTransport::from_stream(self.stream, options.receive_chunk_size);
        Ok(Endpoint::from_upgrade(
            transport,
            url,
            result,
            self.remainder,
            options,
        ))
    }

    fn endpoint_url(&self) -> Url {
        let host = self.host().unwrap_or("localhost");
        format!("ws://{host}{}", self.request.target)
            .parse()
            .unwrap_or_else(|_| "ws://localhost/".parse().expect("static url"))
    }
}

fn default_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Event;
    use crate::CloseCode;

    async fn expect_open(events: &mut Events) -> HandshakeResult {
        match events.next().await {
            Some(Ok(Event::Open(result))) => result,
            other => panic!("expected open, got {other:?}"),
        }
    }

    /// Serves one connection: upgrade, echo text and binary messages until
    /// the peer closes.
    async fn echo_one(server: &mut Server, subprotocol: Option<&str>) {
        let request = server.next_request().await.expect("request");
        assert!(request.is_upgrade_request());
        let (endpoint, mut events) = request
            .upgrade(subprotocol, Headers::new(), Options::default())
            .await
            .expect("upgrade");

        expect_open(&mut events).await;
        while let Some(Ok(event)) = events.next().await {
            match event {
                Event::Text(text) => {
                    endpoint.send_text(text).await;
                }
                Event::Binary(data) => {
                    endpoint.send_binary(data).await;
                }
                Event::Close { .. } => break,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn end_to_end_echo() {
        let mut server = Server::bind("127.0.0.1:0").await.unwrap();
        let url: Url = format!("ws://127.0.0.1:{}/echo", server.local_addr().port())
            .parse()
            .unwrap();

        let server_task = tokio::spawn(async move { echo_one(&mut server, None).await });

        let (endpoint, mut events) = Endpoint::client(url, Options::default());
        assert!(endpoint.send_text("Hello, world").await);
        let payload: Vec<u8> = (0..999u32).map(|i| i as u8).collect();
        assert!(endpoint.send_binary(payload.clone()).await);
        endpoint.close().await;

        let result = expect_open(&mut events).await;
        assert!(result.compression_available());
        match events.next().await {
            Some(Ok(Event::Text(text))) => assert_eq!(text, "Hello, world"),
            other => panic!("expected text, got {other:?}"),
        }
        match events.next().await {
            Some(Ok(Event::Binary(data))) => assert_eq!(&data[..], &payload[..]),
            other => panic!("expected binary, got {other:?}"),
        }
        match events.next().await {
            Some(Ok(Event::Close {
                code, was_clean, ..
            })) => {
                assert_eq!(code, CloseCode::Normal);
                assert!(was_clean);
            }
            other => panic!("expected close, got {other:?}"),
        }
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn subprotocol_selected_end_to_end() {
        let mut server = Server::bind("127.0.0.1:0").await.unwrap();
        let url: Url = format!("ws://127.0.0.1:{}/", server.local_addr().port())
            .parse()
            .unwrap();

        let server_task = tokio::spawn(async move {
            let request = server.next_request().await.expect("request");
            assert_eq!(request.subprotocols(), ["first", "second", "third"]);
            let (_endpoint, mut events) = request
                .upgrade(Some("second"), Headers::new(), Options::default())
                .await
                .expect("upgrade");
            expect_open(&mut events).await;
            while let Some(Ok(event)) = events.next().await {
                if matches!(event, Event::Close { .. }) {
                    break;
                }
            }
        });

        let options = Options::default().with_subprotocols(["first", "second", "third"]);
        let (endpoint, mut events) = Endpoint::client(url, options);
        let result = expect_open(&mut events).await;
        assert_eq!(result.subprotocol.as_deref(), Some("second"));
        endpoint.close().await;
        match events.next().await {
            Some(Ok(Event::Close { was_clean, .. })) => assert!(was_clean),
            other => panic!("expected close, got {other:?}"),
        }
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn redirect_then_upgrade() {
        let mut server = Server::bind("127.0.0.1:0").await.unwrap();
        let url: Url = format!("ws://127.0.0.1:{}/redirect", server.local_addr().port())
            .parse()
            .unwrap();

        let server_task = tokio::spawn(async move {
            // First hop: redirect to /test.
            let request = server.next_request().await.expect("request");
            assert_eq!(request.target(), "/redirect");
            request.redirect("/test", 301).await.unwrap();
            // Second hop: upgrade.
            let request = server.next_request().await.expect("request");
            assert_eq!(request.target(), "/test");
            let (_endpoint, mut events) = request
                .upgrade(None, Headers::new(), Options::default())
                .await
                .expect("upgrade");
            expect_open(&mut events).await;
            while let Some(Ok(event)) = events.next().await {
                if matches!(event, Event::Close { .. }) {
                    break;
                }
            }
        });

        let (endpoint, mut events) = Endpoint::client(url, Options::default());
        expect_open(&mut events).await;
        assert_eq!(endpoint.url().path(), "/test");
        endpoint.close().await;
        let _ = events.next().await;
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn plain_http_response() {
        let mut server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();

        let server_task = tokio::spawn(async move {
            let request = server.next_request().await.expect("request");
            assert!(!request.is_upgrade_request());
            assert_eq!(request.method(), "GET");
            assert_eq!(request.target(), "/health");
            request.respond_text(200, "ok").await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_upgrade_gets_400() {
        let mut server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();

        let server_task = tokio::spawn(async move {
            let request = server.next_request().await.expect("request");
            let err = request
                .upgrade(None, Headers::new(), Options::default())
                .await
                .unwrap_err();
            assert!(matches!(err, WebSocketError::UpgradeFailed(_)));
        });

        // Missing Sec-WebSocket-Key.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
                  Connection: upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n",
            )
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Sec-WebSocket-Key"));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_request_closes_the_connection() {
        let mut server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();

        let server_task = tokio::spawn(async move {
            let request = server.next_request().await.expect("request");
            drop(request);
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        // The connection closes without a response.
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_request_gets_400_without_surfacing() {
        let mut server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        drop(server);
    }
}
