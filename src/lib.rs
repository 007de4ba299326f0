//! A WebSocket endpoint library.
//!
//! Implements [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455)
//! plus the `permessage-deflate` extension of
//! [RFC 7692](https://datatracker.ietf.org/doc/html/rfc7692), usable as
//! either client or server on the tokio runtime.
//!
//! # Client
//!
//! ```no_run
//! use socketeer::{Endpoint, Event, Options};
//!
//! #[tokio::main]
//! async fn main() {
//!     let url = "wss://echo.example.com/ws".parse().unwrap();
//!     let (endpoint, mut events) = Endpoint::client(url, Options::default());
//!
//!     endpoint.send_text("Hello, world").await;
//!     while let Some(event) = events.next().await {
//!         match event {
//!             Ok(Event::Open(result)) => {
//!                 println!("open, compression: {}", result.compression_available());
//!             }
//!             Ok(Event::Text(text)) => {
//!                 println!("received {text}");
//!                 endpoint.close().await;
//!             }
//!             Ok(Event::Close { code, .. }) => println!("closed: {code:?}"),
//!             Ok(_) => {}
//!             Err(err) => eprintln!("handshake failed: {err}"),
//!         }
//!     }
//! }
//! ```
//!
//! # Server
//!
//! ```no_run
//! use socketeer::{http::Headers, Event, Options, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::bind("127.0.0.1:9001").await.unwrap();
//!     while let Some(request) = server.next_request().await {
//!         if !request.is_upgrade_request() {
//!             let _ = request.respond_text(426, "WebSocket endpoint").await;
//!             continue;
//!         }
//!         let (endpoint, mut events) = request
//!             .upgrade(None, Headers::new(), Options::default())
//!             .await
//!             .unwrap();
//!         tokio::spawn(async move {
//!             while let Some(Ok(event)) = events.next().await {
//!                 if let Event::Text(text) = event {
//!                     endpoint.send_text(text).await;
//!                 }
//!             }
//!         });
//!     }
//! }
//! ```

pub mod close;
pub mod codec;
pub mod compression;
pub mod frame;
pub mod handshake;
pub mod http;
mod mask;
mod options;
pub mod params;
pub mod stats;
pub mod transport;

mod endpoint;
mod server;

pub use close::CloseCode;
pub use compression::CompressionLevel;
pub use endpoint::{Compress, Endpoint, Event, Events, Message, ReadyState, SendOptions};
pub use frame::Violation;
pub use handshake::{FailedHandshakeResult, HandshakeResult};
pub use options::Options;
pub use server::{Server, ServerRequest};
pub use stats::{DirectionStats, Statistics};
pub use transport::{Connector, TcpConnector, Transport, TransportEvent};

/// A result type for WebSocket operations, using `WebSocketError` as the
/// error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// The role an endpoint takes.
///
/// Clients mask every outbound frame; servers never do. The role also
/// selects which half of the negotiated compression parameters applies to
/// each direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// The opposite role.
    pub fn peer(&self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Errors surfaced before `open` through the event iterator.
///
/// After `open`, nothing here is thrown: protocol violations and transport
/// failures become the final `close` event instead.
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    /// The URL has no usable host.
    #[error("Invalid URL")]
    InvalidUrl,

    /// Only `ws` and `wss` schemes are supported.
    #[error("Invalid URL scheme")]
    InvalidUrlScheme,

    /// Name resolution produced no usable address.
    #[error("Host lookup failed")]
    HostLookupFailed,

    /// The transport could not be established, or dropped mid-handshake.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// The TLS handshake failed.
    #[error("TLS failed: {0}")]
    TlsFailed(String),

    /// A request could not be parsed or encoded.
    #[error("Invalid HTTP request")]
    InvalidHttpRequest(#[source] http::HttpError),

    /// A response could not be parsed or encoded.
    #[error("Invalid HTTP response")]
    InvalidHttpResponse(#[source] http::HttpError),

    /// The server answered with something other than 101 or a redirect.
    #[error("Upgrade rejected with status {}", .0.status)]
    UpgradeRejected(Box<FailedHandshakeResult>),

    /// The 101 response's `Connection` header lacks `upgrade`.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The 101 response's `Upgrade` header lacks `websocket`.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// `Sec-WebSocket-Accept` does not match the sent key.
    #[error("Sec-WebSocket-Accept key mismatch")]
    KeyMismatch,

    /// The server chose a subprotocol that was never offered.
    #[error("Subprotocol mismatch")]
    SubprotocolMismatch,

    /// The server claimed an extension, or parameters, that were never
    /// offered.
    #[error("Extension mismatch")]
    ExtensionMismatch,

    /// A redirect response without a usable `Location`, or to a non-ws
    /// scheme.
    #[error("Invalid redirection")]
    InvalidRedirection,

    /// The `Location` value did not resolve against the current URL.
    #[error("Invalid redirect location")]
    InvalidRedirectLocation,

    /// The redirect chain exceeded `maximum_redirects`.
    #[error("Maximum redirects exceeded")]
    MaximumRedirectsExceeded,

    /// The opening handshake timed out.
    #[error("Timeout")]
    Timeout,

    /// The transport closed before the handshake response completed.
    #[error("Unexpected disconnect")]
    UnexpectedDisconnect,

    /// The event consumer went away during the opening handshake.
    #[error("Canceled")]
    Canceled,

    /// Server side: the upgrade request failed validation; a 400 naming
    /// the defect was sent.
    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Wraps URL parsing failures.
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    /// Wraps I/O errors outside the connect path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
