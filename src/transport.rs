//! The transport seam.
//!
//! The endpoint core is transport-agnostic: it drives any byte-oriented
//! reliable stream through the [`Transport`] trait and reaches new servers
//! through a [`Connector`]. The production implementation speaks TCP with
//! optional TLS; tests substitute channel-backed mocks to get byte-exact,
//! timer-deterministic runs.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName};
use tokio_rustls::TlsConnector;
use url::Url;

use crate::options::Options;
use crate::{Result, WebSocketError};

/// A signal from the transport to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes arrived from the peer.
    Receive(Bytes),
    /// The peer closed its write side; no more bytes will arrive.
    Eof,
    /// The path's viability changed (e.g. the link went away).
    ViabilityChange(bool),
    /// A better path became available (e.g. wifi instead of cellular).
    BetterPathAvailable(bool),
}

/// A connected byte-oriented reliable stream.
///
/// `send` resolves once the buffer has been accepted by the transport;
/// `next_event` resolves on inbound bytes, EOF or a connection-quality
/// signal; `cancel` tears the connection down. Transports without quality
/// signals simply never yield them.
pub trait Transport: Send {
    fn send(&mut self, buf: Bytes) -> impl Future<Output = io::Result<()>> + Send;
    fn next_event(&mut self) -> impl Future<Output = io::Result<TransportEvent>> + Send;
    fn cancel(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens transports for client endpoints, once per connect or redirect hop.
pub trait Connector: Send + 'static {
    type Transport: Transport + 'static;

    fn connect(
        &mut self,
        url: &Url,
        options: &Options,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// A TCP stream that may or may not be TLS-wrapped.
#[derive(Debug)]
pub enum MaybeTlsStream<S> {
    Plain(S),
    Tls(Box<tokio_rustls::client::TlsStream<S>>),
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Production transport over TCP, TLS-wrapped for `wss`.
#[derive(Debug)]
pub struct TcpTransport {
    stream: MaybeTlsStream<TcpStream>,
    receive_chunk_size: usize,
}

impl TcpTransport {
    /// Wraps an already-accepted plain stream (server side).
    pub fn from_stream(stream: TcpStream, receive_chunk_size: usize) -> Self {
        Self {
            stream: MaybeTlsStream::Plain(stream),
            receive_chunk_size,
        }
    }
}

impl Transport for TcpTransport {
    async fn send(&mut self, buf: Bytes) -> io::Result<()> {
        self.stream.write_all(&buf).await?;
        self.stream.flush().await
    }

    async fn next_event(&mut self) -> io::Result<TransportEvent> {
        let mut buf = BytesMut::with_capacity(self.receive_chunk_size);
        let read = self.stream.read_buf(&mut buf).await?;
        if read == 0 {
            Ok(TransportEvent::Eof)
        } else {
            Ok(TransportEvent::Receive(buf.freeze()))
        }
    }

    async fn cancel(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Dials TCP (with TLS for `wss`) using the system resolver.
#[derive(Clone, Default)]
pub struct TcpConnector {
    tls: Option<TlsConnector>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the TLS configuration, e.g. to pin certificates.
    pub fn with_tls_connector(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&mut self, url: &Url, options: &Options) -> Result<TcpTransport> {
        let secure = match url.scheme().to_ascii_lowercase().as_str() {
            "ws" => false,
            "wss" => true,
            _ => return Err(WebSocketError::InvalidUrlScheme),
        };
        let host = url.host_str().ok_or(WebSocketError::InvalidUrl)?.to_owned();
        let port = url.port().unwrap_or(if secure { 443 } else { 80 });

        let mut addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|_| WebSocketError::HostLookupFailed)?
            .peekable();
        if addrs.peek().is_none() {
            return Err(WebSocketError::HostLookupFailed);
        }

        let mut last_error = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }
        let tcp = match tcp {
            Some(tcp) => tcp,
            None => {
                return Err(WebSocketError::ConnectionFailed(last_error.unwrap_or_else(
                    || io::Error::new(io::ErrorKind::NotConnected, "no usable address"),
                )))
            }
        };
        let _ = tcp.set_nodelay(true);
        if options.enable_fast_open {
            // No portable socket API for TCP fast open; transports that
            // support it honor the hint, this one logs and moves on.
            log::trace!("fast-open requested but not supported by the TCP transport");
        }

        let stream = if secure {
            let connector = self.tls.clone().unwrap_or_else(default_tls_connector);
            let server_name = ServerName::try_from(host.clone())
                .map_err(|_| WebSocketError::TlsFailed("invalid DNS name".to_owned()))?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|err| WebSocketError::TlsFailed(err.to_string()))?;
            MaybeTlsStream::Tls(Box::new(tls))
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        Ok(TcpTransport {
            stream,
            receive_chunk_size: options.receive_chunk_size,
        })
    }
}

/// A TLS connector trusting the webpki root set.
pub fn default_tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
