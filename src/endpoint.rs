//! The endpoint controller.
//!
//! One [`Endpoint`] exists per connection. All mutation happens on a single
//! driver task that owns the transport, both framers, the statistics and
//! the handshake timers; application handles talk to it over a command
//! channel and consume a linearized event stream from the [`Events`] half.
//! That serialization gives the observable contract: sends hit the wire in
//! acceptance order, events arrive in production order, `open` precedes all
//! application events and exactly one `close` ends the stream.
//!
//! Lifecycle: `initialized → connecting → open → closing → closed`, never
//! backwards. The driver idles until the first `send`, `close` or event
//! poll arrives, then connects and runs the opening handshake (following
//! redirects up to the configured limit). Senders that arrive before the
//! handshake resolves park on a queue and are drained — in order — once the
//! endpoint opens.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use url::Url;

use crate::close::CloseCode;
use crate::codec::{InputFramer, OutputFramer};
use crate::compression::CompressionOffer;
use crate::frame::Frame;
use crate::handshake::{ClientHandshake, ClientOutcome, HandshakeResult};
use crate::options::Options;
use crate::stats::Statistics;
use crate::transport::{Connector, TcpConnector, Transport, TransportEvent};
use crate::{Result, Role, WebSocketError};

/// Close reason used when an inbound message exceeds the configured size.
const MESSAGE_TOO_BIG_REASON: &str = "Maximum message size exceeded";

/// Close reason used when the transport drops without a close frame.
const DISCONNECT_REASON: &str = "Connection closed unexpectedly";

/// Endpoint lifecycle state. Transitions are monotonic; `Closed` absorbs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Initialized,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Compression choice for one outbound message.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Compress {
    /// Compress when the payload size falls in the configured range.
    #[default]
    Auto,
    Never,
    Always,
}

/// Per-send options.
#[derive(Debug, Copy, Clone, Default)]
pub struct SendOptions {
    pub compress: Compress,
}

/// An outbound application message.
#[derive(Debug, Clone)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
}

/// An event observed by the single consumer.
#[derive(Debug, Clone)]
pub enum Event {
    /// First event, exactly once: the handshake result.
    Open(HandshakeResult),
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    /// Transport viability changed.
    ConnectionViability(bool),
    /// The transport found a better path.
    BetterConnectionAvailable(bool),
    /// Last event, exactly once.
    Close {
        code: CloseCode,
        reason: String,
        was_clean: bool,
    },
}

#[derive(Debug)]
enum Command {
    Start,
    Send {
        message: Message,
        options: SendOptions,
        ack: oneshot::Sender<bool>,
    },
    Close {
        code: Option<CloseCode>,
        reason: String,
        ack: oneshot::Sender<()>,
    },
    SampleStatistics {
        reset: bool,
        reply: oneshot::Sender<Statistics>,
    },
}

/// State visible to handles without a round-trip through the driver.
#[derive(Debug)]
struct Shared {
    url: Mutex<Url>,
    state: Mutex<ReadyState>,
    final_statistics: Mutex<Statistics>,
}

/// A WebSocket endpoint handle.
///
/// Handles are cheap to clone; all of them feed the same driver. The
/// endpoint connects lazily: the first [`send`](Self::send),
/// [`close`](Self::close) or [`Events::next`] call starts the transport and
/// the opening handshake.
#[derive(Debug, Clone)]
pub struct Endpoint {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Endpoint {
    /// Creates a client endpoint for `url` using the production TCP/TLS
    /// connector.
    pub fn client(url: Url, options: Options) -> (Endpoint, Events) {
        Self::client_with_connector(TcpConnector::new(), url, options)
    }

    /// Creates a client endpoint dialing through a custom [`Connector`].
    pub fn client_with_connector<C: Connector>(
        connector: C,
        url: Url,
        options: Options,
    ) -> (Endpoint, Events) {
        let (endpoint, events, driver) = Driver::new(Role::Client, url, options);
        tokio::spawn(driver.run_client(connector));
        (endpoint, events)
    }

    /// Wraps an already-upgraded server-side connection. Used by the server
    /// front-end; the endpoint starts out open and the first event is
    /// `Open` with the pre-baked handshake result. `remainder` carries any
    /// frame bytes that arrived behind the upgrade request.
    pub(crate) fn from_upgrade<T: Transport + 'static>(
        transport: T,
        url: Url,
        result: HandshakeResult,
        remainder: Bytes,
        options: Options,
    ) -> (Endpoint, Events) {
        let (endpoint, events, mut driver) = Driver::new(Role::Server, url, options);
        driver.transport = Some(transport);
        driver.input.receive(&remainder);
        tokio::spawn(driver.run_open(result));
        (endpoint, events)
    }

    /// Sends an application message, returning whether the transport
    /// accepted the bytes. Parks until the handshake resolves when called
    /// before `open`; returns `false` in `closing` and `closed` without
    /// side effects.
    pub async fn send(&self, message: Message, options: SendOptions) -> bool {
        let (ack, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Send {
                message,
                options,
                ack,
            })
            .is_err()
        {
            return false;
        }
        done.await.unwrap_or(false)
    }

    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Message::Text(text.into()), SendOptions::default())
            .await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send(Message::Binary(data.into()), SendOptions::default())
            .await
    }

    /// Sends a ping; payloads longer than 125 bytes are truncated.
    pub async fn ping(&self, data: impl Into<Bytes>) -> bool {
        self.send(Message::Ping(data.into()), SendOptions::default())
            .await
    }

    pub async fn pong(&self, data: impl Into<Bytes>) -> bool {
        self.send(Message::Pong(data.into()), SendOptions::default())
            .await
    }

    /// Closes with 1000 and no reason.
    pub async fn close(&self) {
        self.close_with(Some(CloseCode::Normal), "").await;
    }

    /// Starts the closing handshake. Restricted codes (1005, 1006, 1015)
    /// are normalized to "no code". Idempotent: further calls are no-ops.
    pub async fn close_with(&self, code: Option<CloseCode>, reason: &str) {
        let (ack, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Close {
                code,
                reason: reason.to_owned(),
                ack,
            })
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// Snapshots the traffic counters, optionally zeroing them.
    pub async fn sample_statistics(&self, reset: bool) -> Statistics {
        let (reply, stats) = oneshot::channel();
        if self
            .commands
            .send(Command::SampleStatistics { reset, reply })
            .is_ok()
        {
            if let Ok(stats) = stats.await {
                return stats;
            }
        }
        // The driver is gone; fall back to the closing snapshot.
        *self.shared.final_statistics.lock().expect("statistics lock")
    }

    /// The endpoint's current URL; reflects redirects until open.
    pub fn url(&self) -> Url {
        self.shared.url.lock().expect("url lock").clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.shared.state.lock().expect("state lock")
    }
}

/// The single-consumer event stream half of an endpoint.
///
/// Yields `Some(Ok(event))` in production order, `Some(Err(_))` for
/// failures before `open`, and `None` once the stream has ended. Also
/// implements [`futures::Stream`].
#[derive(Debug)]
pub struct Events {
    rx: mpsc::UnboundedReceiver<Result<Event>>,
    starter: Option<mpsc::UnboundedSender<Command>>,
    finished: bool,
}

impl Events {
    /// The next event. The first call starts the connection when nothing
    /// else has.
    pub async fn next(&mut self) -> Option<Result<Event>> {
        std::future::poll_fn(|cx| self.poll_next_event(cx)).await
    }

    fn poll_next_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Event>>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if let Some(starter) = self.starter.take() {
            let _ = starter.send(Command::Start);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(item)) => {
                if matches!(item, Err(_) | Ok(Event::Close { .. })) {
                    self.finished = true;
                }
                Poll::Ready(Some(item))
            }
        }
    }
}

impl futures::Stream for Events {
    type Item = Result<Event>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_event(cx)
    }
}

// ================ Driver ====================

struct Driver<T: Transport> {
    role: Role,
    options: Options,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    events: mpsc::UnboundedSender<Result<Event>>,
    transport: Option<T>,
    input: InputFramer,
    output: OutputFramer,
    state: ReadyState,
    did_send_close: bool,
    did_receive_close: bool,
    parked_sends: VecDeque<(Message, SendOptions, oneshot::Sender<bool>)>,
    parked_closes: Vec<(Option<CloseCode>, String, oneshot::Sender<()>)>,
    closing_deadline: Option<Instant>,
    url: Url,
}

impl<T: Transport> Driver<T> {
    fn new(role: Role, url: Url, options: Options) -> (Endpoint, Events, Self) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            url: Mutex::new(url.clone()),
            state: Mutex::new(ReadyState::Initialized),
            final_statistics: Mutex::new(Statistics::default()),
        });

        let endpoint = Endpoint {
            commands: command_tx.clone(),
            shared: Arc::clone(&shared),
        };
        let events = Events {
            rx: event_rx,
            starter: Some(command_tx),
            finished: false,
        };
        let max_payload = options.maximum_incoming_message_payload_size;
        let driver = Driver {
            role,
            options,
            shared,
            commands: command_rx,
            commands_open: true,
            events: event_tx,
            transport: None,
            input: InputFramer::new(role, max_payload),
            output: OutputFramer::new(role),
            state: ReadyState::Initialized,
            did_send_close: false,
            did_receive_close: false,
            parked_sends: VecDeque::new(),
            parked_closes: Vec::new(),
            closing_deadline: None,
            url,
        };
        (endpoint, events, driver)
    }

    fn set_state(&mut self, state: ReadyState) {
        self.state = state;
        *self.shared.state.lock().expect("state lock") = state;
    }

    fn emit(&mut self, event: Event) {
        let _ = self.events.send(Ok(event));
    }

    fn statistics(&mut self, reset: bool) -> Statistics {
        let snapshot = Statistics {
            input: self.input.stats,
            output: self.output.stats,
        };
        if reset {
            self.input.stats = Default::default();
            self.output.stats = Default::default();
        }
        snapshot
    }

    // ---------------- client: initialized → connecting ----------------

    async fn run_client<C: Connector<Transport = T>>(mut self, connector: C) {
        // Idle in `initialized` until something forces a transition.
        loop {
            let Some(command) = self.commands.recv().await else {
                // Every handle disappeared before anything started.
                self.set_state(ReadyState::Closed);
                return;
            };
            match command {
                Command::Start => break,
                Command::Send {
                    message,
                    options,
                    ack,
                } => {
                    // The first send initiates the connect; it parks until
                    // the handshake resolves.
                    self.parked_sends.push_back((message, options, ack));
                    break;
                }
                Command::Close { ack, .. } => {
                    // close() before any connect: straight to closed, no
                    // events at all.
                    self.set_state(ReadyState::Closed);
                    let _ = ack.send(());
                    return;
                }
                Command::SampleStatistics { reset, reply } => {
                    let stats = self.statistics(reset);
                    let _ = reply.send(stats);
                }
            }
        }

        self.set_state(ReadyState::Connecting);
        match self.connect_and_handshake(connector).await {
            Ok(result) => self.enter_open(result).await,
            Err(error) => self.fail_before_open(error).await,
        }
    }

    async fn connect_and_handshake<C: Connector<Transport = T>>(
        &mut self,
        mut connector: C,
    ) -> Result<HandshakeResult> {
        // One deadline bounds the whole opening phase, redirects included.
        let deadline = Instant::now() + self.options.opening_handshake_timeout;
        let mut redirects = 0u32;

        'attempt: loop {
            let url = self.url.clone();
            let mut transport = tokio::select! {
                connected = connector.connect(&url, &self.options) => connected?,
                _ = sleep_until(deadline) => return Err(WebSocketError::Timeout),
                _ = self.events.closed() => return Err(WebSocketError::Canceled),
            };

            let mut handshake = ClientHandshake::new(&url, &self.options, rand::random())?;
            transport
                .send(handshake.request_bytes()?)
                .await
                .map_err(WebSocketError::ConnectionFailed)?;

            loop {
                let outcome = tokio::select! {
                    _ = sleep_until(deadline) => {
                        transport.cancel().await;
                        return Err(WebSocketError::Timeout);
                    }
                    _ = self.events.closed() => {
                        transport.cancel().await;
                        return Err(WebSocketError::Canceled);
                    }
                    command = self.commands.recv(), if self.commands_open => {
                        match command {
                            Some(command) => self.park(command),
                            None => self.commands_open = false,
                        }
                        continue;
                    }
                    event = transport.next_event() => match event {
                        Ok(TransportEvent::Receive(bytes)) => handshake.receive(&bytes)?,
                        Ok(TransportEvent::Eof) => match handshake.receive_eof()? {
                            Some(outcome) => Some(outcome),
                            None => return Err(WebSocketError::UnexpectedDisconnect),
                        },
                        // Quality signals are meaningless before open.
                        Ok(_) => continue,
                        Err(err) => return Err(WebSocketError::ConnectionFailed(err)),
                    },
                };

                match outcome {
                    None => continue,
                    Some(ClientOutcome::Ready { result, remainder }) => {
                        self.input.receive(&remainder);
                        self.transport = Some(transport);
                        return Ok(result);
                    }
                    Some(ClientOutcome::Redirect(location)) => {
                        redirects += 1;
                        if redirects > self.options.maximum_redirects {
                            transport.cancel().await;
                            return Err(WebSocketError::MaximumRedirectsExceeded);
                        }
                        let next = self
                            .url
                            .join(&location)
                            .map_err(|_| WebSocketError::InvalidRedirectLocation)?;
                        if !matches!(next.scheme(), "ws" | "wss") {
                            transport.cancel().await;
                            return Err(WebSocketError::InvalidRedirection);
                        }
                        log::debug!("following redirect {} -> {next}", self.url);
                        transport.cancel().await;
                        self.url = next.clone();
                        *self.shared.url.lock().expect("url lock") = next;
                        continue 'attempt;
                    }
                    Some(ClientOutcome::Rejected(failed)) => {
                        transport.cancel().await;
                        return Err(WebSocketError::UpgradeRejected(Box::new(failed)));
                    }
                }
            }
        }
    }

    /// Parks pre-open commands for resolution after the handshake.
    fn park(&mut self, command: Command) {
        match command {
            Command::Start => {}
            Command::Send {
                message,
                options,
                ack,
            } => self.parked_sends.push_back((message, options, ack)),
            Command::Close { code, reason, ack } => {
                self.parked_closes.push((code, reason, ack))
            }
            Command::SampleStatistics { reset, reply } => {
                let stats = self.statistics(reset);
                let _ = reply.send(stats);
            }
        }
    }

    async fn fail_before_open(&mut self, error: WebSocketError) {
        log::debug!("handshake failed: {error}");
        if let Some(mut transport) = self.transport.take() {
            transport.cancel().await;
        }
        self.set_state(ReadyState::Closed);
        // Parked senders observe the terminal state rather than the error.
        for (_, _, ack) in self.parked_sends.drain(..) {
            let _ = ack.send(false);
        }
        for (_, _, ack) in self.parked_closes.drain(..) {
            let _ = ack.send(());
        }
        self.store_final_statistics();
        let _ = self.events.send(Err(error));
    }

    // ---------------- open ----------------

    async fn run_open(mut self, result: HandshakeResult) {
        self.enter_open(result).await;
    }

    async fn enter_open(&mut self, result: HandshakeResult) {
        if let Some(params) = &result.compression {
            self.install_compression(params);
        }
        self.set_state(ReadyState::Open);
        self.emit(Event::Open(result));

        // Drain parked senders in arrival order.
        while let Some((message, options, ack)) = self.parked_sends.pop_front() {
            let accepted = self.write_message(&message, &options).await;
            let _ = ack.send(accepted);
        }
        let closes = std::mem::take(&mut self.parked_closes);
        for (code, reason, ack) in closes {
            self.begin_close(code, &reason).await;
            let _ = ack.send(());
        }

        self.open_loop().await;
        if let Some(mut transport) = self.transport.take() {
            transport.cancel().await;
        }
        self.set_state(ReadyState::Closed);
        self.store_final_statistics();
    }

    fn install_compression(&mut self, params: &CompressionOffer) {
        log::debug!(
            "compression negotiated: server_no_context_takeover={} \
             client_no_context_takeover={} server_max_window_bits={:?} \
             client_max_window_bits={:?}",
            params.server_no_context_takeover,
            params.client_no_context_takeover,
            params.server_max_window_bits,
            params.client_max_window_bits,
        );
        self.output
            .enable_compression(params.deflater(self.role, self.options.compression_level));
        self.input.enable_compression(params.inflater(self.role));
    }

    /// The main event loop for `open` and `closing`. Returns once a close
    /// event was emitted or the consumer disappeared.
    async fn open_loop(&mut self) {
        // Frames decoded from the handshake remainder come first.
        if self.drain_input_frames().await {
            return;
        }

        loop {
            let closing_deadline = self.closing_deadline;
            tokio::select! {
                command = self.commands.recv(), if self.commands_open => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                return;
                            }
                        }
                        None => self.commands_open = false,
                    }
                }
                _ = self.events.closed() => return,
                _ = async { sleep_until(closing_deadline.expect("deadline")).await },
                    if closing_deadline.is_some() =>
                {
                    // The peer never answered our close frame.
                    log::debug!("closing handshake timed out");
                    self.finalize(CloseCode::Abnormal, DISCONNECT_REASON.to_owned());
                    return;
                }
                event = Self::transport_event(&mut self.transport) => match event {
                    Ok(TransportEvent::Receive(bytes)) => {
                        self.input.receive(&bytes);
                        if self.drain_input_frames().await {
                            return;
                        }
                    }
                    Ok(TransportEvent::Eof) | Err(_) => {
                        self.finalize(CloseCode::Abnormal, DISCONNECT_REASON.to_owned());
                        return;
                    }
                    Ok(TransportEvent::ViabilityChange(viable)) => {
                        self.emit(Event::ConnectionViability(viable));
                    }
                    Ok(TransportEvent::BetterPathAvailable(available)) => {
                        self.emit(Event::BetterConnectionAvailable(available));
                    }
                },
            }
        }
    }

    async fn transport_event(transport: &mut Option<T>) -> std::io::Result<TransportEvent> {
        match transport {
            Some(transport) => transport.next_event().await,
            None => std::future::pending().await,
        }
    }

    /// Returns `true` when the endpoint finished closing.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start => false,
            Command::Send {
                message,
                options,
                ack,
            } => {
                if self.state != ReadyState::Open {
                    // closing / closed: refused without side effects.
                    let _ = ack.send(false);
                    return false;
                }
                let accepted = self.write_message(&message, &options).await;
                let _ = ack.send(accepted);
                if !accepted && self.state == ReadyState::Open {
                    // The transport refused the bytes; the connection is
                    // done for.
                    self.finalize(CloseCode::Abnormal, DISCONNECT_REASON.to_owned());
                    return true;
                }
                false
            }
            Command::Close { code, reason, ack } => {
                if self.state == ReadyState::Open {
                    self.begin_close(code, &reason).await;
                }
                let _ = ack.send(());
                false
            }
            Command::SampleStatistics { reset, reply } => {
                let stats = self.statistics(reset);
                let _ = reply.send(stats);
                false
            }
        }
    }

    fn should_compress(&self, message: &Message, options: &SendOptions) -> bool {
        if !self.output.compression_available() {
            return false;
        }
        match options.compress {
            Compress::Never => false,
            Compress::Always => true,
            Compress::Auto => match message {
                Message::Text(text) => self
                    .options
                    .text_auto_compression_range
                    .contains(&text.len()),
                Message::Binary(data) => self
                    .options
                    .binary_auto_compression_range
                    .contains(&data.len()),
                Message::Ping(_) | Message::Pong(_) => false,
            },
        }
    }

    async fn write_message(&mut self, message: &Message, options: &SendOptions) -> bool {
        let compress = self.should_compress(message, options);
        let frame = match message {
            Message::Text(text) => Frame::Text(text.clone()),
            Message::Binary(data) => Frame::Binary(data.clone()),
            Message::Ping(data) => Frame::Ping(data.clone()),
            Message::Pong(data) => Frame::Pong(data.clone()),
        };
        self.write_frame(&frame, compress).await
    }

    async fn write_frame(&mut self, frame: &Frame, compress: bool) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        let buffers = match self.output.encode(frame, compress) {
            Ok(buffers) => buffers,
            Err(err) => {
                log::debug!("failed to encode frame: {err}");
                return false;
            }
        };
        for buffer in buffers {
            if let Err(err) = transport.send(buffer).await {
                log::debug!("transport write failed: {err}");
                return false;
            }
        }
        true
    }

    async fn begin_close(&mut self, code: Option<CloseCode>, reason: &str) {
        // Restricted codes are reporting-only; sending them is normalized
        // to a code-less close frame.
        let code = code.filter(|c| !c.is_restricted());
        self.did_send_close = true;
        self.write_frame(&Frame::Close(code, reason.to_owned()), false)
            .await;
        self.set_state(ReadyState::Closing);
        self.closing_deadline =
            Some(Instant::now() + self.options.closing_handshake_timeout);
    }

    /// Pulls decoded frames out of the input framer. Returns `true` when a
    /// close event was emitted.
    async fn drain_input_frames(&mut self) -> bool {
        while let Some(frame) = self.input.next() {
            if self.handle_frame(frame).await {
                return true;
            }
        }
        false
    }

    async fn handle_frame(&mut self, frame: Frame) -> bool {
        match frame {
            Frame::Text(text) => {
                self.emit(Event::Text(text));
                false
            }
            Frame::Binary(data) => {
                self.emit(Event::Binary(data));
                false
            }
            Frame::Ping(data) => {
                if self.options.automatically_respond_to_pings
                    && self.state == ReadyState::Open
                {
                    self.write_frame(&Frame::Pong(data.clone()), false).await;
                }
                self.emit(Event::Ping(data));
                false
            }
            Frame::Pong(data) => {
                self.emit(Event::Pong(data));
                false
            }
            Frame::Close(code, reason) => {
                self.did_receive_close = true;
                if self.state == ReadyState::Open {
                    // Mirror the peer's close and finish immediately.
                    self.did_send_close = true;
                    self.write_frame(&Frame::Close(code, reason.clone()), false)
                        .await;
                }
                self.closing_deadline = None;
                let code = code.unwrap_or(CloseCode::NoStatusReceived);
                self.finalize(code, reason);
                true
            }
            Frame::ProtocolError(violation) => {
                let reason = violation.to_string();
                self.close_on_fault(CloseCode::Protocol, reason).await;
                true
            }
            Frame::MessageTooBig => {
                self.close_on_fault(CloseCode::MessageTooBig, MESSAGE_TOO_BIG_REASON.to_owned())
                    .await;
                true
            }
        }
    }

    /// Sends a close frame for a local fault and finishes with an unclean
    /// close event.
    async fn close_on_fault(&mut self, code: CloseCode, reason: String) {
        self.did_send_close = true;
        self.write_frame(&Frame::Close(Some(code), reason.clone()), false)
            .await;
        self.closing_deadline = None;
        self.finalize(code, reason);
    }

    /// Emits the final close event.
    fn finalize(&mut self, code: CloseCode, reason: String) {
        let was_clean = self.did_send_close && self.did_receive_close;
        self.emit(Event::Close {
            code,
            reason,
            was_clean,
        });
    }

    fn store_final_statistics(&mut self) {
        let snapshot = self.statistics(false);
        *self
            .shared
            .final_statistics
            .lock()
            .expect("statistics lock") = snapshot;
    }
}
