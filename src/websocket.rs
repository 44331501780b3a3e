//! The endpoint: public API, worker thread and connection state machine.
//!
//! A [`WebSocket`] owns at most one worker thread. The worker loops over connection attempts:
//! it snapshots the configuration, connects, performs the upgrade, pumps frames until the
//! connection closes and then either backs off and retries or exits.
//!
//! Shared state is split by contention:
//! - the ready state, stop flag and reconnection switch are atomics;
//! - configuration, the write side of the connection, close bookkeeping and the callback slot
//!   each sit behind their own lock.
//!
//! Lock order is `writer` before `closing`. Callbacks are always invoked with no lock held.
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use url::Url;

use crate::{
    backoff::Backoff,
    cancel::{make_cancellation_request_with_timeout, StopFlag},
    close::{CloseCode, WebSocketCloseInfo},
    frame::{Frame, OpCode},
    handshake::{self, Handshake},
    socket::{Connector, Socket, TcpConnector, POLL_INTERVAL},
    traffic,
    transport::{self, FrameReader, FrameWriter, Incoming},
    DeflateOptions, Options, Result, Role, WebSocketError,
};

pub use crate::traffic::OnTrafficTrackerCallback;

/// Receives every event of an endpoint, on its worker thread.
pub type OnMessageCallback = Arc<dyn Fn(&WebSocketMessage) + Send + Sync>;

const NORMAL_CLOSURE: &str = "Normal closure";
const ABNORMAL_CLOSURE: &str = "Abnormal closure";
const NO_STATUS_CODE: &str = "No status code";

/// Lifecycle phase of the current connection attempt.
///
/// Within one attempt the state only moves forward:
/// `Connecting → Open → Closing → Closed`. A reconnection starts over at `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Kind of a [`WebSocketMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketMessageType {
    Message,
    Open,
    Close,
    Error,
    Ping,
    Pong,
}

/// Details of a failed connection attempt or of an error that ended a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSocketErrorInfo {
    /// Consecutive failed attempts, this one included. Zero for errors on an open connection.
    pub retries: u32,
    /// Delay before the next attempt, zero when no attempt follows.
    pub wait_time: Duration,
    /// Status of the handshake response when the server answered with something other than 101.
    pub http_status: u16,
    pub reason: String,
}

/// One event delivered to the [`OnMessageCallback`].
#[derive(Debug, Clone)]
pub enum WebSocketMessage {
    /// A complete text or binary message.
    Message {
        payload: Bytes,
        binary: bool,
        wire_size: usize,
    },
    /// The connection opened. `headers` are the response headers on a client and the request
    /// headers on a server.
    Open { uri: String, headers: HeaderMap },
    /// The connection closed.
    Close {
        info: WebSocketCloseInfo,
        wire_size: usize,
    },
    Error(WebSocketErrorInfo),
    /// A ping arrived. The pong has already been sent.
    Ping { payload: Bytes, wire_size: usize },
    Pong { payload: Bytes, wire_size: usize },
}

impl WebSocketMessage {
    pub fn kind(&self) -> WebSocketMessageType {
        match self {
            Self::Message { .. } => WebSocketMessageType::Message,
            Self::Open { .. } => WebSocketMessageType::Open,
            Self::Close { .. } => WebSocketMessageType::Close,
            Self::Error(_) => WebSocketMessageType::Error,
            Self::Ping { .. } => WebSocketMessageType::Ping,
            Self::Pong { .. } => WebSocketMessageType::Pong,
        }
    }
}

/// Result of [`WebSocket::send`] and friends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendInfo {
    /// The frame was written to the socket.
    pub success: bool,
    /// Compressing the payload failed; nothing was written.
    pub compression_error: bool,
    /// Size of the payload handed to the call.
    pub payload_size: usize,
    /// Size of the frame on the wire, header included.
    pub wire_size: usize,
}

impl SendInfo {
    fn rejected(payload_size: usize) -> Self {
        Self {
            payload_size,
            ..Self::default()
        }
    }
}

// ================== Shared state ====================

#[derive(Clone)]
struct Config {
    url: String,
    deflate: Option<DeflateOptions>,
    options: Options,
}

/// Close bookkeeping of the current attempt.
#[derive(Default)]
struct CloseState {
    close_timeout: Duration,
    /// `close()` was called while connecting.
    requested: bool,
    /// The caller closed the connection, so it must not be reestablished.
    by_caller: bool,
    /// What our close frame carried, once one was sent.
    sent: Option<WebSocketCloseInfo>,
    /// When the peer's acknowledgement is due.
    deadline: Option<Instant>,
}

/// Why an attempt did not reach `Open`.
struct Failure {
    error: WebSocketError,
    http_status: u16,
}

impl From<WebSocketError> for Failure {
    fn from(error: WebSocketError) -> Self {
        let http_status = match error {
            WebSocketError::InvalidStatusCode(status) => status,
            _ => 0,
        };
        Self { error, http_status }
    }
}

struct Shared {
    role: Role,
    ready_state: AtomicU8,
    stop: Arc<AtomicBool>,
    automatic_reconnection: AtomicBool,
    config: Mutex<Config>,
    writer: Mutex<Option<FrameWriter>>,
    closing: Mutex<CloseState>,
    close_info: Mutex<WebSocketCloseInfo>,
    on_message: Mutex<Option<OnMessageCallback>>,
    /// Socket handed to [`WebSocket::from_socket`], consumed by the first attempt.
    accepted: Mutex<Option<Arc<dyn Socket>>>,
}

impl Shared {
    fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ReadyState) {
        let previous = self.ready_state.swap(state as u8, Ordering::AcqRel);
        if previous != state as u8 {
            log::trace!(
                "{} state {} -> {state}",
                self.role,
                ReadyState::from_u8(previous)
            );
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn close_expired(&self) -> bool {
        self.closing
            .lock()
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn emit(&self, message: WebSocketMessage) {
        let callback = self.on_message.lock().clone();
        if let Some(callback) = callback {
            callback(&message);
        }
    }

    /// Moves `Open → Closing` and writes `frame`. Returns `false` when the connection was not
    /// open, in which case nothing is sent.
    fn send_close(&self, frame: Frame, info: WebSocketCloseInfo, by_caller: bool) -> bool {
        let mut writer = self.writer.lock();
        if self
            .ready_state
            .compare_exchange(
                ReadyState::Open as u8,
                ReadyState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        log::trace!("{} state {} -> {}", self.role, ReadyState::Open, ReadyState::Closing);

        {
            let mut closing = self.closing.lock();
            closing.by_caller |= by_caller;
            closing.deadline = Some(Instant::now() + closing.close_timeout);
            closing.sent = Some(info);
        }

        if let Some(writer) = writer.as_mut() {
            if let Err(err) = writer.send(frame) {
                log::debug!("unable to send close frame: {err}");
            }
        }

        true
    }

    fn close_normally(&self, by_caller: bool) -> bool {
        self.send_close(
            Frame::close(CloseCode::Normal, NORMAL_CLOSURE),
            WebSocketCloseInfo::new(CloseCode::Normal, NORMAL_CLOSURE),
            by_caller,
        )
    }

    fn send_frame(&self, frame: Frame) -> SendInfo {
        let payload_size = frame.payload.len();

        let mut writer = self.writer.lock();
        if self.state() != ReadyState::Open {
            return SendInfo::rejected(payload_size);
        }
        let Some(writer) = writer.as_mut() else {
            return SendInfo::rejected(payload_size);
        };

        let frame = match writer.compress(frame) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("{err}");
                return SendInfo {
                    compression_error: true,
                    ..SendInfo::rejected(payload_size)
                };
            }
        };

        match writer.write_frame(frame) {
            Ok(wire_size) => SendInfo {
                success: true,
                compression_error: false,
                payload_size,
                wire_size,
            },
            Err(err) => {
                log::debug!("unable to send frame: {err}");
                SendInfo::rejected(payload_size)
            }
        }
    }

    fn sleep_unless_stopped(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    // ================== worker ====================

    fn run(&self) {
        log::debug!("{} worker started", self.role);

        let mut backoff = {
            let config = self.config.lock();
            Backoff::new(
                config.options.min_wait_between_reconnection_retries,
                config.options.max_wait_between_reconnection_retries,
            )
        };

        while !self.stop_requested() {
            let config = self.config.lock().clone();
            let options = &config.options;
            backoff.set_bounds(
                options.min_wait_between_reconnection_retries,
                options.max_wait_between_reconnection_retries,
            );

            let outcome = self.run_attempt(&config);

            let reconnect = self.role == Role::Client
                && !self.stop_requested()
                && self.automatic_reconnection.load(Ordering::Acquire)
                && !self.closing.lock().by_caller;

            match outcome {
                Ok(()) => {
                    backoff.reset();
                    if !reconnect {
                        break;
                    }
                    log::debug!("reconnecting to {}", config.url);
                    self.sleep_unless_stopped(options.min_wait_between_reconnection_retries);
                }
                Err(_) if self.stop_requested() => break,
                Err(failure) => {
                    let delay = backoff.next_delay();
                    let wait_time = if reconnect { delay } else { Duration::ZERO };
                    log::warn!(
                        "connection attempt {} failed: {}, retrying in {wait_time:?}",
                        backoff.attempts(),
                        failure.error
                    );

                    self.emit(WebSocketMessage::Error(WebSocketErrorInfo {
                        retries: backoff.attempts(),
                        wait_time,
                        http_status: failure.http_status,
                        reason: failure.error.to_string(),
                    }));

                    if !reconnect {
                        break;
                    }
                    self.sleep_unless_stopped(wait_time);
                }
            }
        }

        self.set_state(ReadyState::Closed);
        log::debug!("{} worker exited", self.role);
    }

    fn run_attempt(&self, config: &Config) -> std::result::Result<(), Failure> {
        {
            // a close() issued since start() still applies to this attempt
            let mut closing = self.closing.lock();
            *closing = CloseState {
                close_timeout: config.options.close_timeout,
                requested: closing.requested,
                by_caller: closing.by_caller,
                ..CloseState::default()
            };
            self.set_state(ReadyState::Connecting);
        }

        let (socket, handshake) = self.establish(config).map_err(|err| {
            self.set_state(ReadyState::Closed);
            Failure::from(err)
        })?;
        self.run_connection(socket, handshake, config);

        Ok(())
    }

    /// Connects and performs the upgrade, bounded by the handshake timeout.
    fn establish(&self, config: &Config) -> Result<(Arc<dyn Socket>, Handshake)> {
        let options = &config.options;
        let cancel = make_cancellation_request_with_timeout(options.handshake_timeout, &self.stop);

        let (socket, handshake) = match self.role {
            Role::Server => {
                let socket = self
                    .accepted
                    .lock()
                    .take()
                    .ok_or(WebSocketError::ConnectionClosed)?;
                let handshake = handshake::server(
                    &*socket,
                    options.handshake_timeout,
                    &self.stop,
                    config.deflate.as_ref(),
                    &cancel,
                );
                (socket, handshake)
            }
            Role::Client => {
                let url = Url::parse(&config.url)?;
                let connector: Arc<dyn Connector> = match &options.connector {
                    Some(connector) => Arc::clone(connector),
                    None => Arc::new(TcpConnector::new()),
                };
                let socket = connector.connect(&url, options.handshake_timeout, &cancel)?;
                let handshake = handshake::client(
                    &*socket,
                    &url,
                    config.deflate.as_ref(),
                    &options.extra_headers,
                    &cancel,
                );
                (socket, handshake)
            }
        };

        match handshake {
            Ok(handshake) => Ok((socket, handshake)),
            Err(err) => {
                socket.close();
                Err(err)
            }
        }
    }

    fn run_connection(&self, socket: Arc<dyn Socket>, handshake: Handshake, config: &Config) {
        let options = &config.options;
        let level = config
            .deflate
            .as_ref()
            .map(|deflate| deflate.level)
            .unwrap_or_default();
        let extensions = handshake.extensions.as_ref();

        let mut reader = FrameReader::new(
            Arc::clone(&socket),
            self.role,
            extensions.map(|extensions| extensions.decompressor(self.role)),
            options.payload_limit(),
            options.read_buffer_limit(),
            options.check_utf8,
        );
        let writer = FrameWriter::new(
            Arc::clone(&socket),
            self.role,
            extensions.map(|extensions| extensions.compressor(self.role, level)),
            StopFlag(Arc::clone(&self.stop)),
        );

        {
            let mut slot = self.writer.lock();
            *slot = Some(writer);
            self.set_state(ReadyState::Open);
        }
        log::info!("{} connection open: {}", self.role, handshake.uri);

        self.emit(WebSocketMessage::Open {
            uri: handshake.uri,
            headers: handshake.headers,
        });

        let requested = self.closing.lock().requested;
        if requested {
            self.close_normally(true);
        }

        let (info, wire_size) = self.pump(&mut reader);

        {
            let mut slot = self.writer.lock();
            *slot = None;
            self.set_state(ReadyState::Closed);
        }
        socket.close();
        log::info!("{} connection closed: {} {}", self.role, info.code, info.reason);

        *self.close_info.lock() = info.clone();
        self.emit(WebSocketMessage::Close { info, wire_size });
    }

    /// Delivers incoming frames until the connection ends and returns how it ended.
    fn pump(&self, reader: &mut FrameReader) -> (WebSocketCloseInfo, usize) {
        let cancel = || self.stop_requested() || self.close_expired();

        loop {
            let Incoming { frame, wire_size } = match reader.read_next(&cancel) {
                Ok(incoming) => incoming,
                Err(err) => return (self.on_read_error(err), 0),
            };

            match frame.opcode {
                OpCode::Ping => {
                    self.send_pong(&frame.payload);
                    self.emit(WebSocketMessage::Ping {
                        payload: frame.payload.freeze(),
                        wire_size,
                    });
                }
                OpCode::Pong => self.emit(WebSocketMessage::Pong {
                    payload: frame.payload.freeze(),
                    wire_size,
                }),
                OpCode::Close => return (self.on_peer_close(&frame), wire_size),
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    self.emit(WebSocketMessage::Message {
                        binary: frame.opcode != OpCode::Text,
                        payload: frame.payload.freeze(),
                        wire_size,
                    })
                }
            }
        }
    }

    fn send_pong(&self, payload: &[u8]) {
        let mut writer = self.writer.lock();
        if self.state() != ReadyState::Open {
            return;
        }
        if let Some(writer) = writer.as_mut() {
            if let Err(err) = writer.send(Frame::pong(payload)) {
                log::debug!("unable to send pong: {err}");
            }
        }
    }

    fn on_peer_close(&self, frame: &Frame) -> WebSocketCloseInfo {
        let info = match frame.close_code() {
            Some(code) => WebSocketCloseInfo::new(code, frame.close_reason().unwrap_or_default()),
            None => WebSocketCloseInfo::new(CloseCode::Status, NO_STATUS_CODE),
        };

        // an acknowledgement of our own close needs no answer
        if self.send_close(Frame::close_raw(&frame.payload), info.clone(), false) {
            log::debug!("peer closed the connection: {} {}", info.code, info.reason);
        }

        info
    }

    fn on_read_error(&self, err: WebSocketError) -> WebSocketCloseInfo {
        let abnormal = WebSocketCloseInfo::new(CloseCode::Abnormal, ABNORMAL_CLOSURE);

        match err {
            WebSocketError::Cancelled => {
                let sent = self.closing.lock().sent.clone();
                match sent {
                    Some(sent) if self.stop_requested() => sent,
                    _ => {
                        log::debug!("close acknowledgement timed out");
                        abnormal
                    }
                }
            }
            WebSocketError::ConnectionClosed => abnormal,
            WebSocketError::IoError(err) => {
                log::warn!("{} connection failed: {err}", self.role);
                self.emit(WebSocketMessage::Error(WebSocketErrorInfo {
                    reason: err.to_string(),
                    ..WebSocketErrorInfo::default()
                }));
                abnormal
            }
            err => {
                log::warn!("{} protocol error: {err}", self.role);
                let code = transport::close_code_for(&err);
                let reason = err.to_string();

                self.emit(WebSocketMessage::Error(WebSocketErrorInfo {
                    reason: reason.clone(),
                    ..WebSocketErrorInfo::default()
                }));

                let info = WebSocketCloseInfo::new(code, reason);
                self.send_close(Frame::close(code, &info.reason), info.clone(), false);
                info
            }
        }
    }
}

// ================== WebSocket ====================

/// A WebSocket endpoint driven by a background worker thread.
///
/// Every method takes `&self` and may be called from any thread, including from inside the
/// message callback. Events are delivered to the callback on the worker thread in the order
/// they happen on the wire.
///
/// A client endpoint built with [`WebSocket::new`] connects to its URL on [`start`](Self::start)
/// and, unless automatic reconnection is disabled or the caller closed the connection,
/// reconnects with exponential backoff whenever the connection ends or an attempt fails.
///
/// A server endpoint built with [`WebSocket::from_socket`] answers the upgrade request arriving
/// on an accepted socket. It never reconnects.
///
/// # Example
/// ```no_run
/// use tether::{WebSocket, WebSocketMessage};
///
/// let ws = WebSocket::new();
/// ws.set_url("ws://127.0.0.1:8080/chat");
/// ws.set_on_message_callback(|msg| {
///     if let WebSocketMessage::Message { payload, .. } = msg {
///         println!("{}", String::from_utf8_lossy(payload));
///     }
/// });
/// ws.start();
/// ```
pub struct WebSocket {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Default for WebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocket {
    /// Creates a client endpoint with default options and automatic reconnection enabled.
    pub fn new() -> Self {
        Self::with_role(Role::Client, None, Options::default())
    }

    /// Creates a server endpoint over an accepted connection.
    ///
    /// The upgrade request is read from `socket` once the endpoint is started.
    pub fn from_socket(socket: Arc<dyn Socket>, options: Options) -> Self {
        Self::with_role(Role::Server, Some(socket), options)
    }

    fn with_role(role: Role, socket: Option<Arc<dyn Socket>>, options: Options) -> Self {
        let shared = Shared {
            role,
            ready_state: AtomicU8::new(ReadyState::Closed as u8),
            stop: Arc::new(AtomicBool::new(false)),
            automatic_reconnection: AtomicBool::new(true),
            config: Mutex::new(Config {
                url: String::new(),
                deflate: None,
                options,
            }),
            writer: Mutex::new(None),
            closing: Mutex::new(CloseState::default()),
            close_info: Mutex::new(WebSocketCloseInfo::default()),
            on_message: Mutex::new(None),
            accepted: Mutex::new(socket),
        };

        Self {
            shared: Arc::new(shared),
            thread: Mutex::new(None),
        }
    }

    /// Sets the URL used from the next connection attempt on.
    pub fn set_url(&self, url: impl Into<String>) {
        self.shared.config.lock().url = url.into();
    }

    pub fn url(&self) -> String {
        self.shared.config.lock().url.clone()
    }

    /// Enables permessage-deflate (or disables it with `None`) from the next connection attempt
    /// on.
    pub fn set_per_message_deflate_options(&self, options: Option<DeflateOptions>) {
        self.shared.config.lock().deflate = options;
    }

    pub fn per_message_deflate_options(&self) -> Option<DeflateOptions> {
        self.shared.config.lock().deflate.clone()
    }

    /// Replaces the options used from the next connection attempt on.
    pub fn set_options(&self, options: Options) {
        self.shared.config.lock().options = options;
    }

    pub fn options(&self) -> Options {
        self.shared.config.lock().options.clone()
    }

    pub fn enable_automatic_reconnection(&self) {
        self.shared
            .automatic_reconnection
            .store(true, Ordering::Release);
    }

    pub fn disable_automatic_reconnection(&self) {
        self.shared
            .automatic_reconnection
            .store(false, Ordering::Release);
    }

    pub fn is_automatic_reconnection_enabled(&self) -> bool {
        self.shared.automatic_reconnection.load(Ordering::Acquire)
    }

    /// Replaces the callback receiving this endpoint's events.
    ///
    /// The callback runs on the worker thread; blocking in it stalls reads.
    pub fn set_on_message_callback<F>(&self, callback: F)
    where
        F: Fn(&WebSocketMessage) + Send + Sync + 'static,
    {
        *self.shared.on_message.lock() = Some(Arc::new(callback));
    }

    /// Installs the process-wide callback invoked with `(bytes, incoming)` for every chunk any
    /// endpoint reads or writes.
    pub fn set_traffic_tracker_callback<F>(callback: F)
    where
        F: Fn(usize, bool) + Send + Sync + 'static,
    {
        traffic::set(Arc::new(callback));
    }

    /// Removes the process-wide traffic callback.
    pub fn reset_traffic_tracker_callback() {
        traffic::reset();
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    /// How the last connection ended.
    pub fn close_info(&self) -> WebSocketCloseInfo {
        self.shared.close_info.lock().clone()
    }

    /// Spawns the worker thread. Does nothing while a worker is running.
    pub fn start(&self) {
        let mut thread = self.thread.lock();
        if thread.as_ref().is_some_and(|handle| !handle.is_finished()) {
            log::debug!("worker already running");
            return;
        }
        if let Some(handle) = thread.take() {
            if handle.join().is_err() {
                log::error!("previous worker panicked");
            }
        }

        self.shared.stop.store(false, Ordering::Release);
        {
            let mut closing = self.shared.closing.lock();
            *closing = CloseState::default();
            self.shared.set_state(ReadyState::Connecting);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("tether-worker".to_string())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => *thread = Some(handle),
            Err(err) => {
                log::error!("unable to spawn worker thread: {err}");
                self.shared.set_state(ReadyState::Closed);
            }
        }
    }

    /// Closes the connection, stops reconnecting and waits for the worker to exit.
    ///
    /// Called on the worker thread (from the message callback) it only signals the worker,
    /// which exits once the callback returns.
    pub fn stop(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };

        self.shared.close_normally(true);
        self.shared.stop.store(true, Ordering::Release);

        if handle.thread().id() == thread::current().id() {
            *self.thread.lock() = Some(handle);
            return;
        }

        if handle.join().is_err() {
            log::error!("worker panicked");
        }
        self.shared.set_state(ReadyState::Closed);
    }

    /// Sends a text message.
    pub fn send(&self, text: impl AsRef<str>) -> SendInfo {
        self.shared.send_frame(Frame::text(text.as_ref()))
    }

    /// Sends a binary message.
    pub fn send_binary(&self, data: impl AsRef<[u8]>) -> SendInfo {
        self.shared.send_frame(Frame::binary(data))
    }

    /// Serializes `data` to JSON and sends it as a text message.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub fn send_json<T: serde::Serialize>(&self, data: &T) -> Result<SendInfo> {
        let bytes = serde_json::to_vec(data)?;
        Ok(self.shared.send_frame(Frame::text(bytes)))
    }

    /// Sends a ping. Payloads over 125 bytes are rejected.
    pub fn ping(&self, payload: impl AsRef<[u8]>) -> SendInfo {
        let payload = payload.as_ref();
        if payload.len() > 125 {
            return SendInfo::rejected(payload.len());
        }
        self.shared.send_frame(Frame::ping(payload))
    }

    /// Starts the closing handshake with `1000 "Normal closure"`.
    ///
    /// The connection is not reestablished afterwards. While connecting, the connection is
    /// closed as soon as it opens. Otherwise this does nothing.
    pub fn close(&self) {
        if self.shared.state() == ReadyState::Connecting {
            let mut closing = self.shared.closing.lock();
            if self.shared.state() == ReadyState::Connecting {
                closing.requested = true;
                closing.by_caller = true;
                return;
            }
        }

        self.shared.close_normally(true);
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        self.stop();
    }
}
