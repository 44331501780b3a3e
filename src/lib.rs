//! # tether
//! A WebSocket endpoint (RFC 6455) that owns a background I/O thread, reconnects automatically
//! and can be driven from any thread. Optional permessage-deflate compression (RFC 7692) is
//! negotiated during the handshake.
//!
//! The endpoint performs the HTTP upgrade itself: handshake lines are read through a cancellable,
//! timeout-bounded reader so a stalled peer can never pin the worker thread. Once open, frames are
//! pumped on the worker thread and every event (open, message, ping, pong, close, error) is
//! delivered in wire order to a single callback.
//!
//! # Features
//! - `zlib`: Enables window size control (`client_max_window_bits` / `server_max_window_bits`)
//!   for permessage-deflate.
//! - `simd`: Uses `simdutf8` for UTF-8 validation of incoming text messages.
//! - `json`: Enables [`WebSocket::send_json`].
//!
//! # Client Example
//! ```no_run
//! use tether::{WebSocket, WebSocketMessage};
//!
//! let ws = WebSocket::new();
//! ws.set_url("wss://echo.websocket.org");
//! ws.set_on_message_callback(|msg: &WebSocketMessage| match msg {
//!     WebSocketMessage::Open { .. } => log::info!("connected"),
//!     WebSocketMessage::Message { payload, .. } => log::info!("{} bytes", payload.len()),
//!     WebSocketMessage::Close { info, .. } => log::info!("closed: {} {}", info.code, info.reason),
//!     WebSocketMessage::Error(err) => log::warn!("error: {}", err.reason),
//!     _ => {}
//! });
//! ws.start();
//! // ...
//! let _ = ws.send("hello");
//! ws.stop();
//! ```
//!
//! # Server Example
//! ```no_run
//! use std::{net::TcpListener, sync::Arc};
//! use tether::{socket::TcpSocket, Options, WebSocket};
//!
//! fn serve() -> tether::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:9001")?;
//!     let (stream, _) = listener.accept()?;
//!     let socket = TcpSocket::from_stream(stream)?;
//!
//!     let ws = WebSocket::from_socket(Arc::new(socket), Options::default());
//!     ws.set_on_message_callback(|msg| log::debug!("{:?}", msg.kind()));
//!     ws.start();
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod backoff;
pub mod cancel;
pub mod close;
pub mod codec;
mod compression;
pub mod frame;
mod handshake;
mod mask;
mod options;
pub mod parser;
pub mod socket;
mod traffic;
mod transport;
mod websocket;

use thiserror::Error;

pub use close::{CloseCode, WebSocketCloseInfo};
pub use frame::{Frame, OpCode};
pub use options::{CompressionLevel, DeflateOptions, Options};
pub use parser::{HttpRequest, HttpResponse};
pub use websocket::{
    OnMessageCallback, OnTrafficTrackerCallback, ReadyState, SendInfo, WebSocket,
    WebSocketErrorInfo, WebSocketMessage, WebSocketMessageType,
};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit will be rejected to ensure memory safety
/// and prevent excessively large messages from impacting performance.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed read buffer size, set to 2 MiB.
///
/// When the reassembly buffer of a fragmented message exceeds this size the connection is closed.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// The role the endpoint is taking on a connection.
///
/// Client frames are masked, server frames are not.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Represents errors that can occur during WebSocket operations.
///
/// The errors are broadly categorized into:
///
/// - Handshake errors (HTTP parsing, upgrade validation, cancellation of a handshake read)
/// - Protocol errors (e.g., invalid frames, incorrect sequence of operations)
/// - Data validation errors (e.g., invalid UTF-8, oversized payloads)
/// - I/O, TLS and URL errors
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Occurs when receiving a WebSocket fragment that violates RFC 6455,
    /// such as receiving a new fragment before completing the previous one.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// Indicates that a text frame or close frame reason contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// Occurs when receiving a continuation frame without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Returned when the handshake response carries a status other than 101.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The "Upgrade" header is missing or does not contain "websocket".
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The "Connection" header is missing or does not contain "upgrade".
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The "Sec-WebSocket-Accept" header does not match the key sent by the client.
    #[error("Invalid Sec-WebSocket-Accept header")]
    InvalidAcceptKey,

    /// Returned when attempting to perform operations on a closed WebSocket connection.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A received close frame has a 1 byte payload.
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// A close frame contains a status code that may not be sent on the wire.
    #[error("Invalid close code")]
    InvalidCloseCode,

    /// Reserved bits are set in a frame header.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A control frame (ping, pong, or close) was received with the FIN bit not set.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A ping, pong or close frame payload exceeds 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// A frame or a reassembled message exceeds the configured limits.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A server received a frame that was not masked.
    #[error("Client frames must be masked")]
    UnmaskedFrame,

    /// A client received a masked frame.
    #[error("Server frames must not be masked")]
    MaskedFrame,

    /// The "Sec-WebSocket-Version" header is not 13.
    #[error("Sec-Websocket-Version must be 13")]
    InvalidSecWebsocketVersion,

    /// A frame carries an opcode that RFC 6455 does not define.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// The upgrade request lacks the "Sec-WebSocket-Key" header.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// The upgrade request is not acceptable (method, version or upgrade header).
    #[error("Invalid upgrade request: {0}")]
    InvalidRequest(String),

    /// Only "ws://" and "wss://" schemes are valid.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// The URL has no host to connect to.
    #[error("Missing host in url")]
    MissingHost,

    /// The host could not be used as a TLS server name.
    #[error("Invalid DNS name")]
    InvalidDnsName,

    /// A compressed frame arrived on a connection that did not negotiate compression.
    #[error("Received compressed frame on stream that doesn't support compression")]
    CompressionNotSupported,

    /// A handshake line or header block could not be parsed.
    #[error("{0}")]
    HttpParse(String),

    /// A blocking read or write was abandoned because its cancellation predicate fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// Wraps errors from URL parsing.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors such as connection resets.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from the TLS session.
    #[error(transparent)]
    Tls(#[from] rustls::Error),

    /// Occurs when serialization of JSON data fails.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
