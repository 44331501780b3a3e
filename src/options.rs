use std::{fmt, sync::Arc, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::{socket::Connector, MAX_PAYLOAD_READ, MAX_READ_BUFFER};

/// The compression level of permessage-deflate, from `flate2`.
pub type CompressionLevel = flate2::Compression;

/// Configuration of a WebSocket endpoint.
///
/// Every connection attempt works on a snapshot of these options taken when the attempt starts,
/// so changes made through [`crate::WebSocket::set_options`] apply from the next attempt on.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use tether::Options;
///
/// let options = Options::default()
///     .with_handshake_timeout(Duration::from_secs(2))
///     .with_reconnection_wait(Duration::from_millis(50), Duration::from_secs(1))
///     .with_max_payload_read(64 * 1024)
///     .with_utf8();
/// ```
#[derive(Clone)]
pub struct Options {
    /// Bound on the whole HTTP upgrade exchange, connection establishment included.
    ///
    /// Default: 5 seconds.
    pub handshake_timeout: Duration,

    /// How long a closing endpoint waits for the peer to acknowledge its close frame.
    ///
    /// Default: 5 seconds.
    pub close_timeout: Duration,

    /// Delay before the first reconnection attempt. Later attempts double it.
    ///
    /// Default: 100 milliseconds.
    pub min_wait_between_reconnection_retries: Duration,

    /// Upper bound of the reconnection delay.
    ///
    /// Default: 10 seconds.
    pub max_wait_between_reconnection_retries: Duration,

    /// Maximum payload size of a single incoming frame.
    ///
    /// Default: [`MAX_PAYLOAD_READ`].
    pub max_payload_read: Option<usize>,

    /// Maximum size of a reassembled (and decompressed) incoming message.
    ///
    /// Default: [`MAX_READ_BUFFER`], or twice `max_payload_read` when that is set.
    pub max_read_buffer: Option<usize>,

    /// Whether incoming text messages are validated as UTF-8. Invalid text closes the
    /// connection with status 1007.
    ///
    /// Default: `false`
    pub check_utf8: bool,

    /// Headers appended to the client upgrade request.
    pub extra_headers: HeaderMap,

    /// Opens the socket of every client connection attempt. `None` uses
    /// [`crate::socket::TcpConnector`].
    pub connector: Option<Arc<dyn Connector>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
            min_wait_between_reconnection_retries: Duration::from_millis(100),
            max_wait_between_reconnection_retries: Duration::from_secs(10),
            max_payload_read: None,
            max_read_buffer: None,
            check_utf8: false,
            extra_headers: HeaderMap::new(),
            connector: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("close_timeout", &self.close_timeout)
            .field(
                "min_wait_between_reconnection_retries",
                &self.min_wait_between_reconnection_retries,
            )
            .field(
                "max_wait_between_reconnection_retries",
                &self.max_wait_between_reconnection_retries,
            )
            .field("max_payload_read", &self.max_payload_read)
            .field("max_read_buffer", &self.max_read_buffer)
            .field("check_utf8", &self.check_utf8)
            .field("extra_headers", &self.extra_headers)
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

impl Options {
    pub fn with_handshake_timeout(self, timeout: Duration) -> Self {
        Self {
            handshake_timeout: timeout,
            ..self
        }
    }

    pub fn with_close_timeout(self, timeout: Duration) -> Self {
        Self {
            close_timeout: timeout,
            ..self
        }
    }

    /// Sets the bounds of the reconnection backoff.
    pub fn with_reconnection_wait(self, min: Duration, max: Duration) -> Self {
        Self {
            min_wait_between_reconnection_retries: min,
            max_wait_between_reconnection_retries: max.max(min),
            ..self
        }
    }

    /// Sets the maximum payload size of incoming frames.
    ///
    /// Frames at or above this size close the connection with status 1009.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum size of a reassembled incoming message.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Enables UTF-8 validation of incoming text messages.
    pub fn with_utf8(self) -> Self {
        Self {
            check_utf8: true,
            ..self
        }
    }

    /// Adds a header to the client upgrade request, replacing any previous value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.extra_headers.insert(name, value);
        self
    }

    /// Uses `connector` to open client sockets.
    pub fn with_connector(self, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector: Some(connector),
            ..self
        }
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub(crate) fn read_buffer_limit(&self) -> usize {
        self.max_read_buffer.unwrap_or(
            self.max_payload_read
                .map(|payload_read| payload_read * 2)
                .unwrap_or(MAX_READ_BUFFER),
        )
    }
}

/// permessage-deflate settings (RFC 7692).
///
/// A client offers these parameters in its upgrade request; a server merges a client's offer
/// with its own settings. Context takeover keeps the compression dictionary between messages,
/// which compresses better and costs memory; `*_no_context_takeover` resets it for every message.
///
/// ```rust
/// use tether::{CompressionLevel, DeflateOptions};
///
/// let options = DeflateOptions::default()
///     .with_level(CompressionLevel::fast())
///     .server_no_context_takeover();
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeflateOptions {
    /// Compression level of outgoing messages.
    pub level: CompressionLevel,

    /// LZ77 window size (9-15 bits) the server uses for its messages. Requires `zlib`.
    #[cfg(feature = "zlib")]
    pub server_max_window_bits: Option<u8>,

    /// LZ77 window size (9-15 bits) the client uses for its messages. Requires `zlib`.
    #[cfg(feature = "zlib")]
    pub client_max_window_bits: Option<u8>,

    /// The server resets its compression context after every message.
    pub server_no_context_takeover: bool,

    /// The client resets its compression context after every message.
    pub client_no_context_takeover: bool,
}

impl DeflateOptions {
    pub fn with_level(self, level: CompressionLevel) -> Self {
        Self { level, ..self }
    }

    pub fn server_no_context_takeover(self) -> Self {
        Self {
            server_no_context_takeover: true,
            ..self
        }
    }

    pub fn client_no_context_takeover(self) -> Self {
        Self {
            client_no_context_takeover: true,
            ..self
        }
    }

    #[cfg(feature = "zlib")]
    #[cfg_attr(docsrs, doc(cfg(feature = "zlib")))]
    pub fn with_server_max_window_bits(self, bits: u8) -> Self {
        Self {
            server_max_window_bits: Some(bits),
            ..self
        }
    }

    #[cfg(feature = "zlib")]
    #[cfg_attr(docsrs, doc(cfg(feature = "zlib")))]
    pub fn with_client_max_window_bits(self, bits: u8) -> Self {
        Self {
            client_max_window_bits: Some(bits),
            ..self
        }
    }
}
