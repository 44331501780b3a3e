//! Blocking sockets with cancellable reads and writes.
//!
//! The endpoint talks to the network through the [`Socket`] capability. Implementations only
//! provide three primitives: a `recv` that returns at least once per poll interval even when no
//! data arrived, a `send`, and a `close`. Line reading for the HTTP handshake and complete writes
//! are built on top of them and re-check a [`CancellationRequest`] between every wait.
//!
//! [`TcpSocket`] is the stock implementation for `ws://` and `wss://`, created either by a
//! [`TcpConnector`] or from an already accepted [`TcpStream`].
use std::{
    io::{self, Read, Write},
    net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use rustls::{pki_types::ServerName, ClientConfig, ClientConnection, StreamOwned};
use url::{Host, Url};

use crate::{cancel::CancellationRequest, Result, WebSocketError};

/// How long a single `recv`/`send` on a [`TcpSocket`] may block before returning to the caller
/// so it can poll its cancellation predicate.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest line accepted by [`Socket::read_line`], terminator included.
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// A connected byte stream shared between the worker thread (reads) and any thread that sends.
///
/// `recv` must not block indefinitely: when nothing arrives within the implementation's poll
/// interval it returns an error of kind [`io::ErrorKind::WouldBlock`] or
/// [`io::ErrorKind::TimedOut`]. `Ok(0)` means the peer closed the stream.
pub trait Socket: Send + Sync {
    /// Reads available bytes into `buf`.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes some bytes of `buf`, returning how many were accepted.
    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Shuts the stream down. Pending and future reads observe end of stream.
    fn close(&self);

    /// Reads one line terminated by `\n`, returning it with its terminator.
    ///
    /// Bytes are consumed one at a time so nothing past the line is taken from the stream; the
    /// bytes that follow a handshake belong to the frame reader.
    fn read_line(&self, cancel: &dyn CancellationRequest) -> Result<String> {
        let mut line = Vec::with_capacity(128);
        let mut byte = [0u8; 1];

        loop {
            if cancel.is_cancellation_requested() {
                return Err(WebSocketError::Cancelled);
            }

            match self.recv(&mut byte) {
                Ok(0) => return Err(WebSocketError::ConnectionClosed),
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                    if line.len() >= MAX_LINE_LENGTH {
                        return Err(WebSocketError::HttpParse(format!(
                            "Line exceeds {MAX_LINE_LENGTH} bytes"
                        )));
                    }
                }
                Err(err) if is_idle(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        String::from_utf8(line)
            .map_err(|_| WebSocketError::HttpParse("Line is not valid UTF-8".to_string()))
    }

    /// Writes all of `data`, retrying partial writes until done or cancelled.
    fn write_bytes(&self, mut data: &[u8], cancel: &dyn CancellationRequest) -> Result<()> {
        while !data.is_empty() {
            if cancel.is_cancellation_requested() {
                return Err(WebSocketError::Cancelled);
            }

            match self.send(data) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => data = &data[n..],
                Err(err) if is_idle(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

/// Whether an I/O error only means "nothing happened during this poll".
pub(crate) fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Opens sockets for the endpoint at the start of every connection attempt.
///
/// The default is [`TcpConnector`]; tests and embedders can plug in their own transport.
pub trait Connector: Send + Sync {
    /// Connects to the host named by `url`, giving up after `timeout` or when `cancel` fires.
    fn connect(
        &self,
        url: &Url,
        timeout: Duration,
        cancel: &dyn CancellationRequest,
    ) -> Result<Arc<dyn Socket>>;
}

// ================== TcpSocket ====================

enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Mutex<StreamOwned<ClientConnection, TcpStream>>),
}

/// A [`Socket`] over TCP, optionally wrapped in a TLS client session.
pub struct TcpSocket {
    stream: MaybeTlsStream,
    /// Handle used to shut the connection down without taking the TLS lock.
    raw: TcpStream,
    peer_addr: Option<SocketAddr>,
}

impl TcpSocket {
    /// Wraps an accepted or connected stream, typically one returned by
    /// [`std::net::TcpListener::accept`] for a server-role endpoint.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        configure(&stream)?;
        let raw = stream.try_clone()?;
        let peer_addr = stream.peer_addr().ok();

        Ok(Self {
            stream: MaybeTlsStream::Plain(stream),
            raw,
            peer_addr,
        })
    }

    fn tls(stream: StreamOwned<ClientConnection, TcpStream>) -> io::Result<Self> {
        let raw = stream.sock.try_clone()?;
        let peer_addr = stream.sock.peer_addr().ok();

        Ok(Self {
            stream: MaybeTlsStream::Tls(Mutex::new(stream)),
            raw,
            peer_addr,
        })
    }

    /// Address of the remote end, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether the stream is protected by TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self.stream, MaybeTlsStream::Tls(_))
    }
}

fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    stream.set_write_timeout(Some(POLL_INTERVAL))?;
    let _ = stream.set_nodelay(true);
    Ok(())
}

impl Socket for TcpSocket {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.stream {
            MaybeTlsStream::Plain(stream) => (&*stream).read(buf),
            MaybeTlsStream::Tls(stream) => {
                let mut stream = stream.lock();
                let StreamOwned { conn, sock } = &mut *stream;
                // flush records left behind by a send that hit its poll timeout
                if conn.wants_write() {
                    let _ = conn.write_tls(sock);
                }
                stream.read(buf)
            }
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match &self.stream {
            MaybeTlsStream::Plain(stream) => (&*stream).write(buf),
            MaybeTlsStream::Tls(stream) => {
                let mut stream = stream.lock();
                let StreamOwned { conn, sock } = &mut *stream;

                let accepted = conn.writer().write(buf)?;
                while conn.wants_write() {
                    match conn.write_tls(sock) {
                        Ok(_) => {}
                        Err(err) if is_idle(&err) => break,
                        Err(err) => return Err(err),
                    }
                }

                Ok(accepted)
            }
        }
    }

    fn close(&self) {
        if let MaybeTlsStream::Tls(stream) = &self.stream {
            let mut stream = stream.lock();
            let StreamOwned { conn, sock } = &mut *stream;
            conn.send_close_notify();
            let _ = conn.write_tls(sock);
        }
        let _ = self.raw.shutdown(Shutdown::Both);
    }
}

// ================== TcpConnector ====================

/// Connects `ws://` URLs over plain TCP and `wss://` URLs over TLS.
///
/// Without an explicit configuration, TLS sessions trust the Mozilla root store shipped by
/// `webpki-roots`.
#[derive(Clone, Default)]
pub struct TcpConnector {
    tls_config: Option<Arc<ClientConfig>>,
}

impl TcpConnector {
    /// Creates a connector with the default TLS configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector using `config` for `wss://` URLs.
    pub fn with_tls_config(config: Arc<ClientConfig>) -> Self {
        Self {
            tls_config: Some(config),
        }
    }

    fn open_tcp(
        host: &str,
        port: u16,
        timeout: Duration,
        cancel: &dyn CancellationRequest,
    ) -> Result<TcpStream> {
        let mut last_error = None;

        for addr in (host, port).to_socket_addrs()? {
            if cancel.is_cancellation_requested() {
                return Err(WebSocketError::Cancelled);
            }

            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    log::debug!("connected to {addr}");
                    return Ok(stream);
                }
                Err(err) => {
                    log::debug!("unable to connect to {addr}: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {host}"),
                )
            })
            .into())
    }
}

impl Connector for TcpConnector {
    fn connect(
        &self,
        url: &Url,
        timeout: Duration,
        cancel: &dyn CancellationRequest,
    ) -> Result<Arc<dyn Socket>> {
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            _ => return Err(WebSocketError::InvalidHttpScheme),
        };

        let host = match url.host().ok_or(WebSocketError::MissingHost)? {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => addr.to_string(),
        };
        let port = url
            .port_or_known_default()
            .ok_or(WebSocketError::InvalidHttpScheme)?;

        let tcp = Self::open_tcp(&host, port, timeout, cancel)?;
        configure(&tcp)?;

        if !secure {
            return Ok(Arc::new(TcpSocket::from_stream(tcp)?));
        }

        let config = match &self.tls_config {
            Some(config) => Arc::clone(config),
            None => default_tls_config()?,
        };

        let server_name = match host.parse::<IpAddr>() {
            Ok(ip) => ServerName::from(ip),
            Err(_) => ServerName::try_from(host).map_err(|_| WebSocketError::InvalidDnsName)?,
        };

        let mut conn = ClientConnection::new(config, server_name)?;
        let mut tcp = tcp;
        while conn.is_handshaking() {
            if cancel.is_cancellation_requested() {
                return Err(WebSocketError::Cancelled);
            }
            match conn.complete_io(&mut tcp) {
                Ok(_) => {}
                Err(err) if is_idle(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        log::debug!("tls session established with {}", url);

        Ok(Arc::new(TcpSocket::tls(StreamOwned::new(conn, tcp))?))
    }
}

/// Creates a TLS client configuration trusting the `webpki-roots` certificates.
fn default_tls_config() -> Result<Arc<ClientConfig>> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(Arc::new(config))
}

// ================== MockSocket ====================

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::VecDeque,
        io,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use parking_lot::Mutex;

    use super::Socket;

    /// In-memory socket: reads come from a scripted input queue, every `send` call is recorded
    /// as one chunk.
    #[derive(Default)]
    pub(crate) struct MockSocket {
        input: Mutex<VecDeque<u8>>,
        writes: Mutex<Vec<Vec<u8>>>,
        closed: AtomicBool,
        eof_when_drained: bool,
    }

    impl MockSocket {
        /// Socket whose reads idle once `input` is consumed.
        pub(crate) fn new(input: impl AsRef<[u8]>) -> Self {
            let socket = Self::default();
            socket.push_input(input);
            socket
        }

        /// Socket whose reads report end of stream once `input` is consumed.
        pub(crate) fn with_eof(input: impl AsRef<[u8]>) -> Self {
            let mut socket = Self::new(input);
            socket.eof_when_drained = true;
            socket
        }

        pub(crate) fn push_input(&self, input: impl AsRef<[u8]>) {
            self.input.lock().extend(input.as_ref());
        }

        pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().clone()
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.writes.lock().concat()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Acquire)
        }
    }

    impl Socket for MockSocket {
        fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            if self.is_closed() {
                return Ok(0);
            }

            let mut input = self.input.lock();
            if input.is_empty() {
                drop(input);
                if self.eof_when_drained {
                    return Ok(0);
                }
                std::thread::sleep(Duration::from_millis(2));
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let n = buf.len().min(input.len());
            for (slot, byte) in buf.iter_mut().zip(input.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn send(&self, buf: &[u8]) -> io::Result<usize> {
            if self.is_closed() {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.writes.lock().push(buf.to_vec());
            Ok(buf.len())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }
}
