//! The HTTP upgrade exchange of RFC 6455 Section 4, for both roles.
use std::{
    fmt::Write as _,
    str::FromStr,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use http::{header, HeaderMap};
use sha1::{Digest, Sha1};
use url::Url;

use crate::{
    cancel::CancellationRequest,
    compression::WebSocketExtensions,
    parser::{self, HttpResponse},
    socket::Socket,
    DeflateOptions, Result, WebSocketError,
};

/// Outcome of a successful upgrade.
#[derive(Debug)]
pub(crate) struct Handshake {
    /// URL (client) or request target (server) of the connection.
    pub(crate) uri: String,
    /// Response headers on a client, request headers on a server.
    pub(crate) headers: HeaderMap,
    /// Negotiated permessage-deflate parameters.
    pub(crate) extensions: Option<WebSocketExtensions>,
}

/// Computes `Sec-WebSocket-Accept` for a `Sec-WebSocket-Key`.
pub(crate) fn sec_websocket_accept(key: &[u8]) -> String {
    use base64::prelude::*;
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11"); // magic string
    BASE64_STANDARD.encode(sha1.finalize())
}

fn generate_key() -> String {
    use base64::prelude::*;
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Whether a comma separated header value contains `token`, ignoring case.
fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
        .unwrap_or(false)
}

// ================== client ====================

/// Sends the upgrade request for `url` and verifies the server's answer.
pub(crate) fn client(
    socket: &dyn Socket,
    url: &Url,
    deflate: Option<&DeflateOptions>,
    extra_headers: &HeaderMap,
    cancel: &dyn CancellationRequest,
) -> Result<Handshake> {
    client_with_key(socket, url, deflate, extra_headers, &generate_key(), cancel)
}

fn client_with_key(
    socket: &dyn Socket,
    url: &Url,
    deflate: Option<&DeflateOptions>,
    extra_headers: &HeaderMap,
    key: &str,
    cancel: &dyn CancellationRequest,
) -> Result<Handshake> {
    let request = build_request(url, deflate, extra_headers, key)?;
    socket.write_bytes(request.as_bytes(), cancel)?;

    let response = parser::read_response(socket, cancel)?;
    let extensions = verify(&response, key)?;

    // an answer to an offer we never made is ignored
    let extensions = deflate.and(extensions);

    Ok(Handshake {
        uri: url.to_string(),
        headers: response.headers().clone(),
        extensions,
    })
}

fn build_request(
    url: &Url,
    deflate: Option<&DeflateOptions>,
    extra_headers: &HeaderMap,
    key: &str,
) -> Result<String> {
    let host = url.host_str().ok_or(WebSocketError::MissingHost)?;
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut request = String::with_capacity(256);
    // writing into a String cannot fail
    let _ = write!(request, "GET {target} HTTP/1.1\r\n");
    match url.port() {
        Some(port) => {
            let _ = write!(request, "Host: {host}:{port}\r\n");
        }
        None => {
            let _ = write!(request, "Host: {host}\r\n");
        }
    }
    request.push_str("Upgrade: websocket\r\n");
    request.push_str("Connection: Upgrade\r\n");
    let _ = write!(request, "Sec-WebSocket-Key: {key}\r\n");
    request.push_str("Sec-WebSocket-Version: 13\r\n");

    if let Some(deflate) = deflate {
        let offer = WebSocketExtensions::from(deflate);
        let _ = write!(request, "Sec-WebSocket-Extensions: {offer}\r\n");
    }

    for (name, value) in extra_headers {
        let value = value.to_str().map_err(|_| {
            WebSocketError::InvalidRequest(format!("header {name} is not visible ASCII"))
        })?;
        let _ = write!(request, "{name}: {value}\r\n");
    }
    request.push_str("\r\n");

    Ok(request)
}

/// Checks a handshake response and returns the extensions the server accepted.
fn verify(response: &HttpResponse, key: &str) -> Result<Option<WebSocketExtensions>> {
    if response.status_code() != 101 {
        return Err(WebSocketError::InvalidStatusCode(response.status_code()));
    }

    let headers = response.headers();

    if !header_has_token(headers, header::UPGRADE, "websocket") {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    if !header_has_token(headers, header::CONNECTION, "upgrade") {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    let expected = sec_websocket_accept(key.as_bytes());
    if headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .map(|h| h.as_bytes())
        != Some(expected.as_bytes())
    {
        return Err(WebSocketError::InvalidAcceptKey);
    }

    Ok(headers
        .get(header::SEC_WEBSOCKET_EXTENSIONS)
        .and_then(|h| h.to_str().ok())
        .map(WebSocketExtensions::from_str)
        .and_then(std::result::Result::ok))
}

// ================== server ====================

/// Reads an upgrade request and answers it.
///
/// Invalid requests are answered with `400 Bad Request`, or `426 Upgrade Required` for an
/// unsupported protocol version, whose body is the reason; the error is returned as well.
pub(crate) fn server(
    socket: &dyn Socket,
    timeout: Duration,
    stop: &Arc<AtomicBool>,
    deflate: Option<&DeflateOptions>,
    cancel: &dyn CancellationRequest,
) -> Result<Handshake> {
    let request = parser::parse_request(socket, timeout, stop)?;
    let headers = request.headers();

    if request.method() != "GET" {
        let err = WebSocketError::InvalidRequest(format!(
            "Invalid HTTP method, need GET, got {}",
            request.method()
        ));
        return reject(socket, 400, "Bad Request", err, cancel);
    }

    if request.http_version() != "HTTP/1.1" {
        let err = WebSocketError::InvalidRequest(format!(
            "Invalid HTTP version, need HTTP/1.1, got: {}",
            request.http_version()
        ));
        return reject(socket, 400, "Bad Request", err, cancel);
    }

    if !header_has_token(headers, header::UPGRADE, "websocket") {
        return reject(
            socket,
            400,
            "Bad Request",
            WebSocketError::InvalidUpgradeHeader,
            cancel,
        );
    }

    let Some(key) = headers.get(header::SEC_WEBSOCKET_KEY) else {
        return reject(
            socket,
            400,
            "Bad Request",
            WebSocketError::MissingSecWebSocketKey,
            cancel,
        );
    };

    if headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes())
        != Some(b"13")
    {
        return reject(
            socket,
            426,
            "Upgrade Required",
            WebSocketError::InvalidSecWebsocketVersion,
            cancel,
        );
    }

    let extensions = match deflate {
        Some(local) => headers
            .get(header::SEC_WEBSOCKET_EXTENSIONS)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| WebSocketExtensions::from_str(h).ok())
            .map(|offered| WebSocketExtensions::merge(&offered, local)),
        None => None,
    };

    let mut response = String::with_capacity(192);
    response.push_str("HTTP/1.1 101 Switching Protocols\r\n");
    response.push_str("Upgrade: websocket\r\n");
    response.push_str("Connection: Upgrade\r\n");
    let _ = write!(
        response,
        "Sec-WebSocket-Accept: {}\r\n",
        sec_websocket_accept(key.as_bytes())
    );
    if let Some(extensions) = &extensions {
        let _ = write!(response, "Sec-WebSocket-Extensions: {extensions}\r\n");
    }
    response.push_str("\r\n");

    socket.write_bytes(response.as_bytes(), cancel)?;

    Ok(Handshake {
        uri: request.uri().to_string(),
        headers: headers.clone(),
        extensions,
    })
}

fn reject(
    socket: &dyn Socket,
    status_code: u16,
    description: &str,
    err: WebSocketError,
    cancel: &dyn CancellationRequest,
) -> Result<Handshake> {
    log::warn!("rejecting upgrade request: {err}");

    let response = HttpResponse::new(status_code, description, HeaderMap::new(), err.to_string());
    if let Err(write_err) = parser::send_response(&response, socket, cancel) {
        log::debug!("unable to send {status_code} response: {write_err}");
    }

    Err(err)
}

#[cfg(test)]
mod tests {
    use std::{io, thread, time::Instant};

    use super::*;
    use crate::{
        cancel::{Never, StopFlag},
        socket::mock::MockSocket,
    };

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    #[test]
    fn test_accept_key_rfc_vector() {
        assert_eq!(sec_websocket_accept(KEY.as_bytes()), ACCEPT);
    }

    #[test]
    fn test_generated_keys_are_16_bytes() {
        use base64::prelude::*;
        let key = generate_key();
        assert_eq!(BASE64_STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_build_request() {
        let url = Url::parse("ws://example.com:8080/chat?room=1").unwrap();
        let mut extra = HeaderMap::new();
        extra.insert(header::AUTHORIZATION, "Bearer x".parse().unwrap());

        let request = build_request(&url, None, &extra, KEY).unwrap();
        assert!(request.starts_with("GET /chat?room=1 HTTP/1.1\r\nHost: example.com:8080\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(request.contains("authorization: Bearer x\r\n"));
        assert!(!request.contains("Sec-WebSocket-Extensions"));
        assert!(request.ends_with("\r\n\r\n"));

        let url = Url::parse("wss://example.com/").unwrap();
        let request =
            build_request(&url, Some(&DeflateOptions::default()), &HeaderMap::new(), KEY).unwrap();
        assert!(request.contains("Host: example.com\r\n"));
        assert!(request.contains("Sec-WebSocket-Extensions: permessage-deflate\r\n"));
    }

    #[test]
    fn test_client_accepts_valid_response() {
        let socket = MockSocket::new(format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: WebSocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Accept: {ACCEPT}\r\nSec-WebSocket-Extensions: permessage-deflate; server_no_context_takeover\r\n\r\n"
        ));
        let url = Url::parse("ws://localhost/").unwrap();

        let handshake = client_with_key(
            &socket,
            &url,
            Some(&DeflateOptions::default()),
            &HeaderMap::new(),
            KEY,
            &Never,
        )
        .unwrap();

        assert_eq!(handshake.uri, "ws://localhost/");
        assert!(handshake.extensions.unwrap().server_no_context_takeover);
        assert!(socket.written().starts_with(b"GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn test_client_ignores_unrequested_extensions() {
        let socket = MockSocket::new(format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {ACCEPT}\r\nSec-WebSocket-Extensions: permessage-deflate\r\n\r\n"
        ));
        let url = Url::parse("ws://localhost/").unwrap();

        let handshake =
            client_with_key(&socket, &url, None, &HeaderMap::new(), KEY, &Never).unwrap();
        assert!(handshake.extensions.is_none());
    }

    #[test]
    fn test_client_rejections() {
        let url = Url::parse("ws://localhost/").unwrap();
        let run = |response: String| {
            let socket = MockSocket::new(response);
            client_with_key(&socket, &url, None, &HeaderMap::new(), KEY, &Never)
        };

        assert!(matches!(
            run("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".into()),
            Err(WebSocketError::InvalidStatusCode(404))
        ));
        assert!(matches!(
            run(format!("HTTP/1.1 101 OK\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {ACCEPT}\r\n\r\n")),
            Err(WebSocketError::InvalidUpgradeHeader)
        ));
        assert!(matches!(
            run(format!("HTTP/1.1 101 OK\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {ACCEPT}\r\n\r\n")),
            Err(WebSocketError::InvalidConnectionHeader)
        ));
        assert!(matches!(
            run("HTTP/1.1 101 OK\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: bogus\r\n\r\n".into()),
            Err(WebSocketError::InvalidAcceptKey)
        ));
    }

    fn server_over(request: &str, deflate: Option<&DeflateOptions>) -> (MockSocket, Result<Handshake>) {
        let socket = MockSocket::new(request);
        let stop = Arc::new(AtomicBool::new(false));
        let res = server(&socket, Duration::from_secs(5), &stop, deflate, &Never);
        (socket, res)
    }

    #[test]
    fn test_server_accepts_upgrade() {
        let (socket, res) = server_over(
            &format!("GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Extensions: permessage-deflate; client_no_context_takeover\r\n\r\n"),
            Some(&DeflateOptions::default()),
        );

        let handshake = res.unwrap();
        assert_eq!(handshake.uri, "/chat");
        assert!(handshake.extensions.as_ref().unwrap().client_no_context_takeover);

        let written = String::from_utf8(socket.written()).unwrap();
        assert!(written.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(written.contains(&format!("Sec-WebSocket-Accept: {ACCEPT}\r\n")));
        assert!(written.contains(
            "Sec-WebSocket-Extensions: permessage-deflate; client_no_context_takeover\r\n"
        ));
        assert_eq!(socket.writes().len(), 1);
    }

    #[test]
    fn test_server_without_deflate_ignores_offer() {
        let (socket, res) = server_over(
            &format!("GET / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Extensions: permessage-deflate\r\n\r\n"),
            None,
        );
        assert!(res.unwrap().extensions.is_none());
        assert!(!String::from_utf8(socket.written())
            .unwrap()
            .contains("Sec-WebSocket-Extensions"));
    }

    #[test]
    fn test_server_rejects_bad_requests() {
        let (socket, res) = server_over(
            &format!("POST / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"),
            None,
        );
        assert!(matches!(res, Err(WebSocketError::InvalidRequest(_))));
        assert!(socket.written().starts_with(b"HTTP/1.1 400 Bad Request\r\n"));

        let (socket, res) = server_over(
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\n\r\n",
            None,
        );
        assert!(matches!(res, Err(WebSocketError::MissingSecWebSocketKey)));
        assert!(socket.written().starts_with(b"HTTP/1.1 400 Bad Request\r\n"));

        let (socket, res) = server_over(
            &format!("GET / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 8\r\n\r\n"),
            None,
        );
        assert!(matches!(res, Err(WebSocketError::InvalidSecWebsocketVersion)));
        let written = String::from_utf8(socket.written()).unwrap();
        assert!(written.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(written.ends_with("Sec-Websocket-Version must be 13"));

        let (socket, res) = server_over("GET / HTTP/1.1\r\nHost: x\r\n\r\n", None);
        assert!(matches!(res, Err(WebSocketError::InvalidUpgradeHeader)));
        assert!(socket.written().starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }

    /// Serves reads from a script but never accepts a written byte.
    struct StalledWrites(MockSocket);

    impl Socket for StalledWrites {
        fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.recv(buf)
        }

        fn send(&self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::TimedOut.into())
        }

        fn close(&self) {}
    }

    #[test]
    fn test_rejection_write_observes_stop() {
        let socket = StalledWrites(MockSocket::new(format!(
            "POST / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        )));
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = StopFlag(Arc::clone(&stop));

        let signal = Arc::clone(&stop);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            signal.store(true, std::sync::atomic::Ordering::Release);
        });

        let started = Instant::now();
        let res = server(&socket, Duration::from_secs(30), &stop, None, &cancel);
        assert!(matches!(res, Err(WebSocketError::InvalidRequest(_))));
        assert!(started.elapsed() < Duration::from_secs(5));

        stopper.join().unwrap();
    }
}
