//! HTTP/1.1 handshake parsing and serialization over a [`Socket`].
//!
//! Only the small subset of HTTP needed for the WebSocket upgrade is handled: a request or
//! status line, a header block terminated by an empty line and, for plain responses, a body sized
//! by `Content-Length`. Every read goes through [`Socket::read_line`] and is therefore bounded by
//! a [`CancellationRequest`].
use std::{
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::{
    cancel::{make_cancellation_request_with_timeout, CancellationRequest},
    socket::Socket,
    Result, WebSocketError,
};

/// Maximum number of header lines accepted in one header block.
pub const MAX_HEADERS: usize = 128;

/// A parsed HTTP request.
///
/// Only [`parse_request`] creates requests, once the request line and every header line have
/// been read successfully.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    uri: String,
    method: String,
    http_version: String,
    headers: HeaderMap,
}

impl HttpRequest {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn http_version(&self) -> &str {
        &self.http_version
    }

    /// Header names are case-insensitive; a repeated header keeps its last value.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// An HTTP response, either written by a server with [`send_response`] or read by a client with
/// [`read_response`].
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    status_code: u16,
    description: String,
    headers: HeaderMap,
    payload: Bytes,
}

impl HttpResponse {
    pub fn new(
        status_code: u16,
        description: impl Into<String>,
        headers: HeaderMap,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            status_code,
            description: description.into(),
            headers,
            payload: payload.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Removes every space, `\r` and `\n` from `text`, wherever they appear.
///
/// ```
/// assert_eq!(tether::parser::trim(" G E T \r\n"), "GET");
/// ```
pub fn trim(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, ' ' | '\r' | '\n'))
        .collect()
}

/// Splits a request line into `(method, request_uri, http_version)`.
///
/// Tokens are separated by single spaces and [`trim`]med. Missing tokens are empty and tokens
/// past the third are ignored. Nothing is validated.
///
/// ```
/// use tether::parser::parse_request_line;
///
/// let (method, uri, version) = parse_request_line("GET /chat HTTP/1.1\r\n");
/// assert_eq!((method.as_str(), uri.as_str(), version.as_str()), ("GET", "/chat", "HTTP/1.1"));
/// ```
pub fn parse_request_line(line: &str) -> (String, String, String) {
    let mut tokens = line.split(' ').map(trim);
    let mut next = || tokens.next().unwrap_or_default();

    let method = next();
    let request_uri = next();
    let http_version = next();

    (method, request_uri, http_version)
}

/// Parses `HTTP/1.1 101 Switching Protocols` into `(version, status, description)`.
pub fn parse_status_line(line: &str) -> Result<(String, u16, String)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(WebSocketError::HttpParse(format!(
            "Invalid HTTP status line: {line:?}"
        )));
    }

    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| WebSocketError::HttpParse(format!("Invalid HTTP status code: {line:?}")))?;
    let description = parts.next().unwrap_or_default();

    Ok((version.to_string(), status, description.to_string()))
}

/// Reads header lines until an empty line.
///
/// Each line must be `name: value`; the value loses its surrounding whitespace. A line without a
/// colon, a name or value that is not valid in HTTP, or more than [`MAX_HEADERS`] lines fail the
/// whole block.
pub fn parse_http_headers(
    socket: &dyn Socket,
    cancel: &dyn CancellationRequest,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    for _ in 0..=MAX_HEADERS {
        let line = socket.read_line(cancel)?;
        if line == "\r\n" || line == "\n" {
            return Ok(headers);
        }

        let line = line.trim_end_matches(['\r', '\n']);
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WebSocketError::HttpParse(format!("Malformed header line: {line:?}")))?;

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| WebSocketError::HttpParse(format!("Invalid header name: {name:?}")))?;
        let value = HeaderValue::from_bytes(value.trim().as_bytes())
            .map_err(|_| WebSocketError::HttpParse(format!("Invalid value for header {name}")))?;

        headers.insert(name, value);
    }

    Err(WebSocketError::HttpParse(format!(
        "More than {MAX_HEADERS} header lines"
    )))
}

/// Reads a request line and its headers.
///
/// The whole exchange must complete within `timeout`; raising `stop` aborts it early.
pub fn parse_request(
    socket: &dyn Socket,
    timeout: Duration,
    stop: &Arc<AtomicBool>,
) -> Result<HttpRequest> {
    let cancel = make_cancellation_request_with_timeout(timeout, stop);

    let line = socket.read_line(&cancel).map_err(|err| {
        WebSocketError::HttpParse(format!("Error reading HTTP request line: {err}"))
    })?;
    let (method, uri, http_version) = parse_request_line(&line);

    let headers = parse_http_headers(socket, &cancel)
        .map_err(|err| WebSocketError::HttpParse(format!("Error parsing HTTP headers: {err}")))?;

    Ok(HttpRequest {
        uri,
        method,
        http_version,
        headers,
    })
}

/// Reads a status line and its headers. The body, if any, is left on the socket.
pub fn read_response(
    socket: &dyn Socket,
    cancel: &dyn CancellationRequest,
) -> Result<HttpResponse> {
    let line = socket.read_line(cancel)?;
    let (_, status_code, description) = parse_status_line(&line)?;
    let headers = parse_http_headers(socket, cancel)?;

    Ok(HttpResponse {
        status_code,
        description,
        headers,
        payload: Bytes::new(),
    })
}

/// Writes `response` as a status line, a `Content-Length` header computed from the payload and
/// the payload itself, stopping at the first failed write or once `cancel` fires.
pub fn send_response(
    response: &HttpResponse,
    socket: &dyn Socket,
    cancel: &dyn CancellationRequest,
) -> Result<()> {
    let status = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status_code, response.description
    );
    socket.write_bytes(status.as_bytes(), cancel)?;

    let headers = format!("Content-Length: {}\r\n\r\n", response.payload.len());
    socket.write_bytes(headers.as_bytes(), cancel)?;

    socket.write_bytes(&response.payload, cancel)
}

#[cfg(test)]
mod tests {
    use std::{io, sync::atomic::Ordering};

    use super::*;
    use crate::{cancel::Never, socket::mock::MockSocket};

    #[test]
    fn test_trim_removes_everywhere() {
        assert_eq!(trim(" G E T \r\n"), "GET");
        assert_eq!(trim("a\rb\nc d"), "abcd");
        assert_eq!(trim(""), "");
        assert_eq!(trim("\tx"), "\tx");
    }

    #[test]
    fn test_parse_request_line() {
        let parsed = parse_request_line("GET /chat HTTP/1.1\r\n");
        assert_eq!(
            parsed,
            ("GET".to_string(), "/chat".to_string(), "HTTP/1.1".to_string())
        );

        let parsed = parse_request_line("GET /chat HTTP/1.1 extra tokens\r\n");
        assert_eq!(parsed.2, "HTTP/1.1");

        let parsed = parse_request_line("GET\r\n");
        assert_eq!(parsed, ("GET".to_string(), String::new(), String::new()));

        let parsed = parse_request_line("");
        assert_eq!(parsed, (String::new(), String::new(), String::new()));
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, description) =
            parse_status_line("HTTP/1.1 101 Switching Protocols\r\n").unwrap();
        assert_eq!(version, "HTTP/1.1");
        assert_eq!(status, 101);
        assert_eq!(description, "Switching Protocols");

        assert!(parse_status_line("HTTP/1.1 abc\r\n").is_err());
        assert!(parse_status_line("garbage\r\n").is_err());
    }

    #[test]
    fn test_parse_request() {
        let socket = MockSocket::new(
            "GET /chat?room=1 HTTP/1.1\r\nHost: example.com\r\nupgrade:  websocket \r\nX-Dup: a\r\nx-dup: b\r\n\r\nleftover",
        );
        let stop = Arc::new(AtomicBool::new(false));

        let request = parse_request(&socket, Duration::from_secs(5), &stop).unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.uri(), "/chat?room=1");
        assert_eq!(request.http_version(), "HTTP/1.1");
        assert_eq!(request.headers().get("Upgrade").unwrap(), "websocket");
        assert_eq!(request.headers().get("x-dup").unwrap(), "b");

        // bytes after the header block stay on the socket
        let mut rest = [0u8; 8];
        assert_eq!(socket.recv(&mut rest).unwrap(), 8);
        assert_eq!(&rest, b"leftover");
    }

    #[test]
    fn test_parse_request_cancelled() {
        let socket = MockSocket::new("GET /chat HTTP/1.1\r\n\r\n");
        let stop = Arc::new(AtomicBool::new(true));

        let err = parse_request(&socket, Duration::from_secs(5), &stop).unwrap_err();
        assert!(err.to_string().starts_with("Error reading HTTP request line"));

        stop.store(false, Ordering::Release);
    }

    #[test]
    fn test_parse_request_times_out_on_incomplete_line() {
        let socket = MockSocket::new("GET /chat HT");
        let stop = Arc::new(AtomicBool::new(false));

        let res = parse_request(&socket, Duration::from_millis(50), &stop);
        assert!(res.is_err());
    }

    #[test]
    fn test_parse_request_bad_headers() {
        let socket = MockSocket::new("GET / HTTP/1.1\r\nno colon here\r\n\r\n");
        let stop = Arc::new(AtomicBool::new(false));

        let err = parse_request(&socket, Duration::from_secs(5), &stop).unwrap_err();
        assert!(err.to_string().starts_with("Error parsing HTTP headers"));
    }

    #[test]
    fn test_non_ascii_header_value() {
        let socket = MockSocket::new("User-Agent: café/1.0 (ünïcode)\r\nHost: x\r\n\r\n");
        let headers = parse_http_headers(&socket, &Never).unwrap();

        assert_eq!(
            headers.get("user-agent").unwrap().as_bytes(),
            "café/1.0 (ünïcode)".as_bytes()
        );
        assert_eq!(headers.get("host").unwrap(), "x");
    }

    #[test]
    fn test_too_many_headers() {
        let mut input = String::new();
        for i in 0..=MAX_HEADERS {
            input.push_str(&format!("h{i}: v\r\n"));
        }
        input.push_str("\r\n");

        let socket = MockSocket::new(input);
        assert!(parse_http_headers(&socket, &Never).is_err());
    }

    #[test]
    fn test_send_response() {
        let socket = MockSocket::new("");
        let response = HttpResponse::new(200, "OK", HeaderMap::new(), "hi");
        send_response(&response, &socket, &Never).unwrap();

        assert_eq!(
            socket.written(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi".to_vec()
        );
        assert_eq!(socket.writes().len(), 3);
    }

    #[test]
    fn test_send_response_empty_payload() {
        let socket = MockSocket::new("");
        let response = HttpResponse::new(404, "Not Found", HeaderMap::new(), Bytes::new());
        send_response(&response, &socket, &Never).unwrap();

        assert_eq!(
            socket.written(),
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn test_send_response_stops_on_failure() {
        let socket = MockSocket::new("");
        socket.close();

        let response = HttpResponse::new(200, "OK", HeaderMap::new(), "hi");
        assert!(send_response(&response, &socket, &Never).is_err());
        assert!(socket.writes().is_empty());
    }

    /// Accepts no bytes, like a peer that stopped reading.
    struct StalledWriter;

    impl Socket for StalledWriter {
        fn recv(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }

        fn send(&self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::TimedOut.into())
        }

        fn close(&self) {}
    }

    #[test]
    fn test_send_response_gives_up_when_cancelled() {
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = make_cancellation_request_with_timeout(Duration::from_millis(30), &stop);
        let response = HttpResponse::new(400, "Bad Request", HeaderMap::new(), "no");

        assert!(matches!(
            send_response(&response, &StalledWriter, &cancel),
            Err(WebSocketError::Cancelled)
        ));
    }

    #[test]
    fn test_read_response() {
        let socket = MockSocket::new(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        );
        let response = read_response(&socket, &Never).unwrap();
        assert_eq!(response.status_code(), 101);
        assert_eq!(response.description(), "Switching Protocols");
        assert_eq!(response.headers().len(), 2);
    }
}
