//! HTTP/1.1 upgrade handshake (RFC 6455 section 4)
//!
//! Server side reads the request head straight off the socket, validates
//! it and answers `101 Switching Protocols` (or `400 Bad Request`). Client
//! side writes the upgrade request by hand and checks the `101` answer.
//!
//! Both sides read the HTTP head through the same buffered reader that
//! later feeds the frame reader, so bytes the peer sent right after the
//! blank line are never lost.

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{AppError, HandshakeError};
use crate::session::{Session, TcpSession};
use crate::types::{Role, SessionId};

/// Fixed GUID appended to the client key (RFC 6455 section 1.3)
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of an HTTP head
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Upper bound on header lines in an HTTP head
const MAX_HEADER_LINES: usize = 100;

/// Compute `Sec-WebSocket-Accept` for a client key
///
/// ```
/// use ws_chat_server::handshake::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Random base64-encoded 16-byte `Sec-WebSocket-Key`
pub fn generate_key() -> String {
    let key: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Parsed HTTP request line and headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Build from the lines returned by [`read_head`]
    pub fn from_lines(lines: &[String]) -> Result<Self, HandshakeError> {
        let (request_line, header_lines) = lines
            .split_first()
            .ok_or_else(|| HandshakeError::MalformedRequest("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HandshakeError::MalformedRequest(format!(
                "bad request line: {request_line}"
            )));
        };
        if !version.starts_with("HTTP/1.") {
            return Err(HandshakeError::MalformedRequest(format!(
                "unsupported HTTP version: {version}"
            )));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: parse_headers(header_lines)?,
        })
    }

    /// Case-insensitive header lookup (first match)
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn parse_headers(lines: &[String]) -> Result<Vec<(String, String)>, HandshakeError> {
    lines
        .iter()
        .map(|line| {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                HandshakeError::MalformedRequest(format!("bad header line: {line}"))
            })?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Read an HTTP head (start line + headers) up to the blank line
///
/// Returns the lines without their CRLF terminators. Anything after the
/// blank line stays buffered in `reader`.
pub async fn read_head<R>(reader: &mut R) -> Result<Vec<String>, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut budget = MAX_HEAD_BYTES;

    loop {
        let mut line = String::new();
        let n = (&mut *reader)
            .take(budget as u64)
            .read_line(&mut line)
            .await?;
        budget -= n;

        if !line.ends_with('\n') {
            let reason = if budget == 0 {
                "header section too large"
            } else {
                "connection closed during handshake"
            };
            return Err(HandshakeError::MalformedRequest(reason.into()));
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if lines.is_empty() {
                return Err(HandshakeError::MalformedRequest("empty request".into()));
            }
            return Ok(lines);
        }

        if lines.len() > MAX_HEADER_LINES {
            return Err(HandshakeError::MalformedRequest("too many headers".into()));
        }
        lines.push(line.to_string());
    }
}

/// Validate an upgrade request and compute the accept token
pub fn negotiate(request: &RequestHead) -> Result<String, HandshakeError> {
    let upgrade = request
        .header("Upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = request.header("Connection").is_some_and(|v| {
        v.split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    });

    if request.method != "GET" || !upgrade || !connection {
        return Err(HandshakeError::NotAWebsocketRequest);
    }

    let key = request
        .header("Sec-WebSocket-Key")
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    if let Some(version) = request.header("Sec-WebSocket-Version") {
        if version != "13" {
            return Err(HandshakeError::UnsupportedVersion(version.to_string()));
        }
    }

    Ok(compute_accept_key(key))
}

/// `101 Switching Protocols` response head
pub fn switching_protocols_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Plain-text `400 Bad Request` response
pub fn bad_request_response(reason: &str) -> String {
    let body = format!("{reason}\n");
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Server side of the handshake
///
/// On success the `101` response has been flushed and the connection
/// belongs to the caller as a raw WebSocket stream. On a rejected request
/// a `400` is written before the error is returned.
pub async fn accept<R, W>(reader: &mut R, writer: &mut W) -> Result<RequestHead, HandshakeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let lines = read_head(reader).await?;
    let outcome = RequestHead::from_lines(&lines)
        .and_then(|head| negotiate(&head).map(|accept| (head, accept)));

    match outcome {
        Ok((head, accept)) => {
            writer
                .write_all(switching_protocols_response(&accept).as_bytes())
                .await?;
            writer.flush().await?;
            debug!("Upgraded request for {}", head.path);
            Ok(head)
        }
        Err(err) => {
            let _ = writer
                .write_all(bad_request_response(&err.to_string()).as_bytes())
                .await;
            let _ = writer.flush().await;
            Err(err)
        }
    }
}

/// Parsed `ws://host[:port][/path]` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl WsUrl {
    /// Parse a `ws://` URL; `wss://` is refused since TLS is not handled here
    pub fn parse(url: &str) -> Result<Self, HandshakeError> {
        let rest = url
            .strip_prefix("ws://")
            .ok_or_else(|| HandshakeError::InvalidUrl(format!("expected ws:// scheme: {url}")))?;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| HandshakeError::InvalidUrl(format!("invalid port: {port}")))?;
                (host, port)
            }
            None => (authority, 80),
        };

        if host.is_empty() {
            return Err(HandshakeError::InvalidUrl(format!("missing host: {url}")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `host:port` as sent in the Host header
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upgrade request head for `url` with the given key
pub fn client_request(url: &WsUrl, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        url.path,
        url.authority()
    )
}

/// Client side of the handshake over an already-connected stream
///
/// Sends the upgrade request, requires a `101` status line and consumes
/// the response headers through the blank line.
pub async fn connect<R, W>(
    reader: &mut R,
    writer: &mut W,
    url: &WsUrl,
) -> Result<(), HandshakeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let key = generate_key();
    writer.write_all(client_request(url, &key).as_bytes()).await?;
    writer.flush().await?;

    let lines = read_head(reader).await?;
    let (status, header_lines) = lines
        .split_first()
        .ok_or_else(|| HandshakeError::MalformedRequest("empty response".into()))?;
    if !status.contains("101") {
        return Err(HandshakeError::RejectedByServer(status.clone()));
    }

    let headers = parse_headers(header_lines)?;
    if let Some(accept) = find_header(&headers, "Sec-WebSocket-Accept") {
        if accept != compute_accept_key(&key) {
            return Err(HandshakeError::AcceptMismatch);
        }
    }

    Ok(())
}

/// Open a TCP connection to `url` and perform the client handshake
pub async fn dial(url: &str) -> Result<TcpSession, AppError> {
    let url = WsUrl::parse(url)?;
    let stream = TcpStream::connect((url.host.as_str(), url.port))
        .await
        .map_err(HandshakeError::from)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    connect(&mut reader, &mut write_half, &url).await?;
    debug!("Connected to {}{}", url.authority(), url.path);

    Ok(Session::new(SessionId::new(), Role::Client, reader, write_half))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::session::Received;
    use tokio::net::TcpListener;

    fn lines(raw: &str) -> Vec<String> {
        raw.split("\r\n")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn upgrade_request(extra: &str) -> RequestHead {
        let raw = format!("GET /ws HTTP/1.1\r\nHost: localhost\r\n{extra}");
        RequestHead::from_lines(&lines(&raw)).unwrap()
    }

    #[test]
    fn test_accept_key_rfc_fixture() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_generated_key_is_16_bytes() {
        let key = generate_key();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&key)
            .unwrap();
        assert_eq!(decoded.len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_negotiate_accepts_valid_request() {
        let head = upgrade_request(
            "Upgrade: WebSocket\r\nConnection: keep-alive, Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n",
        );
        assert_eq!(negotiate(&head).unwrap(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_negotiate_requires_upgrade_headers() {
        let head = upgrade_request("Sec-WebSocket-Key: abc\r\n");
        assert!(matches!(
            negotiate(&head),
            Err(HandshakeError::NotAWebsocketRequest)
        ));

        let head = upgrade_request(
            "Upgrade: h2c\r\nConnection: Upgrade\r\nSec-WebSocket-Key: abc\r\n",
        );
        assert!(matches!(
            negotiate(&head),
            Err(HandshakeError::NotAWebsocketRequest)
        ));
    }

    #[test]
    fn test_negotiate_requires_key() {
        let head = upgrade_request("Upgrade: websocket\r\nConnection: Upgrade\r\n");
        assert!(matches!(negotiate(&head), Err(HandshakeError::MissingKey)));

        let head = upgrade_request(
            "Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key:\r\n",
        );
        assert!(matches!(negotiate(&head), Err(HandshakeError::MissingKey)));
    }

    #[test]
    fn test_negotiate_rejects_other_versions() {
        let head = upgrade_request(
            "Upgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 8\r\n",
        );
        assert!(matches!(
            negotiate(&head),
            Err(HandshakeError::UnsupportedVersion(v)) if v == "8"
        ));
    }

    #[test]
    fn test_ws_url_parse() {
        let url = WsUrl::parse("ws://localhost:8082/ws").unwrap();
        assert_eq!(url.host, "localhost");
        assert_eq!(url.port, 8082);
        assert_eq!(url.path, "/ws");

        let url = WsUrl::parse("ws://example.com").unwrap();
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/");

        assert!(WsUrl::parse("wss://example.com").is_err());
        assert!(WsUrl::parse("ws://host:notaport/").is_err());
    }

    #[tokio::test]
    async fn test_accept_writes_101() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut server_read = BufReader::new(server_read);
        let (client_read, mut client_write) = tokio::io::split(client);

        client_write
            .write_all(
                b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .unwrap();

        let head = accept(&mut server_read, &mut server_write).await.unwrap();
        assert_eq!(head.path, "/ws");

        let response = read_head(&mut BufReader::new(client_read)).await.unwrap();
        assert_eq!(response[0], "HTTP/1.1 101 Switching Protocols");
        assert!(response
            .iter()
            .any(|line| line == "Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[tokio::test]
    async fn test_accept_rejects_with_400() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut server_read = BufReader::new(server_read);
        let (client_read, mut client_write) = tokio::io::split(client);

        client_write
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let err = accept(&mut server_read, &mut server_write).await.unwrap_err();
        assert!(matches!(err, HandshakeError::NotAWebsocketRequest));

        let response = read_head(&mut BufReader::new(client_read)).await.unwrap();
        assert_eq!(response[0], "HTTP/1.1 400 Bad Request");
    }

    #[tokio::test]
    async fn test_read_head_rejects_oversized_head() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD_BYTES));
        raw.extend_from_slice(b"\r\n\r\n");

        let mut reader = BufReader::new(&raw[..]);
        let err = read_head(&mut reader).await.unwrap_err();
        assert!(matches!(err, HandshakeError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_dial_keeps_bytes_after_headers() {
        // The server sends the 101 head and a first frame in one write; the
        // frame must survive header consumption on the client.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let lines = read_head(&mut reader).await.unwrap();
            let head = RequestHead::from_lines(&lines).unwrap();
            let accept = negotiate(&head).unwrap();

            let mut out = switching_protocols_response(&accept).into_bytes();
            out.extend(Frame::text("welcome").encode().unwrap());
            out.extend(Frame::text("second").encode().unwrap());
            write_half.write_all(&out).await.unwrap();
            write_half.flush().await.unwrap();
            // hold the socket open until the client is done
            let mut sink = Vec::new();
            let _ = reader.read_to_end(&mut sink).await;
        });

        let mut session = dial(&format!("ws://{addr}/ws")).await.unwrap();
        assert!(matches!(session.recv().await.unwrap(), Received::Text(t) if t == "welcome"));
        assert!(matches!(session.recv().await.unwrap(), Received::Text(t) if t == "second"));
        session.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_rejected_by_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let _ = read_head(&mut reader).await;
            let _ = write_half
                .write_all(bad_request_response("nope").as_bytes())
                .await;
        });

        let err = dial(&format!("ws://{addr}/ws")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Handshake(HandshakeError::RejectedByServer(status)) if status.contains("400")
        ));
    }
}
