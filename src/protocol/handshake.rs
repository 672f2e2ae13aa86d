//! HTTP/1.1 upgrade handshake (RFC 6455 Section 4).
//!
//! Both directions are covered: the client builds a [`HandshakeRequest`] and
//! checks the server's [`HandshakeResponse`]; the server parses the request,
//! validates it and answers with `101 Switching Protocols` or an HTTP error.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Headers that must not appear twice in an upgrade request.
const SINGLETON_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Parse header lines into a map keyed by lowercase name.
///
/// When `singletons` is given, a repeated header from that list is an error.
fn parse_headers<'a, I>(lines: I, singletons: Option<&[&str]>) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if singletons.is_some_and(|s| s.contains(&name.as_str())) && headers.contains_key(&name) {
            return Err(Error::InvalidHandshake(format!("Duplicate header: {name}")));
        }
        headers.insert(name, value.trim().to_string());
    }

    Ok(headers)
}

/// Look up a required header.
fn required<'h>(headers: &'h HashMap<String, String>, name: &str, display: &str) -> Result<&'h str> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidHandshake(format!("Missing {display} header")))
}

/// Check the `Upgrade: websocket` and `Connection: ... upgrade ...` pair.
fn check_upgrade_headers(headers: &HashMap<String, String>) -> Result<()> {
    let upgrade = required(headers, "upgrade", "Upgrade")?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Upgrade header: {upgrade}"
        )));
    }
    let connection = required(headers, "connection", "Connection")?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Connection header: {connection}"
        )));
    }
    Ok(())
}

/// Position just past the blank line ending an HTTP head, if present.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Compute the Sec-WebSocket-Accept value: Base64(SHA-1(key + GUID)).
///
/// ```
/// use wskit::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh Sec-WebSocket-Key: 16 random bytes, Base64 encoded.
///
/// # Errors
///
/// Returns `Error::Io` if the OS random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(e.to_string()))?;
    Ok(BASE64.encode(nonce))
}

/// WebSocket upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, e.g. `/ws`.
    pub path: String,
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Sec-WebSocket-Version; only 13 is accepted.
    pub version: u8,
}

impl HandshakeRequest {
    /// Build a client request with a fresh key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if no key could be generated.
    pub fn client(host: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            host: host.into(),
            key: generate_key()?,
            version: 13,
        })
    }

    /// Serialize the request head.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(
            format!(
                "GET {} HTTP/1.1\r\n\
                 Host: {}\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Key: {}\r\n\
                 Sec-WebSocket-Version: {}\r\n\
                 \r\n",
                self.path, self.host, self.key, self.version
            )
            .as_bytes(),
        );
    }

    /// Parse an upgrade request head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - the data is not UTF-8 or the request line is malformed
    /// - the method is not `GET` or the version is not `HTTP/1.1`
    /// - a required header is missing or a singleton header is repeated
    /// - `Upgrade`/`Connection` do not ask for a WebSocket upgrade
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, target, version] = parts[..] else {
            return Err(Error::InvalidHandshake("Invalid request line".into()));
        };
        if method != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {method}"
            )));
        }
        if !version.starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {version}"
            )));
        }

        let headers = parse_headers(lines, Some(&SINGLETON_HEADERS))?;
        check_upgrade_headers(&headers)?;

        let host = required(&headers, "host", "Host")?.to_string();
        let key = required(&headers, "sec-websocket-key", "Sec-WebSocket-Key")?.to_string();
        let version_str = required(&headers, "sec-websocket-version", "Sec-WebSocket-Version")?;
        let version = version_str
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {version_str}")))?;

        Ok(Self {
            path: target.to_string(),
            host,
            key,
            version,
        })
    }

    /// Validate version, key shape and host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the version is not 13, the key
    /// does not decode to 16 bytes, or the host is empty.
    pub fn validate(&self) -> Result<()> {
        if self.version != 13 {
            return Err(Error::InvalidHandshake(format!(
                "Unsupported WebSocket version: {} (expected 13)",
                self.version
            )));
        }
        match BASE64.decode(&self.key) {
            Ok(decoded) if decoded.len() == 16 => {}
            Ok(decoded) => {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Key must be 16 bytes, got {}",
                    decoded.len()
                )));
            }
            Err(_) => {
                return Err(Error::InvalidHandshake(
                    "Invalid Sec-WebSocket-Key: not valid Base64".into(),
                ));
            }
        }
        if self.host.is_empty() {
            return Err(Error::InvalidHandshake("Host header cannot be empty".into()));
        }
        Ok(())
    }
}

/// Server answer to an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
}

impl HandshakeResponse {
    #[must_use]
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
        }
    }

    /// Serialize the `101 Switching Protocols` head.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n\r\n", self.accept).as_bytes());
    }

    /// Serialize a plain HTTP rejection such as `404 Not Found`.
    pub fn write_rejection(status: &str, buf: &mut Vec<u8>) {
        buf.extend_from_slice(
            format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        );
    }

    /// Parse a server response head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the status is not 101 or the
    /// upgrade headers or `Sec-WebSocket-Accept` are missing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        if !status_line.starts_with("HTTP/1.1 101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines, None)?;
        check_upgrade_headers(&headers)?;
        let accept = required(&headers, "sec-websocket-accept", "Sec-WebSocket-Accept")?;

        Ok(Self {
            accept: accept.to_string(),
        })
    }

    /// Check that the server answered the key the client sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] on mismatch.
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.accept == compute_accept_key(key) {
            Ok(())
        } else {
            Err(Error::InvalidHandshake("Sec-WebSocket-Accept mismatch".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn request(extra: &str) -> Vec<u8> {
        format!(
            "GET /ws HTTP/1.1\r\n\
             Host: localhost:13785\r\n\
             Upgrade: websocket\r\n\
             Connection: keep-alive, Upgrade\r\n\
             Sec-WebSocket-Key: {RFC_KEY}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             {extra}\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn test_compute_accept_key_rfc_example() {
        assert_eq!(compute_accept_key(RFC_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_generated_key_is_valid() {
        let req = HandshakeRequest::client("example.com", "/ws").unwrap();
        assert!(req.validate().is_ok());
        let other = HandshakeRequest::client("example.com", "/ws").unwrap();
        assert_ne!(req.key, other.key);
    }

    #[test]
    fn test_parse_valid_request() {
        let req = HandshakeRequest::parse(&request("")).unwrap();
        assert_eq!(req.path, "/ws");
        assert_eq!(req.host, "localhost:13785");
        assert_eq!(req.key, RFC_KEY);
        assert_eq!(req.version, 13);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_client_request_parses_back() {
        let req = HandshakeRequest::client("example.com:80", "/chat").unwrap();
        let mut buf = Vec::new();
        req.write(&mut buf);
        assert_eq!(find_head_end(&buf), Some(buf.len()));
        assert_eq!(HandshakeRequest::parse(&buf).unwrap(), req);
    }

    #[test]
    fn test_case_insensitive_headers() {
        let raw = b"GET /ws HTTP/1.1\r\nHOST: h\r\nupgrade: WebSocket\r\nconnection: upgrade\r\n\
            sec-websocket-key: dGhlIHNhbXBsZSBub25jZQ==\r\nSEC-WEBSOCKET-VERSION: 13\r\n\r\n";
        assert!(HandshakeRequest::parse(raw).is_ok());
    }

    #[test]
    fn test_parse_request_errors() {
        let missing_key = b"GET /ws HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\n\
            Connection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(
            HandshakeRequest::parse(missing_key),
            Err(Error::InvalidHandshake(msg)) if msg.contains("Sec-WebSocket-Key")
        ));

        let post = b"POST /ws HTTP/1.1\r\n\r\n";
        assert!(matches!(
            HandshakeRequest::parse(post),
            Err(Error::InvalidHandshake(msg)) if msg.contains("GET")
        ));

        assert!(matches!(
            HandshakeRequest::parse(&request("Host: evil\r\n")),
            Err(Error::InvalidHandshake(msg)) if msg.contains("Duplicate")
        ));

        assert!(HandshakeRequest::parse(b"GET /ws\r\n\r\n").is_err());
    }

    #[test]
    fn test_validate_request() {
        let valid = HandshakeRequest::parse(&request("")).unwrap();
        let short_key = HandshakeRequest {
            key: "c2hvcnQ=".into(),
            ..valid.clone()
        };
        assert!(short_key.validate().is_err());
        let old_version = HandshakeRequest {
            version: 8,
            ..valid.clone()
        };
        assert!(matches!(
            old_version.validate(),
            Err(Error::InvalidHandshake(msg)) if msg.contains("version")
        ));
    }

    #[test]
    fn test_response_roundtrip_and_verify() {
        let req = HandshakeRequest::parse(&request("")).unwrap();
        let mut buf = Vec::new();
        HandshakeResponse::from_request(&req).write(&mut buf);

        let resp = HandshakeResponse::parse(&buf).unwrap();
        assert_eq!(resp.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(resp.verify(RFC_KEY).is_ok());
        assert!(resp.verify("AAAAAAAAAAAAAAAAAAAAAA==").is_err());
    }

    #[test]
    fn test_rejection_is_not_an_upgrade() {
        let mut buf = Vec::new();
        HandshakeResponse::write_rejection("404 Not Found", &mut buf);
        assert!(buf.starts_with(b"HTTP/1.1 404 Not Found\r\n"));
        assert!(matches!(
            HandshakeResponse::parse(&buf),
            Err(Error::InvalidHandshake(msg)) if msg.contains("404")
        ));
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\n\x81\x00"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }
}
