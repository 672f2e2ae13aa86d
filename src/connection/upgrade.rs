//! Opening connections: client dial and server accept over TCP.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;
use url::Url;

use crate::config::{Config, Limits};
use crate::connection::{ConnectionReader, ConnectionWriter, Role};
use crate::error::{Error, Result};
use crate::protocol::handshake::find_head_end;
use crate::protocol::{HandshakeRequest, HandshakeResponse};

/// Receiving half of a TCP-backed connection.
pub type TcpReader = ConnectionReader<OwnedReadHalf>;
/// Sending half of a TCP-backed connection.
pub type TcpWriter = ConnectionWriter<OwnedWriteHalf>;

/// Where a `ws://` URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// `host:port` to connect to.
    pub addr: String,
    /// Value of the `Host` header.
    pub host: String,
    /// Request target including any query.
    pub path: String,
}

impl Target {
    /// Parse a `ws://` URL.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` for unparsable URLs, schemes other than
    /// `ws` and URLs without a host.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        if parsed.scheme() != "ws" {
            return Err(Error::InvalidUrl(format!(
                "{url}: unsupported scheme {:?}",
                parsed.scheme()
            )));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{url}: missing host")))?;
        let port = parsed.port_or_known_default().unwrap_or(80);

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            addr: format!("{host}:{port}"),
            host: match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            },
            path,
        })
    }
}

/// Read an HTTP head; returns the head and whatever followed it.
async fn read_head<S>(stream: &mut S, limits: &Limits) -> Result<(Vec<u8>, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = find_head_end(&buf) {
            let rest = buf.split_off(end);
            limits.check_handshake_size(buf.len())?;
            return Ok((buf, rest));
        }
        limits.check_handshake_size(buf.len())?;

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed(None));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Client side of the upgrade. Returns bytes read past the response head.
pub async fn client_handshake<S>(stream: &mut S, target: &Target, config: &Config) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = HandshakeRequest::client(target.host.clone(), target.path.clone())?;
    let mut out = Vec::with_capacity(256);
    request.write(&mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;

    let (head, rest) = read_head(stream, &config.limits).await?;
    HandshakeResponse::parse(&head)?.verify(&request.key)?;
    Ok(rest)
}

/// Server side of the upgrade.
///
/// Answers `101` when the request is a valid upgrade for `path`, `404` for
/// any other path and `400` for anything malformed. Returns the bytes read
/// past the request head.
pub async fn server_handshake<S>(stream: &mut S, config: &Config, path: &str) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, rest) = read_head(stream, &config.limits).await?;

    let request = match HandshakeRequest::parse(&head).and_then(|r| r.validate().map(|()| r)) {
        Ok(request) => request,
        Err(e) => {
            reject(stream, "400 Bad Request").await;
            return Err(e);
        }
    };

    let requested = request
        .path
        .split_once('?')
        .map_or(request.path.as_str(), |(p, _)| p);
    if requested != path {
        reject(stream, "404 Not Found").await;
        return Err(Error::InvalidHandshake(format!(
            "no upgrade endpoint at {requested}"
        )));
    }

    let mut out = Vec::with_capacity(256);
    HandshakeResponse::from_request(&request).write(&mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok(rest)
}

async fn reject<S>(stream: &mut S, status: &str)
where
    S: AsyncWrite + Unpin,
{
    let mut out = Vec::new();
    HandshakeResponse::write_rejection(status, &mut out);
    if let Err(e) = stream.write_all(&out).await {
        debug!(status, error = %e, "failed to write upgrade rejection");
    }
    let _ = stream.shutdown().await;
}

fn set_nodelay(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY");
    }
}

/// Connect to a `ws://` URL and perform the client upgrade.
///
/// # Errors
///
/// - `Error::InvalidUrl` if `url` is not a usable `ws://` URL
/// - `Error::Dial` if the TCP connect or the upgrade fails
pub async fn dial(url: &str, config: &Config) -> Result<(TcpReader, TcpWriter)> {
    let target = Target::parse(url)?;
    let dial_err = |e: Error| Error::Dial(format!("{url}: {e}"));

    let mut stream = TcpStream::connect(&target.addr)
        .await
        .map_err(|e| dial_err(e.into()))?;
    set_nodelay(&stream);
    let rest = client_handshake(&mut stream, &target, config)
        .await
        .map_err(dial_err)?;

    debug!(url, "websocket upgrade complete");
    let (read, write) = stream.into_split();
    Ok((
        ConnectionReader::with_buffered(read, Role::Client, config.clone(), &rest),
        ConnectionWriter::new(write, Role::Client, config),
    ))
}

/// Upgrade an accepted TCP stream.
///
/// # Errors
///
/// Returns `Error::Upgrade` when the request is rejected or the stream fails.
pub async fn accept(mut stream: TcpStream, config: &Config, path: &str) -> Result<(TcpReader, TcpWriter)> {
    let rest = server_handshake(&mut stream, config, path)
        .await
        .map_err(|e| Error::Upgrade(e.to_string()))?;
    set_nodelay(&stream);

    let (read, write) = stream.into_split();
    Ok((
        ConnectionReader::with_buffered(read, Role::Server, config.clone(), &rest),
        ConnectionWriter::new(write, Role::Server, config),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use tokio::io::duplex;

    #[test]
    fn test_target_parse() {
        let target = Target::parse("ws://localhost:13785/ws").unwrap();
        assert_eq!(target.addr, "localhost:13785");
        assert_eq!(target.host, "localhost:13785");
        assert_eq!(target.path, "/ws");

        let target = Target::parse("ws://example.com/chat?room=1").unwrap();
        assert_eq!(target.addr, "example.com:80");
        assert_eq!(target.host, "example.com");
        assert_eq!(target.path, "/chat?room=1");
    }

    #[test]
    fn test_target_rejects_bad_urls() {
        assert!(matches!(Target::parse("not a url"), Err(Error::InvalidUrl(_))));
        assert!(matches!(Target::parse("wss://example.com/ws"), Err(Error::InvalidUrl(_))));
        assert!(matches!(Target::parse("http://example.com/ws"), Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_handshake_over_duplex() {
        let (mut client_io, mut server_io) = duplex(4096);
        let config = Config::new();
        let target = Target::parse("ws://localhost/ws").unwrap();

        let server = tokio::spawn(async move {
            let rest = server_handshake(&mut server_io, &Config::new(), "/ws").await;
            (rest, server_io)
        });
        let rest = client_handshake(&mut client_io, &target, &config).await.unwrap();
        assert!(rest.is_empty());

        let (server_rest, server_io) = server.await.unwrap();
        assert!(server_rest.unwrap().is_empty());

        let (_r, w) = tokio::io::split(client_io);
        let (r, _w) = tokio::io::split(server_io);
        let mut writer = ConnectionWriter::new(w, Role::Client, &config);
        let mut reader = ConnectionReader::new(r, Role::Server, config.clone());
        writer.send(Message::text("after upgrade")).await.unwrap();
        assert_eq!(reader.recv().await.unwrap(), Message::text("after upgrade"));
    }

    #[tokio::test]
    async fn test_wrong_path_gets_404() {
        let (mut client_io, mut server_io) = duplex(4096);
        let server = tokio::spawn(async move {
            server_handshake(&mut server_io, &Config::new(), "/ws").await
        });

        let target = Target::parse("ws://localhost/other").unwrap();
        let result = client_handshake(&mut client_io, &target, &Config::new()).await;
        assert!(matches!(result, Err(Error::InvalidHandshake(msg)) if msg.contains("404")));
        assert!(server.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_malformed_request_gets_400() {
        let (mut client_io, mut server_io) = duplex(4096);
        let server = tokio::spawn(async move {
            server_handshake(&mut server_io, &Config::new(), "/ws").await
        });

        client_io
            .write_all(b"GET /ws HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client_io.read_to_end(&mut response).await.unwrap();
        assert!(response.starts_with(b"HTTP/1.1 400"));
        assert!(server.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_oversized_head_rejected() {
        let (mut client_io, mut server_io) = duplex(1 << 16);
        let config = Config::new().with_limits(Limits::new(1024, 1024, 64));
        let mut junk = b"GET /ws HTTP/1.1\r\n".to_vec();
        junk.extend(std::iter::repeat_n(b'a', 200));
        client_io.write_all(&junk).await.unwrap();

        assert!(matches!(
            server_handshake(&mut server_io, &config, "/ws").await,
            Err(Error::HandshakeTooLarge { max: 64, .. })
        ));
    }

    #[tokio::test]
    async fn test_frames_after_head_are_kept() {
        let (mut client_io, mut server_io) = duplex(4096);
        let mut request = Vec::new();
        HandshakeRequest::client("localhost", "/ws")
            .unwrap()
            .write(&mut request);
        // A masked "hi" text frame sent in the same write as the head.
        request.extend_from_slice(&[0x81, 0x82, 0, 0, 0, 0, b'h', b'i']);
        client_io.write_all(&request).await.unwrap();

        let rest = server_handshake(&mut server_io, &Config::new(), "/ws")
            .await
            .unwrap();
        assert_eq!(rest, [0x81, 0x82, 0, 0, 0, 0, b'h', b'i']);
    }
}
