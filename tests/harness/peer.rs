//! A raw connection without routing or reconnect.

use wskit::connection::{TcpReader, TcpWriter, dial};
use wskit::{CloseCode, Config, Message};

use super::within;

pub struct TestPeer {
    reader: TcpReader,
    writer: TcpWriter,
}

impl TestPeer {
    pub async fn connect(url: &str) -> wskit::Result<Self> {
        let (reader, writer) = dial(url, &Config::new()).await?;
        Ok(Self { reader, writer })
    }

    pub async fn send_text(&mut self, text: &str) -> wskit::Result<()> {
        self.writer.send(Message::text(text)).await
    }

    /// Next data message; control frames are skipped.
    pub async fn recv(&mut self) -> wskit::Result<Message> {
        loop {
            match self.reader.recv().await? {
                Message::Ping(_) | Message::Pong(_) => continue,
                message => return Ok(message),
            }
        }
    }

    /// Next text message, failing the test on anything else or a timeout.
    pub async fn recv_text(&mut self) -> String {
        match within("a text message", self.recv()).await {
            Ok(Message::Text(text)) => text,
            other => panic!("expected a text message, got {other:?}"),
        }
    }

    pub async fn close(mut self) -> wskit::Result<()> {
        self.writer.close(CloseCode::Normal, "").await
    }

    pub fn into_halves(self) -> (TcpReader, TcpWriter) {
        (self.reader, self.writer)
    }
}
