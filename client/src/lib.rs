//! Framed-protocol client for the game broker.
//!
//! Thin wrapper around a TCP stream speaking the shared length-prefixed
//! wire format. Used by the demo client binary and by the integration
//! tests, which drive a real broker through real sockets.

use bytes::Bytes;
use log::debug;
use shared::{read_frame, write_frame};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// One connection to the broker.
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        debug!("Connected to {}", stream.peer_addr()?);
        Ok(Self { stream })
    }

    /// Sends one framed message.
    pub async fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        write_frame(&mut self.stream, payload).await
    }

    /// Receives one framed message; `Ok(None)` means the broker closed
    /// the connection.
    pub async fn recv(&mut self) -> std::io::Result<Option<Bytes>> {
        read_frame(&mut self.stream).await
    }

    /// Like [`Connection::recv`] but gives up after `timeout` with a
    /// `TimedOut` error.
    ///
    /// A timeout that fires mid-frame abandons the partial read; the
    /// stream is not resynchronized afterwards, so callers should treat a
    /// timed-out connection as polled, not as reusable mid-message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<Bytes>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no frame arrived within the timeout",
            )),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Half-closes the write side, signalling an orderly goodbye to the
    /// broker.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}
