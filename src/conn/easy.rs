//! Direct connection: a codec paired with a stream, applying per-call
//! read and write deadlines.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time;

use crate::error::Error;
use crate::protocol::{Decoder, Encoder, Packet, Registry};

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// A full-duplex packet connection over any byte stream.
///
/// Each `send` writes one frame under `write_timeout`, each `receive` reads
/// one frame under `read_timeout`; a zero duration disables the deadline.
/// [`EasyConn::split`] breaks the connection into its two directions so a
/// sender and a receiver can run concurrently, each owning one half.
pub struct EasyConn<S> {
    send: SendHalf<S>,
    recv: ReceiveHalf<S>,
}

impl EasyConn<TcpStream> {
    /// Connects over TCP with the default dial timeout.
    pub async fn dial(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        Self::dial_timeout(addr, DEFAULT_DIAL_TIMEOUT).await
    }

    pub async fn dial_timeout(
        addr: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let stream = if timeout.is_zero() {
            TcpStream::connect(addr).await?
        } else {
            time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dial timed out"))??
        };
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite> EasyConn<S> {
    /// Wraps `stream` with the built-in packet registry and the default
    /// deadlines.
    pub fn new(stream: S) -> Self {
        Self::with_registry(stream, Arc::new(Registry::default()))
    }

    pub fn with_registry(stream: S, registry: Arc<Registry>) -> Self {
        let (r, w) = tokio::io::split(stream);
        Self {
            send: SendHalf {
                w,
                enc: Encoder::new(),
                write_timeout: DEFAULT_WRITE_TIMEOUT,
            },
            recv: ReceiveHalf {
                r,
                dec: Decoder::new(registry),
                read_timeout: DEFAULT_READ_TIMEOUT,
            },
        }
    }

    /// Deadline for each write; zero disables it.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.send.write_timeout = timeout;
        self
    }

    /// Deadline for each read; zero disables it.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.recv.read_timeout = timeout;
        self
    }

    /// Caps the payload size in both directions.
    pub fn max_pkt_size(mut self, size: usize) -> Self {
        self.send.enc = self.send.enc.with_max_pkt_size(size);
        self.recv.dec = self.recv.dec.with_max_pkt_size(size);
        self
    }

    pub async fn send(&mut self, p: &Packet) -> Result<(), Error> {
        self.send.send(p).await
    }

    pub async fn receive(&mut self) -> Result<Packet, Error> {
        self.recv.receive().await
    }

    /// Shuts the stream down, unblocking the remote peer's reads.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.send.close().await
    }

    /// Splits into independently owned send and receive directions.
    pub fn split(self) -> (SendHalf<S>, ReceiveHalf<S>) {
        (self.send, self.recv)
    }
}

/// The writing direction of an [`EasyConn`].
pub struct SendHalf<S> {
    w: WriteHalf<S>,
    enc: Encoder,
    write_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite> SendHalf<S> {
    pub async fn send(&mut self, p: &Packet) -> Result<(), Error> {
        let frame = self.enc.encode(p)?;
        if self.write_timeout.is_zero() {
            self.w.write_all(frame).await?;
        } else {
            time::timeout(self.write_timeout, self.w.write_all(frame))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))??;
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), Error> {
        self.w.shutdown().await?;
        Ok(())
    }
}

/// The reading direction of an [`EasyConn`].
pub struct ReceiveHalf<S> {
    r: ReadHalf<S>,
    dec: Decoder,
    read_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite> ReceiveHalf<S> {
    pub async fn receive(&mut self) -> Result<Packet, Error> {
        if self.read_timeout.is_zero() {
            self.dec.read_from(&mut self.r).await
        } else {
            time::timeout(self.read_timeout, self.dec.read_from(&mut self.r))
                .await
                .map_err(|_| {
                    Error::Io(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
                })?
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;
    use crate::protocol::{NotifyPacket, PingPacket};

    #[tokio::test]
    async fn send_and_receive_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = EasyConn::new(a);
        let mut right = EasyConn::new(b);

        let p = Packet::from(NotifyPacket::new(1000, b"hello".to_vec()));
        left.send(&p).await.unwrap();
        let got = right.receive().await.unwrap();
        assert_eq!(got, p);

        right.send(&PingPacket::pong().into()).await.unwrap();
        let got = left.receive().await.unwrap();
        assert_eq!(got, PingPacket::pong().into());
    }

    #[tokio::test(start_paused = true)]
    async fn receive_honors_read_deadline() {
        let (a, _b) = tokio::io::duplex(1024);
        let mut conn = EasyConn::new(a).read_timeout(Duration::from_secs(1));
        let err = conn.receive().await.unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), ErrorKind::TimedOut),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_honors_write_deadline() {
        // A one-byte pipe nobody drains: the frame write cannot complete.
        let (a, _b) = tokio::io::duplex(1);
        let mut conn = EasyConn::new(a).write_timeout(Duration::from_secs(1));
        let err = conn
            .send(&NotifyPacket::new(1, b"payload".to_vec()).into())
            .await
            .unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), ErrorKind::TimedOut),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn close_delivers_eof_to_the_peer() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = EasyConn::new(a);
        let mut right = EasyConn::new(b).read_timeout(Duration::ZERO);
        left.close().await.unwrap();
        let err = right.receive().await.unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other}"),
        }
    }
}
