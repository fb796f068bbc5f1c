//! Frames one packet per read/write against a byte stream.
//!
//! Wire layout, big-endian:
//!
//! ```text
//! ┌────────┬──────────────┬────────────────┬────────────────┐
//! │ 1 byte │   2 bytes    │   variable     │   variable     │
//! │  K|F   │  remaining   │ variable head  │     body       │
//! └────────┴──────────────┴────────────────┴────────────────┘
//! K|F = (kind << 4) | flags      remaining = head_size + body_size
//! ```
//!
//! Encoding and decoding each reuse one grow-only buffer, so a busy
//! connection settles into zero per-frame allocations and one stream write
//! per packet. Neither side is safe for concurrent use; the connection
//! layer owns one encoder per writer and one decoder per reader.

use std::sync::Arc;

use byteorder::BigEndian;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::binary::{ByteReader, ByteWriter};
use super::packet::{Packet, PacketFlags, Registry};
use crate::error::Error;

/// Bytes of the fixed head: kind/flags byte plus the remaining length.
pub const FIXED_HEAD_LEN: usize = 3;

/// Bit width of the flags nibble in the first header byte.
pub const FLAGS_BITS: u8 = 4;
const FLAGS_MASK: u8 = 0x0f;

/// Largest payload (variable head plus body) a frame may carry.
pub const MAX_PKT_SIZE: usize = u16::MAX as usize;

fn clamp_max_pkt_size(size: usize) -> usize {
    if size == 0 || size > MAX_PKT_SIZE {
        MAX_PKT_SIZE
    } else {
        size
    }
}

/// Turns packets into frames.
#[derive(Debug)]
pub struct Encoder {
    buf: BytesMut,
    max_pkt_size: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            max_pkt_size: MAX_PKT_SIZE,
        }
    }

    /// Caps the payload size this encoder will produce. Zero or out-of-range
    /// values fall back to [`MAX_PKT_SIZE`].
    pub fn with_max_pkt_size(mut self, size: usize) -> Self {
        self.max_pkt_size = clamp_max_pkt_size(size);
        self
    }

    /// Frames `p` into the internal buffer and returns the frame bytes.
    ///
    /// Fails with [`Error::PacketTooLarge`] before producing any byte when
    /// the payload exceeds the configured maximum.
    pub fn encode(&mut self, p: &Packet) -> Result<&[u8], Error> {
        let size = p.head_size() + p.body().len();
        if size > self.max_pkt_size {
            return Err(Error::PacketTooLarge);
        }
        self.buf.resize(FIXED_HEAD_LEN + size, 0);
        let mut w = ByteWriter::<BigEndian>::new(&mut self.buf);
        w.put_u8((p.kind() as u8) << FLAGS_BITS | (p.flags().0 & FLAGS_MASK));
        w.put_u16(size as u16);
        p.encode_head(&mut w);
        if !p.body().is_empty() {
            w.put_bytes(p.body());
        }
        Ok(&self.buf)
    }
}

/// Turns frames read from a stream back into typed packets.
#[derive(Debug)]
pub struct Decoder {
    registry: Arc<Registry>,
    head: [u8; FIXED_HEAD_LEN],
    buf: BytesMut,
    max_pkt_size: usize,
}

impl Decoder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            head: [0; FIXED_HEAD_LEN],
            buf: BytesMut::new(),
            max_pkt_size: MAX_PKT_SIZE,
        }
    }

    /// Caps the payload size this decoder will accept. Zero or out-of-range
    /// values fall back to [`MAX_PKT_SIZE`].
    pub fn with_max_pkt_size(mut self, size: usize) -> Self {
        self.max_pkt_size = clamp_max_pkt_size(size);
        self
    }

    /// Reads exactly one frame from `src` and decodes it.
    ///
    /// Any error leaves the stream position indeterminate; callers must
    /// treat a failed read as terminal for the stream.
    pub async fn read_from<R>(&mut self, src: &mut R) -> Result<Packet, Error>
    where
        R: AsyncRead + Unpin,
    {
        src.read_exact(&mut self.head).await?;
        let mut hr = ByteReader::<BigEndian>::new(&self.head);
        let kind_flags = hr.read_u8()?;
        let kind = kind_flags >> FLAGS_BITS;
        let flags = PacketFlags(kind_flags & FLAGS_MASK);
        let mut p = self.registry.create_packet(kind, flags)?;
        let remaining = hr.read_u16()? as usize;
        if remaining > self.max_pkt_size {
            return Err(Error::PacketTooLarge);
        }
        self.buf.resize(remaining, 0);
        src.read_exact(&mut self.buf).await?;
        let mut r = ByteReader::<BigEndian>::new(&self.buf);
        p.decode_head(&mut r, self.registry.props())?;
        p.set_body(r.remain_bytes());
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::super::packet::{
        HttpPacket, NotifyPacket, PacketKind, PingPacket, PublishPacket, SubscribePacket,
        UnsubscribePacket,
    };
    use super::super::props::PROP_CREATED_TIME;
    use super::*;

    fn decoder() -> Decoder {
        Decoder::new(Arc::new(Registry::default()))
    }

    async fn round_trip(p: Packet) -> Packet {
        let mut enc = Encoder::new();
        let frame = enc.encode(&p).unwrap().to_vec();
        assert_eq!(frame.len(), FIXED_HEAD_LEN + p.head_size() + p.body().len());
        let decoded = decoder().read_from(&mut frame.as_slice()).await.unwrap();
        assert_eq!(decoded, p);
        decoded
    }

    #[tokio::test]
    async fn pong_frame_is_three_bytes() {
        let mut enc = Encoder::new();
        let frame = enc.encode(&PingPacket::pong().into()).unwrap().to_vec();
        assert_eq!(frame, [0x11, 0x00, 0x00]);

        let decoded = decoder().read_from(&mut frame.as_slice()).await.unwrap();
        assert_eq!(decoded.kind(), PacketKind::Ping);
        assert_eq!(decoded.flags(), PacketFlags::PONG);
    }

    #[tokio::test]
    async fn publish_with_props_round_trips() {
        let mut p = PublishPacket::new("1000:2", 1000, Vec::new());
        p.head.notify.props.with_u64(PROP_CREATED_TIME, 1_700_000_000);
        let p = Packet::from(p);

        let mut enc = Encoder::new();
        let frame = enc.encode(&p).unwrap().to_vec();
        assert_eq!(frame[0], 0x60);

        let decoded = decoder().read_from(&mut frame.as_slice()).await.unwrap();
        assert_eq!(decoded, p);
        assert_eq!(
            decoded.props().unwrap().get_u64(PROP_CREATED_TIME),
            Some(1_700_000_000)
        );
    }

    #[tokio::test]
    async fn every_kind_round_trips() {
        round_trip(PingPacket::new().into()).await;
        round_trip(NotifyPacket::new(1000, b"hello".to_vec()).with_version(2, 1).into()).await;
        round_trip(HttpPacket::new(7, 1000, b"req".to_vec()).into()).await;
        round_trip(SubscribePacket::new(8, 1000, b"sub".to_vec()).into()).await;
        round_trip(UnsubscribePacket::new(9, 1000, Vec::new()).into()).await;
        round_trip(PublishPacket::new("a/b", 2000, b"payload".to_vec()).into()).await;
    }

    #[tokio::test]
    async fn concatenated_frames_keep_their_boundaries() {
        let packets: Vec<Packet> = vec![
            PingPacket::new().into(),
            NotifyPacket::new(1, b"one".to_vec()).into(),
            PublishPacket::new("t", 2, b"two".to_vec()).into(),
        ];
        let mut enc = Encoder::new();
        let mut wire = Vec::new();
        for p in &packets {
            wire.extend_from_slice(enc.encode(p).unwrap());
        }

        let mut dec = decoder();
        let mut src = wire.as_slice();
        for expect in &packets {
            let got = dec.read_from(&mut src).await.unwrap();
            assert_eq!(&got, expect);
        }
        assert!(src.is_empty());
    }

    #[tokio::test]
    async fn oversized_packet_is_rejected_on_encode() {
        let p = Packet::from(NotifyPacket::new(1, vec![0u8; MAX_PKT_SIZE + 1]));
        let mut enc = Encoder::new();
        assert!(matches!(enc.encode(&p), Err(Error::PacketTooLarge)));

        let mut enc = Encoder::new().with_max_pkt_size(16);
        let p = Packet::from(NotifyPacket::new(1, vec![0u8; 12]));
        assert!(matches!(enc.encode(&p), Err(Error::PacketTooLarge)));
    }

    #[tokio::test]
    async fn oversized_remaining_length_is_rejected_on_decode() {
        // Kind byte for notify, remaining length far above the cap.
        let frame = [0x20, 0xff, 0xff];
        let mut dec = decoder().with_max_pkt_size(16);
        assert!(matches!(
            dec.read_from(&mut frame.as_slice()).await,
            Err(Error::PacketTooLarge)
        ));
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let frame = [0xf0, 0x00, 0x00];
        assert!(matches!(
            decoder().read_from(&mut frame.as_slice()).await,
            Err(Error::InvalidPktKind)
        ));
    }

    #[tokio::test]
    async fn truncated_stream_is_an_io_error() {
        let frame = [0x20, 0x00, 0x10, 0x00];
        assert!(matches!(
            decoder().read_from(&mut frame.as_slice()).await,
            Err(Error::Io(_))
        ));
    }
}
