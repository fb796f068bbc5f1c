//! Variable-head shapes shared by the concrete packet kinds.
//!
//! Every data packet ends its head with [`NotifyHead`]; the richer shapes
//! prepend their own fields and then delegate, so each kind decodes its own
//! prefix and hands the tail to the shared shape.

use byteorder::ByteOrder;

use super::binary::{ByteReader, ByteWriter};
use super::props::{PropRegistry, Props};
use crate::error::Error;

/// Number of low bits of the version/codec byte that hold the codec mode.
pub const CODEC_BITS: u8 = 3;
const CODEC_MASK: u8 = 0x07;

/// `cmd(u16) ‖ (version<<3 | codec)(u8) ‖ props_size(u16) ‖ props`.
///
/// `version` rides in the high 5 bits and `codec` in the low 3 bits of one
/// shared byte.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyHead {
    /// Message identifier; decides the body structure together with the
    /// version and codec.
    pub cmd: u16,
    pub version: u8,
    pub codec: u8,
    pub props: Props,
}

impl NotifyHead {
    pub fn new(cmd: u16) -> Self {
        Self {
            cmd,
            ..Self::default()
        }
    }

    pub fn head_size(&self) -> usize {
        // cmd + version/codec byte + props length prefix, then the props.
        5 + self.props.size()
    }

    pub(crate) fn encode<O: ByteOrder>(&self, w: &mut ByteWriter<'_, O>) {
        w.put_u16(self.cmd);
        w.put_u8(self.version << CODEC_BITS | (self.codec & CODEC_MASK));
        w.put_u16(self.props.size() as u16);
        self.props.encode(w);
    }

    pub(crate) fn decode<O: ByteOrder>(
        &mut self,
        r: &mut ByteReader<'_, O>,
        registry: &PropRegistry,
    ) -> Result<(), Error> {
        if !r.has(5) {
            return Err(Error::DecodeBadPacket);
        }
        self.cmd = r.read_u16()?;
        let vc = r.read_u8()?;
        self.version = vc >> CODEC_BITS;
        self.codec = vc & CODEC_MASK;
        let size = r.read_u16()? as usize;
        self.props = Props::new();
        self.props.decode(r, size, registry)
    }
}

/// `seq_id(u16)` followed by a [`NotifyHead`]; carried by the
/// request/response packet kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpHead {
    /// Sequence id pairing a request with its response.
    pub seq_id: u16,
    pub notify: NotifyHead,
}

impl HttpHead {
    pub fn new(seq_id: u16, cmd: u16) -> Self {
        Self {
            seq_id,
            notify: NotifyHead::new(cmd),
        }
    }

    pub fn head_size(&self) -> usize {
        2 + self.notify.head_size()
    }

    pub(crate) fn encode<O: ByteOrder>(&self, w: &mut ByteWriter<'_, O>) {
        w.put_u16(self.seq_id);
        self.notify.encode(w);
    }

    pub(crate) fn decode<O: ByteOrder>(
        &mut self,
        r: &mut ByteReader<'_, O>,
        registry: &PropRegistry,
    ) -> Result<(), Error> {
        if !r.has(2) {
            return Err(Error::DecodeBadPacket);
        }
        self.seq_id = r.read_u16()?;
        self.notify.decode(r, registry)
    }
}

/// `topic_len(u16) ‖ topic(utf8)` followed by a [`NotifyHead`]; carried by
/// publish packets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PubHead {
    pub topic: String,
    pub notify: NotifyHead,
}

impl PubHead {
    pub fn new(topic: impl Into<String>, cmd: u16) -> Self {
        Self {
            topic: topic.into(),
            notify: NotifyHead::new(cmd),
        }
    }

    pub fn head_size(&self) -> usize {
        2 + self.topic.len() + self.notify.head_size()
    }

    pub(crate) fn encode<O: ByteOrder>(&self, w: &mut ByteWriter<'_, O>) {
        w.put_u16(self.topic.len() as u16);
        w.put_str(&self.topic);
        self.notify.encode(w);
    }

    pub(crate) fn decode<O: ByteOrder>(
        &mut self,
        r: &mut ByteReader<'_, O>,
        registry: &PropRegistry,
    ) -> Result<(), Error> {
        if !r.has(2) {
            return Err(Error::DecodeBadPacket);
        }
        let size = r.read_u16()? as usize;
        if !r.has(size) {
            return Err(Error::DecodeBadPacket);
        }
        self.topic = r.read_str(size)?;
        self.notify.decode(r, registry)
    }
}

#[cfg(test)]
mod tests {
    use byteorder::BigEndian;

    use super::super::props::PROP_SUB_ID;
    use super::*;

    fn round_trip_notify(head: &NotifyHead) -> NotifyHead {
        let mut buf = vec![0u8; head.head_size()];
        let mut w = ByteWriter::<BigEndian>::new(&mut buf);
        head.encode(&mut w);
        assert_eq!(w.written(), head.head_size());
        let mut decoded = NotifyHead::default();
        let mut r = ByteReader::<BigEndian>::new(&buf);
        decoded.decode(&mut r, &PropRegistry::default()).unwrap();
        decoded
    }

    #[test]
    fn notify_head_wire_layout() {
        let mut head = NotifyHead::new(1000);
        head.version = 2;
        head.codec = 5;
        let mut buf = vec![0u8; head.head_size()];
        let mut w = ByteWriter::<BigEndian>::new(&mut buf);
        head.encode(&mut w);
        // cmd, then version in the high 5 bits and codec in the low 3,
        // then an empty props region.
        assert_eq!(buf, [0x03, 0xE8, 0x15, 0x00, 0x00]);
    }

    #[test]
    fn notify_head_round_trip_preserves_version_and_codec() {
        let mut head = NotifyHead::new(7);
        head.version = 31;
        head.codec = 7;
        head.props.with_u16(PROP_SUB_ID, 9);
        assert_eq!(round_trip_notify(&head), head);
    }

    #[test]
    fn http_head_prepends_seq_id() {
        let head = HttpHead::new(0x0102, 3);
        let mut buf = vec![0u8; head.head_size()];
        let mut w = ByteWriter::<BigEndian>::new(&mut buf);
        head.encode(&mut w);
        assert_eq!(buf[..2], [0x01, 0x02]);

        let mut decoded = HttpHead::default();
        let mut r = ByteReader::<BigEndian>::new(&buf);
        decoded.decode(&mut r, &PropRegistry::default()).unwrap();
        assert_eq!(decoded, head);
    }

    #[test]
    fn pub_head_prepends_topic() {
        let head = PubHead::new("1000:2", 1000);
        let mut buf = vec![0u8; head.head_size()];
        let mut w = ByteWriter::<BigEndian>::new(&mut buf);
        head.encode(&mut w);
        assert_eq!(buf[..2], [0x00, 0x06]);
        assert_eq!(&buf[2..8], b"1000:2");

        let mut decoded = PubHead::default();
        let mut r = ByteReader::<BigEndian>::new(&buf);
        decoded.decode(&mut r, &PropRegistry::default()).unwrap();
        assert_eq!(decoded, head);
    }

    #[test]
    fn truncated_heads_fail_decode() {
        let registry = PropRegistry::default();

        let mut decoded = NotifyHead::default();
        let mut r = ByteReader::<BigEndian>::new(&[0x00, 0x01, 0x00]);
        assert!(matches!(
            decoded.decode(&mut r, &registry),
            Err(Error::DecodeBadPacket)
        ));

        let mut decoded = PubHead::default();
        // Declared topic length runs past the buffer.
        let mut r = ByteReader::<BigEndian>::new(&[0x00, 0x08, b'a', b'b']);
        assert!(matches!(
            decoded.decode(&mut r, &registry),
            Err(Error::DecodeBadPacket)
        ));
    }
}
