//! Typed key/value properties carried inside a packet's variable head.
//!
//! Each property is one id byte followed by its value; the value shape is
//! fixed by the [`PropRegistry`], so decoding an id the registry does not
//! know fails the whole frame. The bag tracks its encoded size incrementally
//! so head-size computation never walks the map.

use std::collections::HashMap;

use byteorder::ByteOrder;

use super::binary::{ByteReader, ByteWriter};
use crate::error::Error;

pub type PropId = u8;

/// Creation time of the packet, seconds since the epoch.
pub const PROP_CREATED_TIME: PropId = 1;
/// Identifier of the subscription a publish belongs to.
pub const PROP_SUB_ID: PropId = 2;
/// Topic attached to a response.
pub const PROP_TOPIC: PropId = 3;

/// The wire shape of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Str,
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl PropValue {
    /// Encoded size of the value, excluding the id byte.
    pub fn size(&self) -> usize {
        match self {
            PropValue::U8(_) => 1,
            PropValue::U16(_) => 2,
            PropValue::U32(_) | PropValue::F32(_) => 4,
            PropValue::U64(_) | PropValue::F64(_) => 8,
            PropValue::Str(s) => 2 + s.len(),
        }
    }

    pub fn kind(&self) -> PropKind {
        match self {
            PropValue::U8(_) => PropKind::U8,
            PropValue::U16(_) => PropKind::U16,
            PropValue::U32(_) => PropKind::U32,
            PropValue::U64(_) => PropKind::U64,
            PropValue::F32(_) => PropKind::F32,
            PropValue::F64(_) => PropKind::F64,
            PropValue::Str(_) => PropKind::Str,
        }
    }

    fn encode<O: ByteOrder>(&self, w: &mut ByteWriter<'_, O>) {
        match self {
            PropValue::U8(v) => w.put_u8(*v),
            PropValue::U16(v) => w.put_u16(*v),
            PropValue::U32(v) => w.put_u32(*v),
            PropValue::U64(v) => w.put_u64(*v),
            PropValue::F32(v) => w.put_f32(*v),
            PropValue::F64(v) => w.put_f64(*v),
            PropValue::Str(s) => {
                w.put_u16(s.len() as u16);
                w.put_str(s);
            }
        }
    }

    fn decode<O: ByteOrder>(kind: PropKind, r: &mut ByteReader<'_, O>) -> Result<Self, Error> {
        let v = match kind {
            PropKind::U8 => {
                if !r.has(1) {
                    return Err(Error::DecodeBadPacket);
                }
                PropValue::U8(r.read_u8()?)
            }
            PropKind::U16 => {
                if !r.has(2) {
                    return Err(Error::DecodeBadPacket);
                }
                PropValue::U16(r.read_u16()?)
            }
            PropKind::U32 => {
                if !r.has(4) {
                    return Err(Error::DecodeBadPacket);
                }
                PropValue::U32(r.read_u32()?)
            }
            PropKind::U64 => {
                if !r.has(8) {
                    return Err(Error::DecodeBadPacket);
                }
                PropValue::U64(r.read_u64()?)
            }
            PropKind::F32 => {
                if !r.has(4) {
                    return Err(Error::DecodeBadPacket);
                }
                PropValue::F32(r.read_f32()?)
            }
            PropKind::F64 => {
                if !r.has(8) {
                    return Err(Error::DecodeBadPacket);
                }
                PropValue::F64(r.read_f64()?)
            }
            PropKind::Str => {
                if !r.has(2) {
                    return Err(Error::DecodeBadPacket);
                }
                let size = r.read_u16()? as usize;
                if !r.has(size) {
                    return Err(Error::DecodeBadPacket);
                }
                PropValue::Str(r.read_str(size)?)
            }
        };
        Ok(v)
    }
}

/// Maps a property id to the value shape used to decode it.
///
/// The registry is append-only: it is populated before any connection worker
/// starts and read without locks afterwards. Registering the same id twice
/// is a programming error and panics.
#[derive(Debug, Clone)]
pub struct PropRegistry {
    kinds: [Option<PropKind>; 256],
}

impl PropRegistry {
    /// A registry with no properties registered.
    pub fn empty() -> Self {
        Self { kinds: [None; 256] }
    }

    pub fn register(&mut self, id: PropId, kind: PropKind) {
        if self.kinds[id as usize].is_some() {
            panic!("property id '{id}' is already registered");
        }
        self.kinds[id as usize] = Some(kind);
    }

    pub fn kind(&self, id: PropId) -> Result<PropKind, Error> {
        self.kinds[id as usize].ok_or(Error::InvalidPropId)
    }
}

impl Default for PropRegistry {
    /// The built-in property set.
    fn default() -> Self {
        let mut reg = Self::empty();
        reg.register(PROP_CREATED_TIME, PropKind::U64);
        reg.register(PROP_SUB_ID, PropKind::U16);
        reg.register(PROP_TOPIC, PropKind::Str);
        reg
    }
}

/// An ordered-size-tracked bag of typed properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props {
    props: HashMap<PropId, PropValue>,
    encoded_size: usize,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `id`, replacing any previous value for the id.
    pub fn with(&mut self, id: PropId, value: PropValue) -> &mut Self {
        self.remove(id);
        self.encoded_size += 1 + value.size();
        self.props.insert(id, value);
        self
    }

    pub fn get(&self, id: PropId) -> Option<&PropValue> {
        self.props.get(&id)
    }

    pub fn remove(&mut self, id: PropId) -> &mut Self {
        if let Some(old) = self.props.remove(&id) {
            self.encoded_size -= 1 + old.size();
        }
        self
    }

    pub fn has(&self, id: PropId) -> bool {
        self.props.contains_key(&id)
    }

    /// Number of properties in the bag.
    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Encoded size of all property key-value pairs, excluding the
    /// length prefix emitted by the head.
    pub fn size(&self) -> usize {
        self.encoded_size
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropId, &PropValue)> {
        self.props.iter().map(|(id, v)| (*id, v))
    }

    pub fn with_u8(&mut self, id: PropId, v: u8) -> &mut Self {
        self.with(id, PropValue::U8(v))
    }

    pub fn with_u16(&mut self, id: PropId, v: u16) -> &mut Self {
        self.with(id, PropValue::U16(v))
    }

    pub fn with_u32(&mut self, id: PropId, v: u32) -> &mut Self {
        self.with(id, PropValue::U32(v))
    }

    pub fn with_u64(&mut self, id: PropId, v: u64) -> &mut Self {
        self.with(id, PropValue::U64(v))
    }

    pub fn with_f32(&mut self, id: PropId, v: f32) -> &mut Self {
        self.with(id, PropValue::F32(v))
    }

    pub fn with_f64(&mut self, id: PropId, v: f64) -> &mut Self {
        self.with(id, PropValue::F64(v))
    }

    pub fn with_str(&mut self, id: PropId, v: impl Into<String>) -> &mut Self {
        self.with(id, PropValue::Str(v.into()))
    }

    pub fn get_u8(&self, id: PropId) -> Option<u8> {
        match self.get(id) {
            Some(PropValue::U8(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u16(&self, id: PropId) -> Option<u16> {
        match self.get(id) {
            Some(PropValue::U16(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32(&self, id: PropId) -> Option<u32> {
        match self.get(id) {
            Some(PropValue::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, id: PropId) -> Option<u64> {
        match self.get(id) {
            Some(PropValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_f32(&self, id: PropId) -> Option<f32> {
        match self.get(id) {
            Some(PropValue::F32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_f64(&self, id: PropId) -> Option<f64> {
        match self.get(id) {
            Some(PropValue::F64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, id: PropId) -> Option<&str> {
        match self.get(id) {
            Some(PropValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub(crate) fn encode<O: ByteOrder>(&self, w: &mut ByteWriter<'_, O>) {
        for (id, value) in &self.props {
            w.put_u8(*id);
            value.encode(w);
        }
    }

    /// Decodes exactly `size` bytes of properties from `r`.
    pub(crate) fn decode<O: ByteOrder>(
        &mut self,
        r: &mut ByteReader<'_, O>,
        size: usize,
        registry: &PropRegistry,
    ) -> Result<(), Error> {
        if size == 0 {
            return Ok(());
        }
        if !r.has(size) {
            return Err(Error::DecodeBadPacket);
        }
        let end = r.already_read() + size;
        while r.already_read() < end {
            let id = r.read_u8()?;
            let kind = registry.kind(id)?;
            let value = PropValue::decode(kind, r)?;
            self.with(id, value);
        }
        // A value that straddles the declared length means the length
        // prefix and the payload disagree.
        if r.already_read() != end {
            return Err(Error::DecodeBadPacket);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use byteorder::BigEndian;

    use super::*;

    #[test]
    fn size_tracks_inserts_replacements_and_removals() {
        let mut props = Props::new();
        assert_eq!(props.size(), 0);
        props.with_u64(PROP_CREATED_TIME, 1_700_000_000);
        assert_eq!(props.size(), 9);
        props.with_u16(PROP_SUB_ID, 7);
        assert_eq!(props.size(), 12);
        // Replacing a value swaps its size contribution but not the count.
        props.with_str(PROP_TOPIC, "a/b");
        assert_eq!(props.size(), 18);
        props.with_str(PROP_TOPIC, "a");
        assert_eq!(props.size(), 16);
        assert_eq!(props.len(), 3);
        props.remove(PROP_CREATED_TIME);
        assert_eq!(props.size(), 7);
        assert_eq!(props.len(), 2);
        assert!(!props.has(PROP_CREATED_TIME));
    }

    #[test]
    fn encode_decode_round_trip() {
        let registry = PropRegistry::default();
        let mut props = Props::new();
        props
            .with_u64(PROP_CREATED_TIME, 1_700_000_000)
            .with_u16(PROP_SUB_ID, 42)
            .with_str(PROP_TOPIC, "1000:2");

        let mut buf = vec![0u8; props.size()];
        let mut w = ByteWriter::<BigEndian>::new(&mut buf);
        props.encode(&mut w);
        assert_eq!(w.written(), props.size());

        let mut decoded = Props::new();
        let mut r = ByteReader::<BigEndian>::new(&buf);
        decoded.decode(&mut r, buf.len(), &registry).unwrap();
        assert_eq!(decoded, props);
        assert_eq!(decoded.get_u64(PROP_CREATED_TIME), Some(1_700_000_000));
        assert_eq!(decoded.get_u16(PROP_SUB_ID), Some(42));
        assert_eq!(decoded.get_str(PROP_TOPIC), Some("1000:2"));
    }

    #[test]
    fn decode_rejects_unknown_id() {
        let registry = PropRegistry::default();
        let buf = [0xEE, 0x01];
        let mut decoded = Props::new();
        let mut r = ByteReader::<BigEndian>::new(&buf);
        let err = decoded.decode(&mut r, buf.len(), &registry).unwrap_err();
        assert!(matches!(err, Error::InvalidPropId));
    }

    #[test]
    fn decode_rejects_value_straddling_declared_length() {
        let registry = PropRegistry::default();
        // A u64 property, but the declared props region ends mid-value.
        let buf = [PROP_CREATED_TIME, 0, 0, 0, 0, 0, 0, 0, 1];
        let mut decoded = Props::new();
        let mut r = ByteReader::<BigEndian>::new(&buf);
        let err = decoded.decode(&mut r, 5, &registry).unwrap_err();
        assert!(matches!(err, Error::DecodeBadPacket));
    }

    #[test]
    fn decode_rejects_short_region() {
        let registry = PropRegistry::default();
        let buf = [PROP_SUB_ID, 0x01];
        let mut decoded = Props::new();
        let mut r = ByteReader::<BigEndian>::new(&buf);
        let err = decoded.decode(&mut r, 4, &registry).unwrap_err();
        assert!(matches!(err, Error::DecodeBadPacket));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_prop_registration_panics() {
        let mut reg = PropRegistry::default();
        reg.register(PROP_TOPIC, PropKind::Str);
    }
}
