//! Concrete packet kinds, the [`Packet`] enum the codec works in terms of,
//! and the registry that turns a wire kind byte back into a typed packet.

use core::fmt;

use byteorder::ByteOrder;

use super::binary::{ByteReader, ByteWriter};
use super::heads::{HttpHead, NotifyHead, PubHead};
use super::props::{PropId, PropKind, PropRegistry, Props};
use crate::error::Error;

/// 4-bit tag identifying a packet's shape.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Ping = 1,
    Notify = 2,
    Http = 3,
    Subscribe = 4,
    Unsubscribe = 5,
    Publish = 6,
}

/// 4-bit bitfield carrying boolean packet markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(pub u8);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Marks a ping packet as the reply leg of the exchange.
    pub const PONG: PacketFlags = PacketFlags(0x01);

    /// Whether every flag set in `v` is also set in `self`.
    pub fn has(self, v: PacketFlags) -> bool {
        self.0 & v.0 == v.0
    }

    pub fn with(self, v: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | v.0)
    }
}

/// Application-level heartbeat; no variable head.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingPacket {
    flags: PacketFlags,
    pub body: Vec<u8>,
}

impl PingPacket {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reply leg of a ping exchange.
    pub fn pong() -> Self {
        Self {
            flags: PacketFlags::PONG,
            ..Self::default()
        }
    }

    pub fn is_pong(&self) -> bool {
        self.flags.has(PacketFlags::PONG)
    }
}

/// One-way data message.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyPacket {
    flags: PacketFlags,
    pub head: NotifyHead,
    pub body: Vec<u8>,
}

impl NotifyPacket {
    pub fn new(cmd: u16, body: Vec<u8>) -> Self {
        Self {
            flags: PacketFlags::NONE,
            head: NotifyHead::new(cmd),
            body,
        }
    }

    pub fn with_version(mut self, version: u8, codec: u8) -> Self {
        self.head.version = version;
        self.head.codec = codec;
        self
    }
}

/// Request/response data message carrying a sequence id.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpPacket {
    flags: PacketFlags,
    pub head: HttpHead,
    pub body: Vec<u8>,
}

impl HttpPacket {
    pub fn new(seq_id: u16, cmd: u16, body: Vec<u8>) -> Self {
        Self {
            flags: PacketFlags::NONE,
            head: HttpHead::new(seq_id, cmd),
            body,
        }
    }

    pub fn with_version(mut self, version: u8, codec: u8) -> Self {
        self.head.notify.version = version;
        self.head.notify.codec = codec;
        self
    }
}

/// Subscription request; responded to with the same sequence id.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribePacket {
    flags: PacketFlags,
    pub head: HttpHead,
    pub body: Vec<u8>,
}

impl SubscribePacket {
    pub fn new(seq_id: u16, cmd: u16, body: Vec<u8>) -> Self {
        Self {
            flags: PacketFlags::NONE,
            head: HttpHead::new(seq_id, cmd),
            body,
        }
    }

    pub fn with_version(mut self, version: u8, codec: u8) -> Self {
        self.head.notify.version = version;
        self.head.notify.codec = codec;
        self
    }
}

/// Subscription teardown request.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribePacket {
    flags: PacketFlags,
    pub head: HttpHead,
    pub body: Vec<u8>,
}

impl UnsubscribePacket {
    pub fn new(seq_id: u16, cmd: u16, body: Vec<u8>) -> Self {
        Self {
            flags: PacketFlags::NONE,
            head: HttpHead::new(seq_id, cmd),
            body,
        }
    }

    pub fn with_version(mut self, version: u8, codec: u8) -> Self {
        self.head.notify.version = version;
        self.head.notify.codec = codec;
        self
    }
}

/// Topic-addressed data message pushed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPacket {
    flags: PacketFlags,
    pub head: PubHead,
    pub body: Vec<u8>,
}

impl PublishPacket {
    pub fn new(topic: impl Into<String>, cmd: u16, body: Vec<u8>) -> Self {
        Self {
            flags: PacketFlags::NONE,
            head: PubHead::new(topic, cmd),
            body,
        }
    }

    pub fn with_version(mut self, version: u8, codec: u8) -> Self {
        self.head.notify.version = version;
        self.head.notify.codec = codec;
        self
    }
}

/// One framed protocol message.
///
/// The kind and flags are fixed at construction; head fields and body stay
/// mutable so handlers can rewrite a request in place before responding.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Ping(PingPacket),
    Notify(NotifyPacket),
    Http(HttpPacket),
    Subscribe(SubscribePacket),
    Unsubscribe(UnsubscribePacket),
    Publish(PublishPacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Ping(_) => PacketKind::Ping,
            Packet::Notify(_) => PacketKind::Notify,
            Packet::Http(_) => PacketKind::Http,
            Packet::Subscribe(_) => PacketKind::Subscribe,
            Packet::Unsubscribe(_) => PacketKind::Unsubscribe,
            Packet::Publish(_) => PacketKind::Publish,
        }
    }

    pub fn flags(&self) -> PacketFlags {
        match self {
            Packet::Ping(p) => p.flags,
            Packet::Notify(p) => p.flags,
            Packet::Http(p) => p.flags,
            Packet::Subscribe(p) => p.flags,
            Packet::Unsubscribe(p) => p.flags,
            Packet::Publish(p) => p.flags,
        }
    }

    /// The application message carried after the variable head.
    pub fn body(&self) -> &[u8] {
        match self {
            Packet::Ping(p) => &p.body,
            Packet::Notify(p) => &p.body,
            Packet::Http(p) => &p.body,
            Packet::Subscribe(p) => &p.body,
            Packet::Unsubscribe(p) => &p.body,
            Packet::Publish(p) => &p.body,
        }
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        match self {
            Packet::Ping(p) => p.body = body,
            Packet::Notify(p) => p.body = body,
            Packet::Http(p) => p.body = body,
            Packet::Subscribe(p) => p.body = body,
            Packet::Unsubscribe(p) => p.body = body,
            Packet::Publish(p) => p.body = body,
        }
    }

    /// Size of the variable head on the wire.
    pub fn head_size(&self) -> usize {
        match self {
            Packet::Ping(_) => 0,
            Packet::Notify(p) => p.head.head_size(),
            Packet::Http(p) => p.head.head_size(),
            Packet::Subscribe(p) => p.head.head_size(),
            Packet::Unsubscribe(p) => p.head.head_size(),
            Packet::Publish(p) => p.head.head_size(),
        }
    }

    pub(crate) fn encode_head<O: ByteOrder>(&self, w: &mut ByteWriter<'_, O>) {
        match self {
            Packet::Ping(_) => {}
            Packet::Notify(p) => p.head.encode(w),
            Packet::Http(p) => p.head.encode(w),
            Packet::Subscribe(p) => p.head.encode(w),
            Packet::Unsubscribe(p) => p.head.encode(w),
            Packet::Publish(p) => p.head.encode(w),
        }
    }

    pub(crate) fn decode_head<O: ByteOrder>(
        &mut self,
        r: &mut ByteReader<'_, O>,
        registry: &PropRegistry,
    ) -> Result<(), Error> {
        match self {
            Packet::Ping(_) => Ok(()),
            Packet::Notify(p) => p.head.decode(r, registry),
            Packet::Http(p) => p.head.decode(r, registry),
            Packet::Subscribe(p) => p.head.decode(r, registry),
            Packet::Unsubscribe(p) => p.head.decode(r, registry),
            Packet::Publish(p) => p.head.decode(r, registry),
        }
    }

    /// The shared data head, for every kind that carries one.
    pub fn data_head(&self) -> Option<&NotifyHead> {
        match self {
            Packet::Ping(_) => None,
            Packet::Notify(p) => Some(&p.head),
            Packet::Http(p) => Some(&p.head.notify),
            Packet::Subscribe(p) => Some(&p.head.notify),
            Packet::Unsubscribe(p) => Some(&p.head.notify),
            Packet::Publish(p) => Some(&p.head.notify),
        }
    }

    pub fn data_head_mut(&mut self) -> Option<&mut NotifyHead> {
        match self {
            Packet::Ping(_) => None,
            Packet::Notify(p) => Some(&mut p.head),
            Packet::Http(p) => Some(&mut p.head.notify),
            Packet::Subscribe(p) => Some(&mut p.head.notify),
            Packet::Unsubscribe(p) => Some(&mut p.head.notify),
            Packet::Publish(p) => Some(&mut p.head.notify),
        }
    }

    /// The request/response sequence id, for the kinds that carry one.
    pub fn seq_id(&self) -> Option<u16> {
        match self {
            Packet::Http(p) => Some(p.head.seq_id),
            Packet::Subscribe(p) => Some(p.head.seq_id),
            Packet::Unsubscribe(p) => Some(p.head.seq_id),
            _ => None,
        }
    }

    /// The properties of the data head, for every kind that carries one.
    pub fn props(&self) -> Option<&Props> {
        self.data_head().map(|h| &h.props)
    }

    pub fn props_mut(&mut self) -> Option<&mut Props> {
        self.data_head_mut().map(|h| &mut h.props)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Ping(p) if p.is_pong() => write!(f, "Pong"),
            Packet::Ping(_) => write!(f, "Ping"),
            Packet::Notify(p) => write!(f, "Notify:{}:{}", p.head.cmd, p.head.version),
            Packet::Http(p) => {
                write!(f, "Http:{}:{}", p.head.notify.cmd, p.head.notify.version)
            }
            Packet::Subscribe(p) => {
                write!(f, "Subscribe:{}:{}", p.head.notify.cmd, p.head.notify.version)
            }
            Packet::Unsubscribe(p) => write!(
                f,
                "Unsubscribe:{}:{}",
                p.head.notify.cmd, p.head.notify.version
            ),
            Packet::Publish(p) => {
                write!(f, "Publish:{}:{}", p.head.notify.cmd, p.head.notify.version)
            }
        }
    }
}

impl From<PingPacket> for Packet {
    fn from(p: PingPacket) -> Self {
        Packet::Ping(p)
    }
}

impl From<NotifyPacket> for Packet {
    fn from(p: NotifyPacket) -> Self {
        Packet::Notify(p)
    }
}

impl From<HttpPacket> for Packet {
    fn from(p: HttpPacket) -> Self {
        Packet::Http(p)
    }
}

impl From<SubscribePacket> for Packet {
    fn from(p: SubscribePacket) -> Self {
        Packet::Subscribe(p)
    }
}

impl From<UnsubscribePacket> for Packet {
    fn from(p: UnsubscribePacket) -> Self {
        Packet::Unsubscribe(p)
    }
}

impl From<PublishPacket> for Packet {
    fn from(p: PublishPacket) -> Self {
        Packet::Publish(p)
    }
}

/// Builds an empty packet of the registered shape for a wire kind and flags.
pub type PacketCreator = fn(PacketFlags) -> Packet;

/// Lookup tables the decoder resolves wire bytes through.
///
/// A registry is populated before any connection worker starts and is read
/// without locks afterwards; registering a kind or property twice is a
/// programming error and panics.
#[derive(Debug, Clone)]
pub struct Registry {
    creators: [Option<PacketCreator>; 16],
    props: PropRegistry,
}

impl Registry {
    /// A registry with nothing registered, for fully custom packet sets.
    pub fn empty() -> Self {
        Self {
            creators: [None; 16],
            props: PropRegistry::empty(),
        }
    }

    pub fn register_packet(&mut self, kind: PacketKind, creator: PacketCreator) {
        let idx = kind as usize;
        if self.creators[idx].is_some() {
            panic!("packet kind '{kind:?}' is already registered");
        }
        self.creators[idx] = Some(creator);
    }

    pub fn register_prop(&mut self, id: PropId, kind: PropKind) {
        self.props.register(id, kind);
    }

    /// The value shape registered for a property id.
    pub fn prop_kind(&self, id: PropId) -> Result<PropKind, Error> {
        self.props.kind(id)
    }

    /// Instantiates an empty packet for a kind byte read off the wire.
    pub fn create_packet(&self, kind: u8, flags: PacketFlags) -> Result<Packet, Error> {
        let creator = self
            .creators
            .get(kind as usize)
            .copied()
            .flatten()
            .ok_or(Error::InvalidPktKind)?;
        Ok(creator(flags))
    }

    pub fn props(&self) -> &PropRegistry {
        &self.props
    }
}

impl Default for Registry {
    /// The built-in packet kinds and properties.
    fn default() -> Self {
        let mut reg = Self::empty();
        reg.register_packet(PacketKind::Ping, |flags| {
            Packet::Ping(PingPacket {
                flags,
                body: Vec::new(),
            })
        });
        reg.register_packet(PacketKind::Notify, |flags| {
            Packet::Notify(NotifyPacket {
                flags,
                head: NotifyHead::default(),
                body: Vec::new(),
            })
        });
        reg.register_packet(PacketKind::Http, |flags| {
            Packet::Http(HttpPacket {
                flags,
                head: HttpHead::default(),
                body: Vec::new(),
            })
        });
        reg.register_packet(PacketKind::Subscribe, |flags| {
            Packet::Subscribe(SubscribePacket {
                flags,
                head: HttpHead::default(),
                body: Vec::new(),
            })
        });
        reg.register_packet(PacketKind::Unsubscribe, |flags| {
            Packet::Unsubscribe(UnsubscribePacket {
                flags,
                head: HttpHead::default(),
                body: Vec::new(),
            })
        });
        reg.register_packet(PacketKind::Publish, |flags| {
            Packet::Publish(PublishPacket {
                flags,
                head: PubHead::default(),
                body: Vec::new(),
            })
        });
        reg.props = PropRegistry::default();
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::super::props::PROP_SUB_ID;
    use super::*;

    #[test]
    fn flags_membership() {
        let flags = PacketFlags::NONE.with(PacketFlags::PONG);
        assert!(flags.has(PacketFlags::PONG));
        assert!(flags.has(PacketFlags::NONE));
        assert!(!PacketFlags::NONE.has(PacketFlags::PONG));
    }

    #[test]
    fn descriptions() {
        assert_eq!(Packet::from(PingPacket::new()).to_string(), "Ping");
        assert_eq!(Packet::from(PingPacket::pong()).to_string(), "Pong");
        let p = Packet::from(NotifyPacket::new(1000, Vec::new()).with_version(2, 0));
        assert_eq!(p.to_string(), "Notify:1000:2");
        let p = Packet::from(PublishPacket::new("t", 7, Vec::new()));
        assert_eq!(p.to_string(), "Publish:7:0");
    }

    #[test]
    fn registry_resolves_registered_kinds() {
        let reg = Registry::default();
        let p = reg
            .create_packet(PacketKind::Subscribe as u8, PacketFlags::NONE)
            .unwrap();
        assert_eq!(p.kind(), PacketKind::Subscribe);
        assert_eq!(p.head_size(), 7);

        let p = reg.create_packet(PacketKind::Ping as u8, PacketFlags::PONG).unwrap();
        assert!(p.flags().has(PacketFlags::PONG));
    }

    #[test]
    fn registry_rejects_unknown_kind() {
        let reg = Registry::default();
        assert!(matches!(
            reg.create_packet(0x0f, PacketFlags::NONE),
            Err(Error::InvalidPktKind)
        ));
        assert!(matches!(
            reg.create_packet(0, PacketFlags::NONE),
            Err(Error::InvalidPktKind)
        ));
    }

    #[test]
    fn registry_resolves_prop_kinds() {
        let reg = Registry::default();
        assert!(matches!(reg.prop_kind(PROP_SUB_ID), Ok(PropKind::U16)));
        assert!(matches!(reg.prop_kind(0xEE), Err(Error::InvalidPropId)));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_kind_registration_panics() {
        let mut reg = Registry::default();
        reg.register_packet(PacketKind::Ping, |flags| {
            Packet::Ping(PingPacket {
                flags,
                body: Vec::new(),
            })
        });
    }

    #[test]
    fn seq_id_only_on_request_response_kinds() {
        assert_eq!(Packet::from(HttpPacket::new(9, 1, Vec::new())).seq_id(), Some(9));
        assert_eq!(Packet::from(NotifyPacket::new(1, Vec::new())).seq_id(), None);
        assert_eq!(Packet::from(PingPacket::new()).seq_id(), None);
    }
}
