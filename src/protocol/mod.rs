//! The wire protocol: binary cursors, typed properties, variable heads,
//! packet kinds, and the framing codec.

pub mod binary;
pub mod codec;
pub mod heads;
pub mod packet;
pub mod props;

pub use binary::{ByteReader, ByteWriter};
pub use codec::{Decoder, Encoder, FIXED_HEAD_LEN, MAX_PKT_SIZE};
pub use heads::{HttpHead, NotifyHead, PubHead};
pub use packet::{
    HttpPacket, NotifyPacket, Packet, PacketCreator, PacketFlags, PacketKind, PingPacket,
    PublishPacket, Registry, SubscribePacket, UnsubscribePacket,
};
pub use props::{
    PropId, PropKind, PropRegistry, PropValue, Props, PROP_CREATED_TIME, PROP_SUB_ID, PROP_TOPIC,
};
