use std::io;

use thiserror::Error;

/// Every fallible operation in this crate returns this error type.
///
/// Decode errors (`InvalidPktKind`, `InvalidPropId`, `DecodeBadPacket`) are
/// terminal for the connection that produced them: after a malformed frame
/// the stream position is indeterminate, so the workers never try to resync.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote peer sent a packet kind that is not registered.
    #[error("invalid packet kind")]
    InvalidPktKind,

    /// The remote peer sent a property id that is not registered.
    #[error("invalid property id")]
    InvalidPropId,

    /// A typed accessor ran past the end of the buffered frame.
    #[error("short buffer")]
    ShortBuffer,

    /// The remote peer sent an incorrect packet.
    #[error("decode bad packet")]
    DecodeBadPacket,

    /// The packet payload exceeds the configured maximum size.
    #[error("packet is too large")]
    PacketTooLarge,

    /// A send was attempted on a connection that has been closed.
    #[error("the connection has been closed")]
    ConnClosed,

    /// The outbound queue was full when a send was attempted.
    #[error("slow consumer detected")]
    SlowConsumer,

    /// The local peer actively closed the connection.
    #[error("local peer actively closed the connection")]
    ClosedActively,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
