//! Connection layer: a direct codec-over-stream connection and the
//! queueing wrapper that runs it with worker tasks.

pub mod easy;
pub mod queue;

pub use easy::{
    EasyConn, ReceiveHalf, SendHalf, DEFAULT_DIAL_TIMEOUT, DEFAULT_READ_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT,
};
pub use queue::{
    CloseHandler, PacketHandler, PendingPacketsHandler, QueueConn, QueueConnBuilder,
    DEFAULT_SEND_QUEUE_SIZE,
};
