//! A framed, typed packet protocol over stream sockets.
//!
//! Three layers build on each other:
//!
//! - [`protocol`] frames typed packets (ping, notify, http, subscribe,
//!   unsubscribe, publish) with a 3-byte fixed header, per-kind variable
//!   heads and a typed property bag.
//! - [`conn`] runs the codec over a stream: [`conn::EasyConn`] for direct
//!   deadline-bounded send/receive, [`conn::QueueConn`] for the queueing
//!   wrapper whose worker tasks decouple the application from socket I/O.
//! - [`route`] dispatches received packets through middleware handler
//!   chains keyed by packet kind and message id.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mizu::conn::{EasyConn, QueueConn};
//! use mizu::protocol::{PacketKind, PingPacket};
//! use mizu::route::Router;
//!
//! # async fn run() -> mizu::Result<()> {
//! let mut router = Router::new();
//! router.group(PacketKind::Ping).handle("ping", |ctx| {
//!     let _ = ctx.conn().send(PingPacket::pong().into());
//! });
//! let router = Arc::new(router);
//!
//! let conn = QueueConn::builder()
//!     .packet_handler(move |conn, pkt| {
//!         router.dispatch(conn, pkt);
//!     })
//!     .spawn(EasyConn::dial("127.0.0.1:8080").await?);
//! conn.send(PingPacket::new().into())?;
//! # Ok(())
//! # }
//! ```

pub mod conn;
pub mod error;
pub mod protocol;
pub mod route;

pub use error::{Error, Result};
