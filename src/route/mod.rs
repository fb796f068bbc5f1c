//! Packet routing: middleware chain composition and dispatch.

pub mod context;
pub mod router;

pub use context::{Context, Handler, Key};
pub use router::{gen_msg_id, Route, Router, RouterGroup};
