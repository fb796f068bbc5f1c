//! Per-dispatch context: carries the connection, the packet and the decoded
//! message through a handler chain, with early-abort and skip-ahead
//! navigation.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::conn::QueueConn;
use crate::protocol::Packet;

/// Index value that parks the cursor past any legal chain. Chains are kept
/// shorter than this at registration time, so one comparison per step keeps
/// dispatch branchless.
pub(crate) const ABORT_INDEX: i8 = i8::MAX / 2;

/// One link of a handler chain.
pub type Handler = Arc<dyn Fn(&mut Context) + Send + Sync>;

/// Key for the per-request value store.
pub type Key = u32;

/// The state threaded through one packet dispatch.
pub struct Context {
    conn: QueueConn,
    /// The received packet. Handlers may rewrite its head fields and body
    /// in place, e.g. to turn a request into its response.
    pub pkt: Packet,
    /// The decoded application message, when the route registered one.
    pub msg: Option<Box<dyn Any + Send>>,
    index: i8,
    handlers: Arc<[Handler]>,
    // Lazily allocated: most dispatches never store a value.
    values: Option<HashMap<Key, Box<dyn Any + Send>>>,
}

impl Context {
    pub(crate) fn new(
        conn: QueueConn,
        pkt: Packet,
        msg: Option<Box<dyn Any + Send>>,
        handlers: Arc<[Handler]>,
    ) -> Self {
        Self {
            conn,
            pkt,
            msg,
            index: -1,
            handlers,
            values: None,
        }
    }

    /// The connection the packet arrived on.
    pub fn conn(&self) -> &QueueConn {
        &self.conn
    }

    /// Runs the pending handlers in the chain.
    pub fn next(&mut self) {
        self.index = self.index.saturating_add(1);
        while (self.index as usize) < self.handlers.len() {
            let handler = self.handlers[self.index as usize].clone();
            handler(self);
            self.index = self.index.saturating_add(1);
        }
    }

    /// Whether [`Context::abort`] was called during this dispatch.
    pub fn is_aborted(&self) -> bool {
        self.index >= ABORT_INDEX
    }

    /// Prevents every pending handler from running. The current handler
    /// keeps executing.
    pub fn abort(&mut self) {
        self.index = ABORT_INDEX;
    }

    /// Prevents the next pending handler from running.
    pub fn skip_next(&mut self) {
        self.skip_next_n(1);
    }

    /// Prevents the next `n` pending handlers from running.
    pub fn skip_next_n(&mut self, n: u8) {
        self.index = self.index.saturating_add_unsigned(n);
    }

    /// The decoded message downcast to its registered type.
    pub fn msg_as<M: Any>(&self) -> Option<&M> {
        self.msg.as_ref()?.downcast_ref()
    }

    pub fn msg_as_mut<M: Any>(&mut self) -> Option<&mut M> {
        self.msg.as_mut()?.downcast_mut()
    }

    /// Stores a value for later handlers in the same dispatch.
    pub fn set(&mut self, key: Key, value: impl Any + Send) {
        self.values
            .get_or_insert_with(HashMap::new)
            .insert(key, Box::new(value));
    }

    /// Reads back a value stored by an earlier handler.
    pub fn get<T: Any>(&self, key: Key) -> Option<&T> {
        self.values.as_ref()?.get(&key)?.downcast_ref()
    }
}
