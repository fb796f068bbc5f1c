//! Middleware routing: handler chains composed per packet kind and message
//! id, dispatched with a per-request [`Context`].
//!
//! A chain is one flat list split by a recorded index into a "heads" prefix
//! and a "tails" suffix. [`Router::use_before`] grows the prefix,
//! [`Router::use_after`] grows the suffix, so later registrations can land
//! either side of everything registered so far, at both the router and the
//! per-kind level. For every route the final chain is
//! `center_heads ++ group_heads ++ route_handler ++ group_tails ++
//! center_tails`.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use super::context::{Context, Handler, ABORT_INDEX};
use crate::conn::QueueConn;
use crate::protocol::{Packet, PacketKind};

type MsgFactory = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// The id a packet's route is looked up under.
///
/// Pings route as `"ping"`. Data packets route by command, qualified with
/// the version and codec whenever either is non-zero.
pub fn gen_msg_id(p: &Packet) -> String {
    match p.data_head() {
        None => "ping".to_string(),
        Some(h) if h.version == 0 && h.codec == 0 => h.cmd.to_string(),
        Some(h) => format!("{}-{}-{}", h.cmd, h.version, h.codec),
    }
}

/// A registered terminal route: its composed chain and the factory for the
/// typed message a dispatch decodes into.
pub struct Route {
    handlers: Arc<[Handler]>,
    msg_factory: Option<MsgFactory>,
}

impl Route {
    /// The fully composed handler chain for this route.
    pub fn handlers(&self) -> &Arc<[Handler]> {
        &self.handlers
    }
}

/// The process-wide routing table. Built once at startup, then read-only
/// during dispatch.
#[derive(Default)]
pub struct Router {
    handlers: Vec<Handler>,
    heads_num: usize,
    groups: HashMap<PacketKind, RouterGroup>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler that runs before every group's own handlers. It lands
    /// after previously added heads and before any tails.
    pub fn use_before(&mut self, h: impl Fn(&mut Context) + Send + Sync + 'static) -> &mut Self {
        check_chain_len(self.handlers.len() + 1);
        self.handlers.insert(self.heads_num, Arc::new(h));
        self.heads_num += 1;
        self
    }

    /// Adds a handler that runs after every group's own handlers.
    pub fn use_after(&mut self, h: impl Fn(&mut Context) + Send + Sync + 'static) -> &mut Self {
        check_chain_len(self.handlers.len() + 1);
        self.handlers.push(Arc::new(h));
        self
    }

    /// Creates (or replaces) the group routing packets of `kind`,
    /// snapshotting the current router-level chain around it.
    pub fn group(&mut self, kind: PacketKind) -> &mut RouterGroup {
        let group = RouterGroup {
            kind,
            handlers: self.handlers[..self.heads_num].to_vec(),
            heads_num: self.heads_num,
            center_tails: self.handlers[self.heads_num..].to_vec(),
            routes: HashMap::new(),
        };
        match self.groups.entry(kind) {
            Entry::Occupied(mut e) => {
                e.insert(group);
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(group),
        }
    }

    /// Looks up the route for a kind and message id.
    pub fn get(&self, kind: PacketKind, msg_id: &str) -> Option<&Route> {
        self.groups.get(&kind)?.routes.get(msg_id)
    }

    /// Dispatches `pkt` through its route's chain. Returns whether a route
    /// was found.
    pub fn dispatch(&self, conn: &QueueConn, pkt: Packet) -> bool {
        let msg_id = gen_msg_id(&pkt);
        let Some(route) = self.get(pkt.kind(), &msg_id) else {
            tracing::debug!(kind = ?pkt.kind(), msg_id = %msg_id, "no route for packet");
            return false;
        };
        let msg = route.msg_factory.as_ref().map(|new_msg| new_msg());
        let mut ctx = Context::new(conn.clone(), pkt, msg, route.handlers.clone());
        ctx.next();
        true
    }
}

/// Routes for one packet kind, with its own heads/tails chain wrapped
/// inside the router-level chain captured at group creation.
pub struct RouterGroup {
    kind: PacketKind,
    handlers: Vec<Handler>,
    heads_num: usize,
    center_tails: Vec<Handler>,
    routes: HashMap<String, Route>,
}

impl RouterGroup {
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Adds a handler that runs before this group's routes. It lands after
    /// previously added heads and before any tails.
    pub fn use_before(&mut self, h: impl Fn(&mut Context) + Send + Sync + 'static) -> &mut Self {
        check_chain_len(self.chain_len() + 1);
        self.handlers.insert(self.heads_num, Arc::new(h));
        self.heads_num += 1;
        self
    }

    /// Adds a handler that runs after this group's routes.
    pub fn use_after(&mut self, h: impl Fn(&mut Context) + Send + Sync + 'static) -> &mut Self {
        check_chain_len(self.chain_len() + 1);
        self.handlers.push(Arc::new(h));
        self
    }

    /// Registers a terminal route for `msg_id`.
    pub fn handle(
        &mut self,
        msg_id: &str,
        h: impl Fn(&mut Context) + Send + Sync + 'static,
    ) -> &mut Self {
        self.add_route(msg_id.to_string(), None, Arc::new(h))
    }

    /// Registers a terminal route whose dispatches carry a fresh `M` for
    /// the chain to decode into.
    pub fn handle_msg<M, F>(&mut self, msg_id: &str, h: F) -> &mut Self
    where
        M: Default + Any + Send,
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        let factory: MsgFactory = Arc::new(|| Box::<M>::default());
        self.add_route(msg_id.to_string(), Some(factory), Arc::new(h))
    }

    fn chain_len(&self) -> usize {
        self.handlers.len() + self.center_tails.len()
    }

    fn add_route(&mut self, msg_id: String, msg_factory: Option<MsgFactory>, h: Handler) -> &mut Self {
        let total = self.chain_len() + 1;
        check_chain_len(total);
        let mut chain = Vec::with_capacity(total);
        chain.extend_from_slice(&self.handlers[..self.heads_num]);
        chain.push(h);
        chain.extend_from_slice(&self.handlers[self.heads_num..]);
        chain.extend_from_slice(&self.center_tails);
        self.routes.insert(
            msg_id,
            Route {
                handlers: chain.into(),
                msg_factory,
            },
        );
        self
    }
}

fn check_chain_len(len: usize) {
    if len >= ABORT_INDEX as usize {
        panic!("too many handlers");
    }
}
