//! Queueing connection: decouples application sends from socket I/O with a
//! bounded outbound queue and a pair of worker tasks.
//!
//! A [`QueueConn`] owns two tasks for the life of the connection: the sender
//! drains the queue into the stream, the receiver decodes frames and feeds
//! the packet handler. Closing is a two-phase barrier: whichever worker
//! exits first records the cause, marks the connection closed and wakes the
//! other; the second one salvages any packets still queued and fires the
//! on-close callback exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use super::easy::{EasyConn, ReceiveHalf, SendHalf};
use crate::error::Error;
use crate::protocol::Packet;

pub const DEFAULT_SEND_QUEUE_SIZE: usize = 200;

/// Connection ids are allocated from one process-wide counter.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(0);

/// Called on the receiver worker for every decoded packet. A slow handler
/// blocks further reads on this connection.
pub type PacketHandler = Box<dyn FnMut(&QueueConn, Packet) + Send>;

/// Called at most once with the packets still queued when the connection
/// died. Packets already handed to the stream are not included.
pub type PendingPacketsHandler = Box<dyn FnOnce(Vec<Packet>) + Send>;

/// Called exactly once, after both workers have exited, with the first
/// error the connection observed.
pub type CloseHandler = Box<dyn FnOnce(&Error) + Send>;

/// An enqueued `None` is the close sentinel: the sender worker drains
/// everything queued ahead of it, then exits cleanly.
type QueueItem = Option<Packet>;

struct Shared {
    id: u64,
    closed: AtomicBool,
    done: AtomicBool,
    cause: Mutex<Option<Error>>,
    queue_tx: mpsc::Sender<QueueItem>,
    shutdown_tx: watch::Sender<bool>,
    // Handed back by the sender worker on exit so whichever worker ends up
    // running the second close phase can drain it.
    residual_rx: Mutex<Option<mpsc::Receiver<QueueItem>>>,
    pending_handler: Mutex<Option<PendingPacketsHandler>>,
    on_close: Mutex<Option<CloseHandler>>,
}

impl Shared {
    /// Records the first cause; later causes lose the race and are dropped.
    fn set_cause(&self, cause: Error) {
        let mut slot = self.cause.lock().unwrap();
        if slot.is_none() {
            *slot = Some(cause);
        }
    }

    /// The two-phase close barrier, run by each worker as it exits.
    fn complete(&self, cause: Option<Error>, read_side: bool) {
        if !self.done.swap(true, Ordering::AcqRel) {
            // First phase: record the cause, mark closed, and unblock the
            // peer worker's I/O.
            self.set_cause(cause.unwrap_or(Error::ClosedActively));
            self.closed.store(true, Ordering::Release);
            let _ = self.shutdown_tx.send(true);
            if read_side {
                // The sender may be parked on an empty queue; a sentinel
                // wakes it even when no shutdown poll is in flight.
                let _ = self.queue_tx.try_send(None);
            }
            return;
        }
        // Second phase: both workers are gone. Salvage whatever is still
        // queued, then report the close.
        if let Some(handler) = self.pending_handler.lock().unwrap().take() {
            let pending = self.drain_residual();
            if !pending.is_empty() {
                handler(pending);
            }
        }
        if let Some(on_close) = self.on_close.lock().unwrap().take() {
            let fallback = Error::ClosedActively;
            let guard = self.cause.lock().unwrap();
            let cause = guard.as_ref().unwrap_or(&fallback);
            tracing::debug!(id = self.id, %cause, "connection closed");
            on_close(cause);
        }
    }

    fn drain_residual(&self) -> Vec<Packet> {
        let Some(mut rx) = self.residual_rx.lock().unwrap().take() else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        while let Ok(item) = rx.try_recv() {
            match item {
                Some(p) => pending.push(p),
                None => break,
            }
        }
        pending
    }
}

/// A cloneable handle to a queueing connection.
///
/// `send`, `close` and `close_with` never block: they enqueue and return.
/// After a close, the handle stays observable through [`QueueConn::is_closed`]
/// but every send fails with [`Error::ConnClosed`].
#[derive(Clone)]
pub struct QueueConn {
    shared: Arc<Shared>,
}

impl QueueConn {
    /// Wraps `conn` with the default queue size and handlers.
    pub fn spawn<S>(conn: EasyConn<S>) -> QueueConn
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::builder().spawn(conn)
    }

    pub fn builder() -> QueueConnBuilder {
        QueueConnBuilder::new()
    }

    /// The process-unique id of this connection.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Enqueues `p` for the sender worker.
    ///
    /// Fails with [`Error::ConnClosed`] after a close. A full queue means
    /// the remote peer is not keeping up; the connection is closed on the
    /// spot and the send fails with [`Error::SlowConsumer`].
    pub fn send(&self, p: Packet) -> Result<(), Error> {
        self.push(Some(p))
    }

    /// Closes the connection after all queued packets are sent.
    pub fn close(&self) -> Result<(), Error> {
        let res = self.push(None);
        self.shared.closed.store(true, Ordering::Release);
        res
    }

    /// Closes the connection after `p` and all previously queued packets
    /// are sent.
    pub fn close_with(&self, p: Packet) -> Result<(), Error> {
        let _ = self.send(p);
        self.close()
    }

    fn push(&self, item: QueueItem) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::ConnClosed);
        }
        match self.shared.queue_tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                // Backpressure policy: a peer that cannot drain the queue
                // must not stall the application, so the connection dies.
                tracing::warn!(id = self.shared.id, "send queue full, closing connection");
                self.shared.set_cause(Error::SlowConsumer);
                self.shared.closed.store(true, Ordering::Release);
                let _ = self.shared.shutdown_tx.send(true);
                Err(Error::SlowConsumer)
            }
            Err(TrySendError::Closed(_)) => Err(Error::ConnClosed),
        }
    }
}

/// Configures and spawns a [`QueueConn`].
pub struct QueueConnBuilder {
    queue_size: usize,
    pkt_handler: Option<PacketHandler>,
    pending_handler: Option<PendingPacketsHandler>,
    on_close: Option<CloseHandler>,
}

impl QueueConnBuilder {
    pub fn new() -> Self {
        Self {
            queue_size: DEFAULT_SEND_QUEUE_SIZE,
            pkt_handler: None,
            pending_handler: None,
            on_close: None,
        }
    }

    /// Capacity of the outbound queue.
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    /// Handler invoked for every received packet.
    pub fn packet_handler(
        mut self,
        handler: impl FnMut(&QueueConn, Packet) + Send + 'static,
    ) -> Self {
        self.pkt_handler = Some(Box::new(handler));
        self
    }

    /// Handler invoked with the packets left in the queue when the
    /// connection dies.
    pub fn pending_packets(
        mut self,
        handler: impl FnOnce(Vec<Packet>) + Send + 'static,
    ) -> Self {
        self.pending_handler = Some(Box::new(handler));
        self
    }

    /// Callback invoked once both workers have exited.
    pub fn on_close(mut self, handler: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.on_close = Some(Box::new(handler));
        self
    }

    /// Wraps `conn`, spawning the sender and receiver workers.
    pub fn spawn<S>(self, conn: EasyConn<S>) -> QueueConn
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (send_half, recv_half) = conn.split();
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed) + 1,
            closed: AtomicBool::new(false),
            done: AtomicBool::new(false),
            cause: Mutex::new(None),
            queue_tx,
            shutdown_tx,
            residual_rx: Mutex::new(None),
            pending_handler: Mutex::new(self.pending_handler),
            on_close: Mutex::new(self.on_close),
        });
        let conn = QueueConn { shared };

        let handler = self.pkt_handler.unwrap_or_else(|| {
            Box::new(|conn: &QueueConn, p: Packet| {
                tracing::debug!(id = conn.id(), packet = %p, "received packet");
            })
        });

        tokio::spawn(send_loop(
            send_half,
            queue_rx,
            conn.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(receive_loop(recv_half, handler, conn.clone(), shutdown_rx));
        conn
    }
}

impl Default for QueueConnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn send_loop<S>(
    mut half: SendHalf<S>,
    mut queue: mpsc::Receiver<QueueItem>,
    conn: QueueConn,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut cause = None;
    loop {
        let next = tokio::select! {
            next = queue.recv() => next,
            _ = shutdown.changed() => break,
        };
        let Some(Some(p)) = next else {
            // The sentinel: everything queued ahead of it is on the wire.
            break;
        };
        let res = tokio::select! {
            res = half.send(&p) => res,
            _ = shutdown.changed() => break,
        };
        if let Err(e) = res {
            cause = Some(e);
            break;
        }
    }
    // Hand the queue back before entering the barrier so the second phase
    // can salvage it, whichever worker runs that phase.
    *conn.shared.residual_rx.lock().unwrap() = Some(queue);
    let _ = half.close().await;
    conn.shared.complete(cause, false);
}

async fn receive_loop<S>(
    mut half: ReceiveHalf<S>,
    mut handler: PacketHandler,
    conn: QueueConn,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut cause = None;
    loop {
        let res = tokio::select! {
            res = half.receive() => res,
            _ = shutdown.changed() => break,
        };
        match res {
            Ok(p) => handler(&conn, p),
            Err(e) => {
                cause = Some(e);
                break;
            }
        }
    }
    conn.shared.complete(cause, true);
}
