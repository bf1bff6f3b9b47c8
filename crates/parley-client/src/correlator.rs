//! Request correlation over one transport.
//!
//! A [`Correlator`] owns the only reader of its connection: a background
//! task that sorts every incoming record into one of two piles.
//!
//! ```text
//!                       ┌─ Reply with a known ID ──→ wakes that request()
//!   conn.recv() ──→ ────┤
//!                       └─ Command (no/unknown ID) ─→ PushEvent channel
//! ```
//!
//! Callers write directly to the connection; only reads go through the
//! task. IDs are per correlator and strictly increasing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parley_protocol::{
    Codec, Envelope, Inbound, JsonCodec, PeerCommand, RequestId, Response,
};
use parley_transport::{Connection, WebSocketConnection};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::ClientError;

/// Something that arrived without being asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A chat line, or a system notice when `username` is empty.
    Message { username: String, message: String },
    /// The peer left a direct chat.
    PeerQuit,
    /// The transport closed or failed.
    Closed,
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<RequestId, oneshot::Sender<Response>>,
    /// Set once the receiver has stopped reading on its own: new requests
    /// fail fast.
    closed: bool,
    /// System notices (`username: ""`) received so far.
    notices: u64,
}

type SharedPending = Arc<Mutex<Pending>>;

fn lock(pending: &SharedPending) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Matches responses to requests on a single connection.
pub struct Correlator {
    conn: Arc<WebSocketConnection>,
    codec: JsonCodec,
    pending: SharedPending,
    next_id: AtomicU64,
    timeout: Duration,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Correlator {
    /// Starts the receiver task on `conn`. Pushes go to `events`.
    pub fn start(
        conn: Arc<WebSocketConnection>,
        events: mpsc::UnboundedSender<PushEvent>,
        timeout: Duration,
    ) -> Self {
        let pending = SharedPending::default();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(receive_loop(
            Arc::clone(&conn),
            Arc::clone(&pending),
            events,
            stopped,
        ));

        Self {
            conn,
            codec: JsonCodec,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            stop,
            task,
        }
    }

    /// Sends `body` under a fresh ID and waits for the matching response.
    ///
    /// # Errors
    /// - [`ClientError::RequestTimeout`] if nothing matched in time. The
    ///   waiter is removed; a late response is dropped.
    /// - [`ClientError::ConnectionClosed`] if the receiver is gone.
    pub async fn request<T: Serialize>(
        &self,
        body: T,
    ) -> Result<Response, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = self.codec.encode(&Envelope::request(id, body))?;

        // Registered before sending so a fast reply can't slip past.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(ClientError::ConnectionClosed);
            }
            pending.waiters.insert(id, tx);
        }

        if let Err(e) = self.conn.send(&bytes).await {
            self.forget(id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.forget(id);
                tracing::debug!(id, "request timed out");
                Err(ClientError::RequestTimeout(id))
            }
        }
    }

    /// Sends `body` without an ID and without waiting for anything.
    pub async fn notify<T: Serialize>(&self, body: T) -> Result<(), ClientError> {
        let bytes = self.codec.encode(&Envelope::push(body))?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    /// Requests still waiting for a response.
    pub fn pending(&self) -> usize {
        lock(&self.pending).waiters.len()
    }

    /// True once the receiver has exited on its own (peer quit, close,
    /// or transport error).
    pub fn is_finished(&self) -> bool {
        lock(&self.pending).closed || self.task.is_finished()
    }

    /// How many system notices this receiver has passed on.
    pub fn notices(&self) -> u64 {
        lock(&self.pending).notices
    }

    pub fn connection(&self) -> &Arc<WebSocketConnection> {
        &self.conn
    }

    /// Stops the receiver and waits for it to exit.
    ///
    /// The connection stays open and is handed back, so another
    /// correlator can take over reading it.
    pub async fn stop(self) -> Arc<WebSocketConnection> {
        // Err means the task already exited.
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "receiver task panicked");
        }
        self.conn
    }

    fn forget(&self, id: RequestId) {
        lock(&self.pending).waiters.remove(&id);
    }
}

async fn receive_loop(
    conn: Arc<WebSocketConnection>,
    pending: SharedPending,
    events: mpsc::UnboundedSender<PushEvent>,
    mut stopped: oneshot::Receiver<()>,
) {
    let conn_id = conn.id();
    loop {
        let received = tokio::select! {
            _ = &mut stopped => {
                tracing::debug!(%conn_id, "receiver stopped");
                return;
            }
            received = conn.recv() => received,
        };

        let data = match received {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::info!(%conn_id, "connection closed");
                shut_down(&pending, &events);
                return;
            }
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "receive failed");
                shut_down(&pending, &events);
                return;
            }
        };

        let inbound: Inbound = match JsonCodec.decode(&data) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "ignoring malformed record");
                continue;
            }
        };

        match inbound {
            Inbound::Reply(Envelope { id, body }) => {
                let waiter = id.and_then(|id| lock(&pending).waiters.remove(&id));
                match waiter {
                    // The caller may have just timed out; nothing to do.
                    Some(waiter) => {
                        let _ = waiter.send(body);
                    }
                    None => {
                        tracing::debug!(%conn_id, ?id, "response for unknown request")
                    }
                }
            }
            Inbound::Command(Envelope { id, body }) => {
                if let Some(id) = id {
                    acknowledge(&conn, id).await;
                }
                match body {
                    PeerCommand::Message { username, message } => {
                        // Counted before the event goes out, so whoever
                        // sees the event also sees the count.
                        if username.is_empty() {
                            lock(&pending).notices += 1;
                        }
                        let _ = events.send(PushEvent::Message { username, message });
                    }
                    PeerCommand::Quit => {
                        tracing::info!(%conn_id, "peer quit");
                        close_pending(&pending);
                        let _ = events.send(PushEvent::PeerQuit);
                        return;
                    }
                }
            }
        }
    }
}

/// Answers a peer's request with a correlated `success`.
async fn acknowledge(conn: &WebSocketConnection, id: RequestId) {
    let reply = Envelope::request(id, Response::success());
    let sent = match JsonCodec.encode(&reply) {
        Ok(bytes) => conn.send(&bytes).await.map_err(ClientError::from),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = sent {
        tracing::debug!(conn_id = %conn.id(), id, error = %e, "ack failed");
    }
}

/// Fails every outstanding request and refuses new ones.
fn close_pending(pending: &SharedPending) {
    let mut pending = lock(pending);
    pending.closed = true;
    // Dropping the senders wakes each waiter with ConnectionClosed.
    pending.waiters.clear();
}

fn shut_down(pending: &SharedPending, events: &mpsc::UnboundedSender<PushEvent>) {
    close_pending(pending);
    let _ = events.send(PushEvent::Closed);
}
