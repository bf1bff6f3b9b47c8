//! Per-connection handler: read, dispatch, reply.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task for pushes. The flow is:
//!   1. Create an anonymous `Session` with an outbound channel
//!   2. Loop: receive a record → decode → dispatch → send the response
//!   3. On close, a malformed record or a transport error, drop the
//!      session, which purges it from the directory
//!
//! Commands run one at a time, so a `connect` blocks this loop until it
//! resolves. Relays and notices from other sessions don't go through the
//! loop: the writer task delivers them meanwhile.

use std::sync::Arc;

use parley_protocol::{Codec, Envelope, PeerCommand, ServerCommand};
use parley_session::{CredentialStore, Session};
use parley_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::commands::{dispatch, Outcome};
use crate::server::ServerState;
use crate::ParleyError;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S, C>>,
) -> Result<(), ParleyError>
where
    S: CredentialStore,
    C: Codec,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let (outbound, pushes) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_pushes(
        Arc::clone(&conn),
        Arc::clone(&state),
        pushes,
    ));

    let mut session =
        Session::new(Arc::clone(&state.directory), conn.peer_addr(), outbound);
    let result = serve(&conn, &state, &mut session).await;

    // Leaves the directory and releases every outbound handle, which in
    // turn ends the writer.
    drop(session);
    if let Err(e) = writer.await {
        tracing::warn!(%conn_id, error = %e, "push writer panicked");
    }
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }

    tracing::info!(%conn_id, "session ended");
    result
}

async fn serve<S, C>(
    conn: &WebSocketConnection,
    state: &ServerState<S, C>,
    session: &mut Session,
) -> Result<(), ParleyError>
where
    S: CredentialStore,
    C: Codec,
{
    let conn_id = conn.id();

    loop {
        let Some(data) = conn.recv().await? else {
            tracing::info!(%conn_id, "connection closed cleanly");
            return Ok(());
        };

        // Unknown commands fail here too: the tag doesn't match any
        // variant.
        let request: Envelope<ServerCommand> = match state.codec.decode(&data)
        {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "malformed frame, closing");
                return Err(e.into());
            }
        };

        tracing::debug!(
            %conn_id,
            id = ?request.id,
            verb = request.body.verb(),
            "received command"
        );

        match dispatch(session, &state.credentials, request.body).await {
            Outcome::Reply(response) => {
                let reply = Envelope {
                    id: request.id,
                    body: response,
                };
                let bytes = state.codec.encode(&reply)?;
                conn.send(&bytes).await?;
            }
            Outcome::Close => {
                tracing::info!(
                    %conn_id,
                    username = session.identity().unwrap_or("-"),
                    "client closed session"
                );
                return Ok(());
            }
        }
    }
}

/// Delivers relayed messages and notices for one connection.
///
/// Ends when every sender is gone (the session and its directory entry)
/// or the connection stops accepting writes.
async fn write_pushes<S, C>(
    conn: Arc<WebSocketConnection>,
    state: Arc<ServerState<S, C>>,
    mut pushes: mpsc::UnboundedReceiver<PeerCommand>,
) where
    S: CredentialStore,
    C: Codec,
{
    while let Some(command) = pushes.recv().await {
        let bytes = match state.codec.encode(&Envelope::push(command)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(conn_id = %conn.id(), error = %e, "dropping push");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            tracing::warn!(conn_id = %conn.id(), error = %e, "push failed");
            break;
        }
    }
}
