//! Opening the direct peer transport after a successful rendezvous.
//!
//! The server's answer decides the role: the opener (`is_client`) dials,
//! the listener binds and accepts exactly one connection. Both sides get
//! the same budget, [`ClientConfig::handoff_timeout`].

use std::time::Duration;

use parley_protocol::Rendezvous;
use parley_transport::{
    Transport, TransportError, WebSocketConnection, WebSocketTransport,
};
use tokio::time::Instant;

use crate::{ClientConfig, ClientError};

const DIAL_RETRY: Duration = Duration::from_millis(100);

/// Connects to the partner described by `rendezvous`.
pub(crate) async fn open_peer(
    rendezvous: &Rendezvous,
    config: &ClientConfig,
) -> Result<WebSocketConnection, ClientError> {
    if rendezvous.is_client {
        let host = if rendezvous.address.is_empty() {
            config.peer_host.as_str()
        } else {
            rendezvous.address.as_str()
        };
        dial(&format!("{host}:{}", rendezvous.port), config.handoff_timeout)
            .await
    } else {
        listen(rendezvous.port, config.handoff_timeout).await
    }
}

/// Finds a port nothing is listening on, for announcing as our direct
/// chat port. The socket is released before returning.
pub(crate) async fn reserve_port() -> Result<u16, ClientError> {
    let socket = tokio::net::TcpListener::bind("0.0.0.0:0")
        .await
        .map_err(TransportError::AcceptFailed)?;
    let port = socket.local_addr().map_err(TransportError::AcceptFailed)?.port();
    Ok(port)
}

/// Dials until the listener is up or the deadline passes.
async fn dial(
    addr: &str,
    budget: Duration,
) -> Result<WebSocketConnection, ClientError> {
    let deadline = Instant::now() + budget;
    loop {
        match WebSocketConnection::connect(addr).await {
            Ok(conn) => {
                tracing::info!(%addr, "peer connected");
                return Ok(conn);
            }
            Err(e) if Instant::now() + DIAL_RETRY < deadline => {
                tracing::debug!(%addr, error = %e, "peer not ready, retrying");
                tokio::time::sleep(DIAL_RETRY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn listen(
    port: u16,
    budget: Duration,
) -> Result<WebSocketConnection, ClientError> {
    let mut transport = WebSocketTransport::bind(&format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "waiting for peer");

    match tokio::time::timeout(budget, transport.accept()).await {
        Ok(conn) => Ok(conn?),
        Err(_) => Err(TransportError::ConnectionClosed(format!(
            "no peer connected on port {port}"
        ))
        .into()),
    }
}
