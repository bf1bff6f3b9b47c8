//! `ParleyServer` builder and accept loop.
//!
//! This is the entry point for running a rendezvous server. It ties the
//! layers together: transport → protocol → session.

use std::sync::Arc;

use parley_protocol::{Codec, JsonCodec};
use parley_session::{CredentialStore, Directory, RendezvousConfig};
use parley_transport::{Connection, Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::ParleyError;

/// Shared server state passed to each connection task.
pub(crate) struct ServerState<S: CredentialStore, C: Codec> {
    pub(crate) directory: Arc<Directory>,
    pub(crate) credentials: S,
    pub(crate) codec: C,
}

/// Builder for configuring and starting a Parley server.
///
/// # Example
///
/// ```rust,no_run
/// use parley::prelude::*;
///
/// # async fn start() -> Result<(), ParleyError> {
/// let server = ParleyServer::builder()
///     .bind("0.0.0.0:2020")
///     .build(MemoryCredentials::new())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ParleyServerBuilder {
    bind_addr: String,
    rendezvous_config: RendezvousConfig,
}

impl ParleyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:2020".to_string(),
            rendezvous_config: RendezvousConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the rendezvous configuration.
    pub fn rendezvous_config(mut self, config: RendezvousConfig) -> Self {
        self.rendezvous_config = config;
        self
    }

    /// Binds the listener. Accounts are checked against `credentials`.
    ///
    /// Uses `JsonCodec` over `WebSocketTransport`.
    pub async fn build<S: CredentialStore>(
        self,
        credentials: S,
    ) -> Result<ParleyServer<S, JsonCodec>, ParleyError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let state = Arc::new(ServerState {
            directory: Arc::new(Directory::new(self.rendezvous_config)),
            credentials,
            codec: JsonCodec,
        });

        Ok(ParleyServer { transport, state })
    }
}

impl Default for ParleyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Parley server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct ParleyServer<S: CredentialStore, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, C>>,
}

impl ParleyServer<parley_session::MemoryCredentials, JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> ParleyServerBuilder {
        ParleyServerBuilder::new()
    }
}

impl<S, C> ParleyServer<S, C>
where
    S: CredentialStore,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The live session registry, for inspection.
    pub fn directory(&self) -> Arc<Directory> {
        Arc::clone(&self.state.directory)
    }

    /// Runs the accept loop.
    ///
    /// Spawns one handler task per connection. Runs until the process is
    /// terminated; a failed accept is logged and skipped.
    pub async fn run(mut self) -> Result<(), ParleyError> {
        tracing::info!(addr = ?self.local_addr().ok(), "Parley server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    tracing::info!(
                        conn_id = %conn.id(),
                        peer = %conn.peer_addr(),
                        "accepted connection"
                    );
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
