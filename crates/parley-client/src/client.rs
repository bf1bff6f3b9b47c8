//! The client controller: the operations a chat front end calls.
//!
//! ```text
//!   dial ──→ register/login ──→ advertise ──→ connect(target)
//!                                                  │
//!                          ┌───── Relay ───────────┴────── Direct ─────┐
//!                          ▼                                           ▼
//!              send/quit through the server          stop server correlator,
//!                                                     open peer transport,
//!                                                     send/quit to the peer
//!                                                           │ quit / peer gone
//!                                                           ▼
//!                                                 restart server correlator
//! ```

use std::sync::Arc;
use std::time::Duration;

use parley_protocol::{
    Credentials, FailureKind, PeerCommand, ProtocolError, Rendezvous,
    Response, ServerCommand,
};
use parley_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::correlator::{Correlator, PushEvent};
use crate::error::accepted;
use crate::handoff::{open_peer, reserve_port};
use crate::ClientError;

/// How a paired client carries its chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffMode {
    /// Open a direct transport to the partner.
    Direct,
    /// Stay on the server connection and let the server relay.
    Relay,
}

/// Client tunables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long any single request waits for its response.
    ///
    /// Default: 60 seconds. A `connect` may legitimately wait as long as
    /// the server's rendezvous timeout, so keep this at least as long.
    pub request_timeout: Duration,

    /// Default: [`HandoffMode::Direct`].
    pub handoff: HandoffMode,

    /// Port to announce for direct chats. With [`HandoffMode::Direct`],
    /// `None` picks a free port at dial time; in relay mode it is left
    /// unset.
    pub peer_port: Option<u16>,

    /// Budget for establishing the direct transport. Default: 10 seconds.
    pub handoff_timeout: Duration,

    /// Host the opener dials when a server leaves its address blank.
    /// Parley servers always fill it in, so this only matters against
    /// servers that don't. Default: `127.0.0.1`.
    pub peer_host: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            handoff: HandoffMode::Direct,
            peer_port: None,
            handoff_timeout: Duration::from_secs(10),
            peer_host: "127.0.0.1".to_string(),
        }
    }
}

/// The active conversation.
struct Chat {
    partner: String,
    /// Present for direct chats: reads the peer transport.
    peer: Option<Correlator>,
    /// Server notices seen when a relay chat began. A later notice means
    /// the partner quit or disconnected.
    notices: u64,
}

/// A connected chat client.
pub struct Client {
    config: ClientConfig,
    server: Arc<WebSocketConnection>,
    /// Reads the server connection. `None` while a direct chat owns the
    /// reading side.
    correlator: Option<Correlator>,
    credentials: Option<Credentials>,
    chat: Option<Chat>,
    events: mpsc::UnboundedSender<PushEvent>,
}

impl Client {
    /// Connects to a server. Unsolicited records arrive on the returned
    /// receiver.
    pub async fn dial(
        addr: &str,
        mut config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PushEvent>), ClientError> {
        // The server would otherwise hand out the port of this very
        // connection, which nobody can listen on.
        if config.handoff == HandoffMode::Direct && config.peer_port.is_none() {
            let port = reserve_port().await?;
            tracing::debug!(port, "reserved port for direct chats");
            config.peer_port = Some(port);
        }
        let server = Arc::new(WebSocketConnection::connect(addr).await?);
        let (events, receiver) = mpsc::unbounded_channel();
        let correlator = Correlator::start(
            Arc::clone(&server),
            events.clone(),
            config.request_timeout,
        );
        tracing::info!(%addr, conn_id = %server.id(), "connected to server");

        let client = Self {
            config,
            server,
            correlator: Some(correlator),
            credentials: None,
            chat: None,
            events,
        };
        Ok((client, receiver))
    }

    /// The logged-in username.
    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username.as_str())
    }

    /// The current chat partner, or `None` once the chat has ended on the
    /// other side.
    pub fn partner(&self) -> Option<&str> {
        self.chat
            .as_ref()
            .filter(|c| !self.chat_ended(c))
            .map(|c| c.partner.as_str())
    }

    /// True while a direct peer transport is carrying the chat.
    pub fn is_direct(&self) -> bool {
        self.chat.as_ref().is_some_and(|c| c.peer.is_some())
    }

    pub async fn register(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        self.settle().await;
        let command =
            ServerCommand::Register(Credentials::new(username, password));
        self.server_request(command).await?;
        Ok(())
    }

    /// Logs in. Later requests reuse these credentials.
    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        self.settle().await;
        let credentials = Credentials::new(username, password);
        self.server_request(ServerCommand::Login(credentials.clone()))
            .await?;
        tracing::info!(%username, "logged in");
        self.credentials = Some(credentials);
        Ok(())
    }

    /// Becomes visible and returns the other visible users.
    pub async fn advertise(&mut self) -> Result<Vec<String>, ClientError> {
        self.settle().await;
        let command = ServerCommand::Advertise {
            credentials: self.credentials()?,
            port: self.config.peer_port,
        };
        let response = self.server_request(command).await?;
        Ok(response.users.unwrap_or_default())
    }

    /// Asks to chat with `target` and, once both sides agree, switches to
    /// the configured handoff mode.
    pub async fn connect(
        &mut self,
        target: &str,
    ) -> Result<Rendezvous, ClientError> {
        self.settle().await;
        if let Some(chat) = &self.chat {
            return Err(ClientError::ChatActive(chat.partner.clone()));
        }
        let command = ServerCommand::Connect {
            credentials: self.credentials()?,
            target: target.to_string(),
            port: self.config.peer_port,
        };
        let rendezvous =
            self.server_request(command).await?.rendezvous.ok_or_else(|| {
                ProtocolError::InvalidMessage(
                    "connect response without rendezvous".into(),
                )
            })?;
        tracing::info!(
            %target,
            is_client = rendezvous.is_client,
            port = rendezvous.port,
            "paired"
        );

        let peer = match self.config.handoff {
            HandoffMode::Relay => None,
            HandoffMode::Direct => Some(self.hand_off(&rendezvous).await?),
        };
        let notices = self.correlator.as_ref().map_or(0, Correlator::notices);
        self.chat = Some(Chat {
            partner: target.to_string(),
            peer,
            notices,
        });
        Ok(rendezvous)
    }

    /// Sends a chat line to the partner.
    pub async fn send(&mut self, text: &str) -> Result<(), ClientError> {
        self.settle().await;
        let credentials = self.credentials()?;
        let chat = self.chat.as_ref().ok_or(ClientError::NoChat)?;

        if let Some(peer) = &chat.peer {
            let line = PeerCommand::chat(credentials.username, text);
            accepted(peer.request(line).await?)?;
            return Ok(());
        }

        let command = ServerCommand::Message {
            credentials,
            message: text.to_string(),
            quit: false,
        };
        match self.server_request(command).await {
            Err(e) if e.kind() == Some(FailureKind::NoPartner) => {
                // The partner left; their notice is already queued.
                self.chat = None;
                Err(e)
            }
            result => result.map(|_| ()),
        }
    }

    /// Leaves the current chat.
    ///
    /// Always succeeds locally: the peer is told when possible and the
    /// client ends up back on the server connection either way.
    pub async fn quit(&mut self) -> Result<(), ClientError> {
        let chat = self.chat.as_ref().ok_or(ClientError::NoChat)?;
        if let Some(peer) = &chat.peer {
            if !peer.is_finished() {
                if let Err(e) = peer.request(PeerCommand::Quit).await {
                    tracing::debug!(error = %e, "peer did not acknowledge quit");
                }
            }
        }
        self.end_chat().await;
        Ok(())
    }

    /// Leaves any chat, tells the server we're done, and closes.
    pub async fn close(mut self) -> Result<(), ClientError> {
        if self.chat.is_some() {
            self.quit().await?;
        }
        if let Some(correlator) = self.correlator.take() {
            if let Err(e) = correlator.notify(ServerCommand::Close).await {
                tracing::debug!(error = %e, "close notice not sent");
            }
            correlator.stop().await;
        }
        // The server may already have hung up after `close`.
        if let Err(e) = self.server.close().await {
            tracing::debug!(error = %e, "server connection already closed");
        }
        Ok(())
    }

    /// Swaps the server correlator for one on a fresh peer transport.
    async fn hand_off(
        &mut self,
        rendezvous: &Rendezvous,
    ) -> Result<Correlator, ClientError> {
        if let Some(correlator) = self.correlator.take() {
            correlator.stop().await;
        }

        match open_peer(rendezvous, &self.config).await {
            Ok(conn) => {
                tracing::info!(peer = %conn.peer_addr(), "direct chat open");
                Ok(Correlator::start(
                    Arc::new(conn),
                    self.events.clone(),
                    self.config.request_timeout,
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, "handoff failed");
                self.resume_server();
                self.release_pairing().await;
                Err(e)
            }
        }
    }

    /// Drops a chat that has ended on the other side: a direct peer that
    /// went away, or a relay partner the server reported gone.
    async fn settle(&mut self) {
        let ended = self.chat.as_ref().is_some_and(|c| self.chat_ended(c));
        if ended {
            tracing::info!("partner left, returning to server");
            self.end_chat().await;
        }
    }

    fn chat_ended(&self, chat: &Chat) -> bool {
        match (&chat.peer, &self.correlator) {
            (Some(peer), _) => peer.is_finished(),
            (None, Some(server)) => server.notices() > chat.notices,
            (None, None) => false,
        }
    }

    async fn end_chat(&mut self) {
        let Some(chat) = self.chat.take() else {
            return;
        };
        if let Some(peer) = chat.peer {
            let conn = peer.stop().await;
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "peer close failed");
            }
            self.resume_server();
        }
        self.release_pairing().await;
        tracing::info!(partner = %chat.partner, "chat ended");
    }

    fn resume_server(&mut self) {
        if self.correlator.is_none() {
            self.correlator = Some(Correlator::start(
                Arc::clone(&self.server),
                self.events.clone(),
                self.config.request_timeout,
            ));
        }
    }

    /// Clears the pairing the server still holds for us. The partner may
    /// have done it already, so `NoPartner` is expected.
    async fn release_pairing(&mut self) {
        let Ok(credentials) = self.credentials() else {
            return;
        };
        let command = ServerCommand::Message {
            credentials,
            message: String::new(),
            quit: true,
        };
        if let Err(e) = self.server_request(command).await {
            tracing::debug!(error = %e, "server pairing already released");
        }
    }

    async fn server_request(
        &self,
        command: ServerCommand,
    ) -> Result<Response, ClientError> {
        let correlator = match &self.correlator {
            Some(correlator) => correlator,
            None => {
                let partner = self.partner().unwrap_or_default().to_string();
                return Err(ClientError::ChatActive(partner));
            }
        };
        accepted(correlator.request(command).await?)
    }

    fn credentials(&self) -> Result<Credentials, ClientError> {
        self.credentials.clone().ok_or(ClientError::NotLoggedIn)
    }
}
