//! Core protocol types for Parley's wire format.
//!
//! Every record is a flat JSON object. Requests name their verb in a
//! `command` key; responses carry a `status`; anything that expects an
//! answer carries a caller-assigned `ID` that the answer echoes back.
//!
//! ```text
//! → {"command":"login","username":"alice","password":"pw","ID":1}
//! ← {"status":"success","ID":1}
//! ← {"command":"message","username":"bob","message":"hi"}      (push, no ID)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation ID assigned by the requesting side.
pub type RequestId = u64;

// ---------------------------------------------------------------------------
// Envelope: the correlation wrapper
// ---------------------------------------------------------------------------

/// A record plus its optional correlation ID.
///
/// `#[serde(flatten)]` merges the body's keys into the same JSON object as
/// `ID`, so the wire stays flat:
///
/// ```text
/// Envelope { id: Some(3), body: PeerCommand::Quit }  →  {"command":"quit","ID":3}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The correlation ID. `None` for unsolicited pushes.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    /// The record itself.
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wraps a body that expects a correlated answer.
    pub fn request(id: RequestId, body: T) -> Self {
        Self { id: Some(id), body }
    }

    /// Wraps a body that expects no answer.
    pub fn push(body: T) -> Self {
        Self { id: None, body }
    }
}

// ---------------------------------------------------------------------------
// Client → server commands
// ---------------------------------------------------------------------------

/// Username and secret, sent with every server command.
///
/// Login and register use them to establish identity; every other command
/// repeats them so the server can re-authorize the request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Hand-written so the secret never lands in a log line.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Commands a client sends to the rendezvous server.
///
/// `#[serde(tag = "command")]` produces internally tagged JSON:
/// `{"command": "connect", "username": ..., "target": "bob"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ServerCommand {
    /// Bind this connection to an identity.
    Login(Credentials),

    /// Create a new account.
    Register(Credentials),

    /// Become visible to other users and list who else is visible.
    Advertise {
        #[serde(flatten)]
        credentials: Credentials,
        /// Port this client will use for a direct peer transport.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },

    /// Ask to be paired with `target`.
    Connect {
        #[serde(flatten)]
        credentials: Credentials,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },

    /// Relay a chat line to the current partner, or leave the pairing
    /// when `quit` is set.
    Message {
        #[serde(flatten)]
        credentials: Credentials,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "is_false")]
        quit: bool,
    },

    /// End the session. No response is sent.
    Close,
}

impl ServerCommand {
    /// The wire name of the command, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Register(_) => "register",
            Self::Advertise { .. } => "advertise",
            Self::Connect { .. } => "connect",
            Self::Message { .. } => "message",
            Self::Close => "close",
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ---------------------------------------------------------------------------
// Peer vocabulary (also used for server pushes)
// ---------------------------------------------------------------------------

/// Commands exchanged between two peers after a handoff.
///
/// The server reuses [`PeerCommand::Message`] for the chat lines it relays
/// and for system notices, so a client handles both transports with one
/// vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum PeerCommand {
    /// A chat line. An empty `username` marks a system notice.
    Message { username: String, message: String },

    /// The sender is leaving the conversation.
    Quit,
}

impl PeerCommand {
    /// Builds a chat line from `username`.
    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Message {
            username: username.into(),
            message: message.into(),
        }
    }

    /// Builds a system notice.
    pub fn notice(message: impl Into<String>) -> Self {
        Self::chat("", message)
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

/// Machine-readable reason attached to a `failure` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidCredentials,
    AccountExists,
    AlreadyLoggedIn,
    NotAuthorized,
    TargetUnavailable,
    NoPartner,
    AlreadyPaired,
}

/// Where a freshly paired client should run its peer transport.
///
/// `is_client` is the role flag: `true` for the opener (dials), `false`
/// for the listener (binds and waits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendezvous {
    pub username: String,
    pub address: String,
    pub port: u16,
    pub is_client: bool,
}

/// The answer to a request.
///
/// Optional fields are omitted from the JSON when absent, so a plain
/// success is just `{"status":"success","ID":n}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,

    /// Human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Machine-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureKind>,

    /// Advertise payload: the other visible users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,

    /// Connect payload, flattened into the top level.
    #[serde(flatten)]
    pub rendezvous: Option<Rendezvous>,
}

impl Response {
    /// A bare success.
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            message: None,
            error: None,
            users: None,
            rendezvous: None,
        }
    }

    /// A failure with its kind and a readable message.
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: Status::Failure,
            message: Some(message.into()),
            error: Some(kind),
            ..Self::success()
        }
    }

    /// A success carrying the advertise list.
    pub fn users(users: Vec<String>) -> Self {
        Self {
            users: Some(users),
            ..Self::success()
        }
    }

    /// A success carrying a connect result.
    pub fn rendezvous(rendezvous: Rendezvous) -> Self {
        Self {
            rendezvous: Some(rendezvous),
            ..Self::success()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

// ---------------------------------------------------------------------------
// Inbound: what a client can receive
// ---------------------------------------------------------------------------

/// Any record a client may read off its transport.
///
/// `#[serde(untagged)]` tries each variant in order: a record with a
/// `command` key is a [`PeerCommand`]; otherwise it must be a
/// [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Command(Envelope<PeerCommand>),
    Reply(Envelope<Response>),
}

// =========================================================================
// Tests
// =========================================================================
