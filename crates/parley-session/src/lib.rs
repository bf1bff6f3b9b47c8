//! Sessions, the shared directory, and rendezvous for Parley.
//!
//! This crate owns everything the server knows about its users:
//!
//! 1. **Accounts**: creating and checking credentials ([`CredentialStore`])
//! 2. **Sessions**: one [`Session`] per connection, bound to an identity
//!    by `login`
//! 3. **Directory**: who is online, who is available, who is paired
//!    ([`Directory`])
//! 4. **Rendezvous and relay**: pairing two sessions by mutual consent,
//!    then forwarding chat between them
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)      ← decodes requests, calls Session methods, encodes responses
//!     ↕
//! Session Layer (this crate)  ← identity, availability, pairing
//!     ↕
//! Protocol Layer (below)      ← Credentials, PeerCommand, Rendezvous, FailureKind
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod directory;
mod error;
mod relay;
mod rendezvous;
mod session;

pub use auth::{register, CredentialStore, MemoryCredentials};
pub use directory::Directory;
pub use error::SessionError;
pub use session::{Outbound, RendezvousConfig, Session, SessionState};
