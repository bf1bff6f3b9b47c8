//! # Parley
//!
//! A rendezvous chat server. Clients log in, advertise themselves, and
//! pair up by mutually asking to `connect`; the server then tells each
//! side whether to open or listen for a direct chat, and relays messages
//! for clients that stay on the server connection.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::prelude::*;
//!
//! # async fn start() -> Result<(), ParleyError> {
//! let server = ParleyServer::builder()
//!     .bind("0.0.0.0:2020")
//!     .build(MemoryCredentials::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod commands;
mod error;
mod handler;
mod server;

pub use error::ParleyError;
pub use server::{ParleyServer, ParleyServerBuilder};

pub mod prelude {
    pub use crate::{ParleyError, ParleyServer, ParleyServerBuilder};
    pub use parley_protocol::JsonCodec;
    pub use parley_session::{
        CredentialStore, Directory, MemoryCredentials, RendezvousConfig,
    };
}
