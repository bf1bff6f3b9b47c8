//! Client side of Parley.
//!
//! - [`Client`]: login, discovery, pairing, and chatting, with an optional
//!   switch to a direct peer transport once paired
//! - [`Correlator`]: request/response matching over one connection, with
//!   unsolicited records delivered as [`PushEvent`]s
//!
//! # Example
//!
//! ```rust,no_run
//! use parley_client::{Client, ClientConfig, PushEvent};
//!
//! # async fn chat() -> Result<(), parley_client::ClientError> {
//! let (mut client, mut events) =
//!     Client::dial("127.0.0.1:2020", ClientConfig::default()).await?;
//! client.login("alice", "hunter2").await?;
//! client.advertise().await?;
//! client.connect("bob").await?;
//! client.send("hi bob").await?;
//! if let Some(PushEvent::Message { username, message }) = events.recv().await {
//!     println!("{username}: {message}");
//! }
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod correlator;
mod error;
mod handoff;

pub use client::{Client, ClientConfig, HandoffMode};
pub use correlator::{Correlator, PushEvent};
pub use error::ClientError;
