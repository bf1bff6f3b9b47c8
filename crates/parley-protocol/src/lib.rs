//! Wire protocol for Parley.
//!
//! This crate defines the "language" spoken on both hops of a chat:
//!
//! - **Types** ([`Envelope`], [`ServerCommand`], [`PeerCommand`],
//!   [`Response`], [`Inbound`]): the records that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those records are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! ```text
//! Transport (framed bytes) → Protocol (Envelope<T>) → Session / Client
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    Credentials, Envelope, FailureKind, Inbound, PeerCommand, Rendezvous,
    RequestId, Response, ServerCommand, Status,
};
