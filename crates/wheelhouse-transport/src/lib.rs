//! Broker-less typed message-queue substrate.
//!
//! Every queue in the master is one of five patterns: REQ/REP (paired
//! call/response), ROUTER/DEALER (identity-tagged multi-client), PUB/SUB
//! (fan-out), and PUSH/PULL (pipeline). A message is a sequence of byte
//! frames ([`Frames`]); the typed layer ([`Wire`]) maps each queue's verb
//! enum onto frames, so malformed traffic is rejected at the socket
//! boundary on receive, and invalid traffic is unrepresentable on send.
//!
//! Two address schemes are supported. `inproc://name` endpoints live in a
//! process-wide registry owned by the [`Context`] (one context per
//! process); `tcp://host:port` endpoints carry the same frames over a
//! length-prefixed multipart codec. Binding conventions follow the queue
//! topology: REP, PULL, PUB and ROUTER bind; REQ, PUSH, SUB and DEALER
//! connect.
//!
//! High-water marks are configurable per socket; a socket whose peer has
//! fallen that far behind drops (PUB) or backpressures (everything else).
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), wheelhouse_transport::TransportError> {
//! use bytes::Bytes;
//! use wheelhouse_transport::{Context, Frames, Wire, WireError};
//!
//! #[derive(Debug, PartialEq)]
//! struct Ping;
//!
//! impl Wire for Ping {
//!     fn to_frames(&self) -> Frames {
//!         vec![Bytes::from_static(b"PING")]
//!     }
//!     fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
//!         match frames {
//!             [verb] if &verb[..] == b"PING" => Ok(Ping),
//!             _ => Err(WireError::Empty),
//!         }
//!     }
//! }
//!
//! let ctx = Context::new();
//! let mut pull = ctx.pull::<Ping>("inproc://pings", 16).await?;
//! let mut push = ctx.push::<Ping>("inproc://pings").await?;
//! push.send(&Ping).await?;
//! assert_eq!(pull.recv().await?, Ping);
//! # Ok(())
//! # }
//! ```

mod codec;
mod context;
mod inproc;
mod sockets;
mod tcp;
mod wire;

pub use codec::{MAX_MESSAGE_SIZE, MultipartCodec};
pub use context::{Addr, Context};
pub use sockets::{
    Dealer, Identity, PubSocket, PullSocket, PushSocket, RepSocket, ReqSocket, Router, SubSocket,
};
pub use wire::{Wire, WireError, verb_frame};

use bytes::Bytes;
use thiserror::Error;

/// A multipart message: one or more byte frames.
pub type Frames = Vec<Bytes>;

/// Transport-level failures. Codec and schema failures are wrapped so a
/// task can distinguish "the peer spoke garbage" (evict it) from "the
/// socket is gone" (shut down).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed address {0:?} (expected inproc://name or tcp://host:port)")]
    BadAddress(String),
    #[error("no inproc endpoint bound at {0:?}")]
    NotBound(String),
    #[error("inproc endpoint {0:?} is already bound")]
    AlreadyBound(String),
    #[error("endpoint {addr:?} is bound as {bound}, not usable as {requested}")]
    PatternMismatch {
        addr: String,
        bound: &'static str,
        requested: &'static str,
    },
    #[error("peer {0} is no longer connected")]
    PeerGone(Identity),
    #[error("channel closed")]
    Closed,
    #[error("schema violation: {0}")]
    Schema(#[from] WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
