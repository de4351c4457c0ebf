//! Typed socket wrappers uniting the inproc and TCP endpoints.
//!
//! Each wrapper pairs an expected-send and expected-receive type; opening
//! a channel "in reverse" is just swapping the type parameters. Decoding
//! failures surface as [`WireError`] so the owning task can evict the
//! offending peer without tearing the socket down.

use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::inproc::ReqEnvelope;
use crate::tcp::{TcpRouter, TcpStreamSocket};
use crate::{Frames, TransportError, Wire, WireError};

/// Ephemeral identity of a connected peer on a ROUTER endpoint. Assigned
/// per connection; a reconnecting peer gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(pub(crate) u64);

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl From<u64> for Identity {
    /// Fabricate an identity. Useful for tests; real identities come
    /// from ROUTER connections.
    fn from(raw: u64) -> Self {
        Identity(raw)
    }
}

/// Identity-tagged multi-client endpoint (bind side).
pub struct Router<R, S> {
    inner: TcpRouter,
    _marker: std::marker::PhantomData<(R, S)>,
}

impl<R: Wire, S: Wire> Router<R, S> {
    pub(crate) fn new(inner: TcpRouter) -> Self {
        Self {
            inner,
            _marker: std::marker::PhantomData,
        }
    }

    /// The bound address (useful when binding port 0 in tests).
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    /// Receive the next message from any peer. A schema violation is
    /// returned alongside the peer's identity so the caller can evict it.
    pub async fn recv(&mut self) -> Result<(Identity, Result<R, WireError>), TransportError> {
        let (identity, frames) = self.inner.recv().await?;
        Ok((identity, R::from_frames(&frames)))
    }

    /// Send a reply to one peer.
    pub async fn send(&self, identity: Identity, msg: &S) -> Result<(), TransportError> {
        self.inner.send(identity, msg.to_frames()).await
    }
}

/// Connect side of a ROUTER endpoint.
pub struct Dealer<S, R> {
    inner: TcpStreamSocket,
    _marker: std::marker::PhantomData<(S, R)>,
}

impl<S: Wire, R: Wire> Dealer<S, R> {
    pub(crate) fn new(inner: TcpStreamSocket) -> Self {
        Self {
            inner,
            _marker: std::marker::PhantomData,
        }
    }

    pub async fn send(&mut self, msg: &S) -> Result<(), TransportError> {
        self.inner.send(msg.to_frames()).await
    }

    pub async fn recv(&mut self) -> Result<R, TransportError> {
        let frames = self.inner.recv().await?;
        Ok(R::from_frames(&frames)?)
    }
}

enum RepInner {
    Inproc {
        rx: mpsc::Receiver<ReqEnvelope>,
        pending: Option<oneshot::Sender<Frames>>,
    },
    Tcp {
        router: TcpRouter,
        pending: Option<Identity>,
    },
}

/// Reply side of a call/response pair. Every `recv` must be answered with
/// exactly one `send` before the next `recv`, even when the request
/// failed validation, or the requester's send/recv cycle deadlocks.
pub struct RepSocket<R, S> {
    inner: RepInner,
    _marker: std::marker::PhantomData<(R, S)>,
}

impl<R: Wire, S: Wire> RepSocket<R, S> {
    pub(crate) fn inproc(rx: mpsc::Receiver<ReqEnvelope>) -> Self {
        Self {
            inner: RepInner::Inproc { rx, pending: None },
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn tcp(router: TcpRouter) -> Self {
        Self {
            inner: RepInner::Tcp {
                router,
                pending: None,
            },
            _marker: std::marker::PhantomData,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            RepInner::Inproc { .. } => None,
            RepInner::Tcp { router, .. } => Some(router.local_addr()),
        }
    }

    /// Receive the next request. The inner result is the request's schema
    /// validation; either way the reply path is armed.
    pub async fn recv(&mut self) -> Result<Result<R, WireError>, TransportError> {
        match &mut self.inner {
            RepInner::Inproc { rx, pending } => {
                let (frames, reply_to) = rx.recv().await.ok_or(TransportError::Closed)?;
                *pending = Some(reply_to);
                Ok(R::from_frames(&frames))
            }
            RepInner::Tcp { router, pending } => {
                let (identity, frames) = router.recv().await?;
                *pending = Some(identity);
                Ok(R::from_frames(&frames))
            }
        }
    }

    /// Answer the request most recently received.
    pub async fn send(&mut self, reply: &S) -> Result<(), TransportError> {
        match &mut self.inner {
            RepInner::Inproc { pending, .. } => {
                let reply_to = pending.take().ok_or(TransportError::Closed)?;
                reply_to
                    .send(reply.to_frames())
                    .map_err(|_| TransportError::Closed)
            }
            RepInner::Tcp { router, pending } => {
                let identity = pending.take().ok_or(TransportError::Closed)?;
                router.send(identity, reply.to_frames()).await
            }
        }
    }
}

enum ReqInner {
    Inproc(mpsc::Sender<ReqEnvelope>),
    Tcp(TcpStreamSocket),
}

/// Request side of a call/response pair.
pub struct ReqSocket<S, R> {
    inner: ReqInner,
    _marker: std::marker::PhantomData<(S, R)>,
}

impl<S: Wire, R: Wire> ReqSocket<S, R> {
    pub(crate) fn inproc(tx: mpsc::Sender<ReqEnvelope>) -> Self {
        Self {
            inner: ReqInner::Inproc(tx),
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn tcp(socket: TcpStreamSocket) -> Self {
        Self {
            inner: ReqInner::Tcp(socket),
            _marker: std::marker::PhantomData,
        }
    }

    /// Send a request and wait for its reply.
    pub async fn request(&mut self, msg: &S) -> Result<R, TransportError> {
        match &mut self.inner {
            ReqInner::Inproc(tx) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                tx.send((msg.to_frames(), reply_tx))
                    .await
                    .map_err(|_| TransportError::Closed)?;
                let frames = reply_rx.await.map_err(|_| TransportError::Closed)?;
                Ok(R::from_frames(&frames)?)
            }
            ReqInner::Tcp(socket) => {
                socket.send(msg.to_frames()).await?;
                let frames = socket.recv().await?;
                Ok(R::from_frames(&frames)?)
            }
        }
    }
}

enum PushInner {
    Inproc(mpsc::Sender<Frames>),
    Tcp(TcpStreamSocket),
}

/// Sending half of a pipeline.
pub struct PushSocket<M> {
    inner: PushInner,
    _marker: std::marker::PhantomData<M>,
}

impl<M: Wire> PushSocket<M> {
    pub(crate) fn inproc(tx: mpsc::Sender<Frames>) -> Self {
        Self {
            inner: PushInner::Inproc(tx),
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn tcp(socket: TcpStreamSocket) -> Self {
        Self {
            inner: PushInner::Tcp(socket),
            _marker: std::marker::PhantomData,
        }
    }

    pub async fn send(&mut self, msg: &M) -> Result<(), TransportError> {
        match &mut self.inner {
            PushInner::Inproc(tx) => tx
                .send(msg.to_frames())
                .await
                .map_err(|_| TransportError::Closed),
            PushInner::Tcp(socket) => socket.send(msg.to_frames()).await,
        }
    }
}

enum PullInner {
    Inproc(mpsc::Receiver<Frames>),
    Tcp(TcpRouter),
}

/// Receiving half of a pipeline; TCP pulls merge every connected pusher.
pub struct PullSocket<M> {
    inner: PullInner,
    _marker: std::marker::PhantomData<M>,
}

impl<M: Wire> PullSocket<M> {
    pub(crate) fn inproc(rx: mpsc::Receiver<Frames>) -> Self {
        Self {
            inner: PullInner::Inproc(rx),
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn tcp(router: TcpRouter) -> Self {
        Self {
            inner: PullInner::Tcp(router),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            PullInner::Inproc(_) => None,
            PullInner::Tcp(router) => Some(router.local_addr()),
        }
    }

    pub async fn recv(&mut self) -> Result<M, TransportError> {
        let frames = match &mut self.inner {
            PullInner::Inproc(rx) => rx.recv().await.ok_or(TransportError::Closed)?,
            PullInner::Tcp(router) => router.recv().await?.1,
        };
        Ok(M::from_frames(&frames)?)
    }
}

enum PubInner {
    Inproc(broadcast::Sender<Frames>),
    Tcp(TcpRouter),
}

/// Fan-out sender. Messages to peers that have fallen behind their
/// high-water mark are dropped, never buffered unboundedly.
pub struct PubSocket<M> {
    inner: PubInner,
    _marker: std::marker::PhantomData<M>,
}

impl<M: Wire> PubSocket<M> {
    pub(crate) fn inproc(tx: broadcast::Sender<Frames>) -> Self {
        Self {
            inner: PubInner::Inproc(tx),
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn tcp(router: TcpRouter) -> Self {
        Self {
            inner: PubInner::Tcp(router),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            PubInner::Inproc(_) => None,
            PubInner::Tcp(router) => Some(router.local_addr()),
        }
    }

    /// Publish to all current subscribers; with none connected the
    /// message is dropped.
    pub async fn send(&self, msg: &M) -> Result<(), TransportError> {
        match &self.inner {
            PubInner::Inproc(tx) => {
                let _ = tx.send(msg.to_frames());
                Ok(())
            }
            PubInner::Tcp(router) => {
                router.broadcast(msg.to_frames()).await;
                Ok(())
            }
        }
    }
}

enum SubInner {
    Inproc(broadcast::Receiver<Frames>),
    Tcp(TcpStreamSocket),
}

/// Fan-out receiver. A lagged inproc subscriber skips what it missed and
/// keeps going; missing a control broadcast is recovered at the next one.
pub struct SubSocket<M> {
    inner: SubInner,
    _marker: std::marker::PhantomData<M>,
}

impl<M: Wire> SubSocket<M> {
    pub(crate) fn inproc(rx: broadcast::Receiver<Frames>) -> Self {
        Self {
            inner: SubInner::Inproc(rx),
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn tcp(socket: TcpStreamSocket) -> Self {
        Self {
            inner: SubInner::Tcp(socket),
            _marker: std::marker::PhantomData,
        }
    }

    pub async fn recv(&mut self) -> Result<M, TransportError> {
        let frames = match &mut self.inner {
            SubInner::Inproc(rx) => loop {
                match rx.recv().await {
                    Ok(frames) => break frames,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(TransportError::Closed);
                    }
                }
            },
            SubInner::Tcp(socket) => socket.recv().await?,
        };
        Ok(M::from_frames(&frames)?)
    }
}
