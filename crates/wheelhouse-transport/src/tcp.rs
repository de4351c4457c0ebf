//! TCP endpoints.
//!
//! Every bound endpoint owns an accept-loop task; every accepted
//! connection gets a reader task (feeding the shared inbound channel) and,
//! where the pattern sends, a writer task draining a per-connection
//! channel. Identities are assigned per connection and never reused within
//! a process, which is what makes them safe to treat as ephemeral peer
//! names: a reconnecting peer is a new peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::MultipartCodec;
use crate::sockets::Identity;
use crate::{Frames, TransportError};

/// Process-wide counter backing connection identities.
static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

fn next_identity() -> Identity {
    Identity(NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed))
}

type PeerMap = Arc<Mutex<HashMap<Identity, mpsc::Sender<Frames>>>>;

fn lock_peers(peers: &PeerMap) -> std::sync::MutexGuard<'_, HashMap<Identity, mpsc::Sender<Frames>>> {
    peers.lock().unwrap_or_else(|e| e.into_inner())
}

/// Identity-tagged multi-client endpoint (the bind side of
/// ROUTER/DEALER). Also the machinery behind bound PULL and REP, which
/// are routers that hide or constrain the identity.
pub(crate) struct TcpRouter {
    local_addr: SocketAddr,
    inbound: mpsc::Receiver<(Identity, Frames)>,
    peers: PeerMap,
    accept_task: JoinHandle<()>,
}

impl TcpRouter {
    pub(crate) async fn bind(addr: &str, hwm: usize) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (in_tx, inbound) = mpsc::channel(hwm.max(1));
        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let accept_peers = Arc::clone(&peers);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let identity = next_identity();
                let (read_half, write_half) = stream.into_split();
                let (out_tx, out_rx) = mpsc::channel(hwm.max(1));
                lock_peers(&accept_peers).insert(identity, out_tx);
                spawn_writer(write_half, out_rx);
                spawn_reader(identity, read_half, in_tx.clone(), Arc::clone(&accept_peers));
            }
        });
        Ok(Self {
            local_addr,
            inbound,
            peers,
            accept_task,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) async fn recv(&mut self) -> Result<(Identity, Frames), TransportError> {
        self.inbound.recv().await.ok_or(TransportError::Closed)
    }

    pub(crate) async fn send(
        &self,
        identity: Identity,
        frames: Frames,
    ) -> Result<(), TransportError> {
        let sender = lock_peers(&self.peers).get(&identity).cloned();
        match sender {
            Some(tx) => tx
                .send(frames)
                .await
                .map_err(|_| TransportError::PeerGone(identity)),
            None => Err(TransportError::PeerGone(identity)),
        }
    }

    /// Send to every connected peer, dropping peers that have gone away.
    pub(crate) async fn broadcast(&self, frames: Frames) {
        let senders: Vec<(Identity, mpsc::Sender<Frames>)> = lock_peers(&self.peers)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        for (identity, tx) in senders {
            if tx.send(frames.clone()).await.is_err() {
                lock_peers(&self.peers).remove(&identity);
            }
        }
    }
}

impl Drop for TcpRouter {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

fn spawn_reader(
    identity: Identity,
    read_half: OwnedReadHalf,
    in_tx: mpsc::Sender<(Identity, Frames)>,
    peers: PeerMap,
) {
    tokio::spawn(async move {
        let mut framed = FramedRead::new(read_half, MultipartCodec);
        while let Some(Ok(frames)) = framed.next().await {
            if in_tx.send((identity, frames)).await.is_err() {
                break;
            }
        }
        lock_peers(&peers).remove(&identity);
    });
}

fn spawn_writer(write_half: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Frames>) {
    tokio::spawn(async move {
        let mut framed = FramedWrite::new(write_half, MultipartCodec);
        while let Some(frames) = out_rx.recv().await {
            if framed.send(frames).await.is_err() {
                break;
            }
        }
    });
}

/// The connect side of every TCP pattern: a single framed stream.
pub(crate) struct TcpStreamSocket {
    framed_read: FramedRead<OwnedReadHalf, MultipartCodec>,
    framed_write: FramedWrite<OwnedWriteHalf, MultipartCodec>,
}

impl TcpStreamSocket {
    pub(crate) async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            framed_read: FramedRead::new(read_half, MultipartCodec),
            framed_write: FramedWrite::new(write_half, MultipartCodec),
        })
    }

    pub(crate) async fn send(&mut self, frames: Frames) -> Result<(), TransportError> {
        self.framed_write.send(frames).await?;
        Ok(())
    }

    pub(crate) async fn recv(&mut self) -> Result<Frames, TransportError> {
        match self.framed_read.next().await {
            Some(Ok(frames)) => Ok(frames),
            Some(Err(err)) => Err(TransportError::Io(err)),
            None => Err(TransportError::Closed),
        }
    }
}
