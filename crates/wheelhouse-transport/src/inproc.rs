//! In-process endpoints.
//!
//! `inproc://` queues are entries in the context's registry. Binding
//! creates the channel and claims the name; connecting clones the sending
//! side (PUSH, REQ) or subscribes (SUB). The channel capacity is the
//! binder's high-water mark.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{Frames, TransportError};

/// A request paired with the channel its reply must travel back on.
pub(crate) type ReqEnvelope = (Frames, oneshot::Sender<Frames>);

pub(crate) enum Endpoint {
    Pull(mpsc::Sender<Frames>),
    Publish(broadcast::Sender<Frames>),
    Rep(mpsc::Sender<ReqEnvelope>),
}

impl Endpoint {
    fn pattern(&self) -> &'static str {
        match self {
            Endpoint::Pull(_) => "PULL",
            Endpoint::Publish(_) => "PUB",
            Endpoint::Rep(_) => "REP",
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct Registry {
    endpoints: Arc<Mutex<HashMap<String, Endpoint>>>,
}

impl Registry {
    fn bind(&self, name: &str, endpoint: Endpoint) -> Result<(), TransportError> {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        if endpoints.contains_key(name) {
            return Err(TransportError::AlreadyBound(name.to_owned()));
        }
        endpoints.insert(name.to_owned(), endpoint);
        Ok(())
    }

    pub(crate) fn bind_pull(
        &self,
        name: &str,
        hwm: usize,
    ) -> Result<mpsc::Receiver<Frames>, TransportError> {
        let (tx, rx) = mpsc::channel(hwm.max(1));
        self.bind(name, Endpoint::Pull(tx))?;
        Ok(rx)
    }

    pub(crate) fn bind_publish(
        &self,
        name: &str,
        hwm: usize,
    ) -> Result<broadcast::Sender<Frames>, TransportError> {
        let (tx, _) = broadcast::channel(hwm.max(1));
        self.bind(name, Endpoint::Publish(tx.clone()))?;
        Ok(tx)
    }

    pub(crate) fn bind_rep(
        &self,
        name: &str,
        hwm: usize,
    ) -> Result<mpsc::Receiver<ReqEnvelope>, TransportError> {
        let (tx, rx) = mpsc::channel(hwm.max(1));
        self.bind(name, Endpoint::Rep(tx))?;
        Ok(rx)
    }

    pub(crate) fn connect_push(&self, name: &str) -> Result<mpsc::Sender<Frames>, TransportError> {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        match endpoints.get(name) {
            Some(Endpoint::Pull(tx)) => Ok(tx.clone()),
            Some(other) => Err(TransportError::PatternMismatch {
                addr: name.to_owned(),
                bound: other.pattern(),
                requested: "PUSH",
            }),
            None => Err(TransportError::NotBound(name.to_owned())),
        }
    }

    pub(crate) fn connect_subscribe(
        &self,
        name: &str,
    ) -> Result<broadcast::Receiver<Frames>, TransportError> {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        match endpoints.get(name) {
            Some(Endpoint::Publish(tx)) => Ok(tx.subscribe()),
            Some(other) => Err(TransportError::PatternMismatch {
                addr: name.to_owned(),
                bound: other.pattern(),
                requested: "SUB",
            }),
            None => Err(TransportError::NotBound(name.to_owned())),
        }
    }

    pub(crate) fn connect_req(
        &self,
        name: &str,
    ) -> Result<mpsc::Sender<ReqEnvelope>, TransportError> {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        match endpoints.get(name) {
            Some(Endpoint::Rep(tx)) => Ok(tx.clone()),
            Some(other) => Err(TransportError::PatternMismatch {
                addr: name.to_owned(),
                bound: other.pattern(),
                requested: "REQ",
            }),
            None => Err(TransportError::NotBound(name.to_owned())),
        }
    }
}
