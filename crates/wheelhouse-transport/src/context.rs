//! The process-wide transport context.

use crate::inproc::Registry;
use crate::sockets::{
    Dealer, PubSocket, PullSocket, PushSocket, RepSocket, ReqSocket, Router, SubSocket,
};
use crate::tcp::{TcpRouter, TcpStreamSocket};
use crate::{TransportError, Wire};

/// A parsed queue address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    /// Named in-process endpoint.
    Inproc(String),
    /// TCP host:port endpoint.
    Tcp(String),
}

impl Addr {
    /// Parse `inproc://name` or `tcp://host:port`.
    pub fn parse(addr: &str) -> Result<Self, TransportError> {
        if let Some(name) = addr.strip_prefix("inproc://") {
            if name.is_empty() {
                return Err(TransportError::BadAddress(addr.to_owned()));
            }
            Ok(Addr::Inproc(name.to_owned()))
        } else if let Some(hostport) = addr.strip_prefix("tcp://") {
            if hostport.is_empty() {
                return Err(TransportError::BadAddress(addr.to_owned()));
            }
            Ok(Addr::Tcp(hostport.to_owned()))
        } else {
            Err(TransportError::BadAddress(addr.to_owned()))
        }
    }
}

/// One per process. Owns the inproc registry; TCP sockets only need it
/// for uniformity of construction.
///
/// Binding conventions follow the queue topology: REP, PULL, PUB and
/// ROUTER bind their address; REQ, PUSH, SUB and DEALER connect to it.
#[derive(Clone, Default)]
pub struct Context {
    registry: Registry,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the reply side of a call/response queue.
    pub async fn rep<R: Wire, S: Wire>(
        &self,
        addr: &str,
        hwm: usize,
    ) -> Result<RepSocket<R, S>, TransportError> {
        match Addr::parse(addr)? {
            Addr::Inproc(name) => Ok(RepSocket::inproc(self.registry.bind_rep(&name, hwm)?)),
            Addr::Tcp(hostport) => Ok(RepSocket::tcp(TcpRouter::bind(&hostport, hwm).await?)),
        }
    }

    /// Connect the request side of a call/response queue.
    pub async fn req<S: Wire, R: Wire>(
        &self,
        addr: &str,
    ) -> Result<ReqSocket<S, R>, TransportError> {
        match Addr::parse(addr)? {
            Addr::Inproc(name) => Ok(ReqSocket::inproc(self.registry.connect_req(&name)?)),
            Addr::Tcp(hostport) => Ok(ReqSocket::tcp(TcpStreamSocket::connect(&hostport).await?)),
        }
    }

    /// Connect the sending half of a pipeline.
    pub async fn push<M: Wire>(&self, addr: &str) -> Result<PushSocket<M>, TransportError> {
        match Addr::parse(addr)? {
            Addr::Inproc(name) => Ok(PushSocket::inproc(self.registry.connect_push(&name)?)),
            Addr::Tcp(hostport) => Ok(PushSocket::tcp(TcpStreamSocket::connect(&hostport).await?)),
        }
    }

    /// Bind the receiving half of a pipeline.
    pub async fn pull<M: Wire>(
        &self,
        addr: &str,
        hwm: usize,
    ) -> Result<PullSocket<M>, TransportError> {
        match Addr::parse(addr)? {
            Addr::Inproc(name) => Ok(PullSocket::inproc(self.registry.bind_pull(&name, hwm)?)),
            Addr::Tcp(hostport) => Ok(PullSocket::tcp(TcpRouter::bind(&hostport, hwm).await?)),
        }
    }

    /// Bind a fan-out publisher.
    pub async fn publish<M: Wire>(
        &self,
        addr: &str,
        hwm: usize,
    ) -> Result<PubSocket<M>, TransportError> {
        match Addr::parse(addr)? {
            Addr::Inproc(name) => Ok(PubSocket::inproc(self.registry.bind_publish(&name, hwm)?)),
            Addr::Tcp(hostport) => Ok(PubSocket::tcp(TcpRouter::bind(&hostport, hwm).await?)),
        }
    }

    /// Subscribe to a fan-out publisher.
    pub async fn subscribe<M: Wire>(&self, addr: &str) -> Result<SubSocket<M>, TransportError> {
        match Addr::parse(addr)? {
            Addr::Inproc(name) => Ok(SubSocket::inproc(self.registry.connect_subscribe(&name)?)),
            Addr::Tcp(hostport) => Ok(SubSocket::tcp(TcpStreamSocket::connect(&hostport).await?)),
        }
    }

    /// Bind an identity-tagged multi-client endpoint.
    pub async fn router<R: Wire, S: Wire>(
        &self,
        addr: &str,
        hwm: usize,
    ) -> Result<Router<R, S>, TransportError> {
        match Addr::parse(addr)? {
            Addr::Tcp(hostport) => Ok(Router::new(TcpRouter::bind(&hostport, hwm).await?)),
            Addr::Inproc(_) => Err(TransportError::BadAddress(addr.to_owned())),
        }
    }

    /// Connect to a ROUTER endpoint.
    pub async fn dealer<S: Wire, R: Wire>(
        &self,
        addr: &str,
    ) -> Result<Dealer<S, R>, TransportError> {
        match Addr::parse(addr)? {
            Addr::Tcp(hostport) => Ok(Dealer::new(TcpStreamSocket::connect(&hostport).await?)),
            Addr::Inproc(_) => Err(TransportError::BadAddress(addr.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inproc() {
        assert_eq!(
            Addr::parse("inproc://builds").expect("parse"),
            Addr::Inproc("builds".to_owned())
        );
    }

    #[test]
    fn parses_tcp() {
        assert_eq!(
            Addr::parse("tcp://0.0.0.0:5555").expect("parse"),
            Addr::Tcp("0.0.0.0:5555".to_owned())
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Addr::parse("ipc:///tmp/sock").is_err());
        assert!(Addr::parse("inproc://").is_err());
        assert!(Addr::parse("builds").is_err());
    }
}
