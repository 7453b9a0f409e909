//! Transport selection.
//!
//! A configured peer address means dial mode: one outbound, client-role
//! gRPC stream. No peer address means listen mode: serve gRPC on the local
//! address and run an independent session on each call the peer opens.

pub mod dial;
pub mod grpc;
pub mod listen;
pub mod tls;

use std::sync::Arc;

use async_trait::async_trait;

use ccshim_core::ShimConfig;

use crate::error::SessionError;
use crate::stream::PeerStream;

pub use dial::Dialer;
pub use listen::{ChaincodeServer, SessionMeta, SessionTable};

/// Produces the stream for a single session.
///
/// `Dialer` is the network implementation. Tests pass their own factory to
/// `crate::start` to run a session without any network I/O.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn PeerStream>, SessionError>;
}

/// Which way the stream comes to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    /// Connect out to this peer address.
    Dial(String),
    /// Accept peer connections on this local address.
    Listen(String),
}

impl TransportMode {
    pub fn select(config: &ShimConfig) -> Self {
        match config.peer_address() {
            Some(addr) => TransportMode::Dial(addr.to_string()),
            None => TransportMode::Listen(config.server.listen_address.trim().to_string()),
        }
    }
}
