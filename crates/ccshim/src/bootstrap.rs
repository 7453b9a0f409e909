//! Process entry points.
//!
//! `start` is used by chaincode running as its own process: it selects the
//! transport and runs sessions over it. `start_in_proc` is used when the
//! handler lives inside the peer and the stream already exists. Both end in
//! the same `session::run_session`.

use std::sync::Arc;

use tokio::sync::broadcast;

use ccshim_core::ShimConfig;

use crate::error::SessionError;
use crate::handler::HandlerFactory;
use crate::session;
use crate::stream::PeerStream;
use crate::transport::{ChaincodeServer, Dialer, StreamFactory, TransportMode};

/// Run the chaincode side of the protocol until the session (dial mode) or
/// the server (listen mode) ends.
///
/// When `streams` is given it replaces transport selection entirely and
/// exactly one session runs on the stream it opens. `shutdown` only matters
/// in listen mode.
pub async fn start<F: HandlerFactory>(
    config: &ShimConfig,
    handlers: F,
    streams: Option<&dyn StreamFactory>,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), SessionError> {
    let name = config.identity()?;

    if let Some(factory) = streams {
        tracing::debug!(chaincode = name, "using supplied stream factory");
        let stream = factory.open().await?;
        return session::run_session(name, stream, &handlers).await;
    }

    match TransportMode::select(config) {
        TransportMode::Dial(address) => {
            tracing::info!(chaincode = name, peer = %address, "dial mode");
            let dialer = Dialer::from_config(config)?;
            let stream = dialer.dial().await?;
            session::run_session(name, Arc::new(stream), &handlers).await
        }
        TransportMode::Listen(address) => {
            tracing::info!(chaincode = name, %address, "listen mode");
            let server = ChaincodeServer::bind(config, name, Arc::new(handlers)).await?;
            server.run(shutdown).await
        }
    }
}

/// Run one session over an already established stream.
pub async fn start_in_proc<F: HandlerFactory>(
    name: &str,
    stream: Arc<dyn PeerStream>,
    handlers: &F,
) -> Result<(), SessionError> {
    session::run_session(name, stream, handlers).await
}
