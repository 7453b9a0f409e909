//! Session: registration followed by the message pump, over one stream.

pub mod handshake;
mod pump;

pub use pump::Pump;

use std::sync::Arc;

use crate::error::SessionError;
use crate::handler::{HandlerFactory, SessionSender};
use crate::stream::PeerStream;

/// Run one session to completion on `stream`.
///
/// Sends REGISTER, then pumps messages into a handler built by `handlers`
/// until the first terminal condition. The stream's send side is closed
/// exactly once before returning, on every path.
pub async fn run_session<F: HandlerFactory>(
    name: &str,
    stream: Arc<dyn PeerStream>,
    handlers: &F,
) -> Result<(), SessionError> {
    let sender = SessionSender::new(stream.clone());
    let handler = handlers.new_handler(sender.clone());

    let result: Result<(), SessionError> = async {
        handshake::register(name, &sender).await?;
        Pump::new(stream.clone(), handler).run().await
    }
    .await;

    if let Err(e) = stream.close_send().await {
        tracing::warn!(chaincode = name, error = %e, "failed to close send side");
    }

    match &result {
        Err(SessionError::StreamEnded) => tracing::info!(chaincode = name, "peer ended chaincode stream"),
        Err(e) => tracing::warn!(chaincode = name, error = %e, "chaincode session failed"),
        Ok(()) => {}
    }
    result
}
