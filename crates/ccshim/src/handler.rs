//! Interface between the session pump and application message handling.
//!
//! The pump hands each inbound message to a `MessageHandler` together with a
//! `SendOutcomes` sink. A handler that replies does so on its own task and
//! reports the send result through the sink; the pump never waits for it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ccshim_core::{ChaincodeMessage, StreamError};

use crate::stream::PeerStream;

/// Send half of the session's stream, shared by everything that replies.
#[derive(Clone)]
pub struct SessionSender {
    stream: Arc<dyn PeerStream>,
}

impl SessionSender {
    pub(crate) fn new(stream: Arc<dyn PeerStream>) -> Self {
        Self { stream }
    }

    /// Send one message. Concurrent calls are serialized by the stream.
    pub async fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError> {
        self.stream.send(msg).await
    }
}

/// Outcome of one asynchronous send, as seen by the pump.
pub type SendOutcome = Result<(), StreamError>;

/// Where handlers report the results of replies they sent asynchronously.
/// The first error reported ends the session.
#[derive(Clone)]
pub struct SendOutcomes {
    tx: mpsc::UnboundedSender<SendOutcome>,
}

impl SendOutcomes {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SendOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, outcome: SendOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::trace!("session already ended, dropping send outcome");
        }
    }

    /// Send `msg` on a new task and report how it went.
    pub fn spawn_send(&self, sender: &SessionSender, msg: ChaincodeMessage) -> JoinHandle<()> {
        let sender = sender.clone();
        let outcomes = self.clone();
        tokio::spawn(async move {
            let outcome = sender.send(msg).await;
            outcomes.report(outcome);
        })
    }
}

/// Application-side processing of inbound messages for one session.
#[async_trait]
pub trait MessageHandler: Send + 'static {
    /// Handle one inbound message.
    ///
    /// Return an error only when the message itself is unacceptable; that
    /// ends the session. Reply failures go through `outcomes` instead.
    async fn handle_message(
        &mut self,
        msg: ChaincodeMessage,
        outcomes: &SendOutcomes,
    ) -> anyhow::Result<()>;
}

/// Builds a fresh handler for every session.
pub trait HandlerFactory: Send + Sync + 'static {
    type Handler: MessageHandler;

    fn new_handler(&self, sender: SessionSender) -> Self::Handler;
}

impl<F, H> HandlerFactory for F
where
    F: Fn(SessionSender) -> H + Send + Sync + 'static,
    H: MessageHandler,
{
    type Handler = H;

    fn new_handler(&self, sender: SessionSender) -> H {
        self(sender)
    }
}
