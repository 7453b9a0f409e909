//! Message pump: the receive/dispatch loop of a session.
//!
//! A dedicated reader task owns `recv` and hands each result over a
//! single-slot channel. It issues the next `recv` only after the pump grants
//! a permit, which happens once the previous message has been dispatched.
//! The pump selects over that channel and the handler's send outcomes and
//! stops at the first terminal condition.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ccshim_core::{ChaincodeMessage, StreamError};

use crate::error::{Phase, SessionError};
use crate::handler::{MessageHandler, SendOutcome, SendOutcomes};
use crate::stream::PeerStream;

type Received = Result<ChaincodeMessage, StreamError>;

/// Runs `recv` in a loop, one call per permit.
struct InboundReader {
    stream: Arc<dyn PeerStream>,
    results: mpsc::Sender<Received>,
    permits: mpsc::Receiver<()>,
}

impl InboundReader {
    async fn run(mut self) {
        loop {
            let received = self.stream.recv().await;
            let terminal = !matches!(&received, Ok(msg) if !msg.is_empty());
            if self.results.send(received).await.is_err() || terminal {
                return;
            }
            if self.permits.recv().await.is_none() {
                return;
            }
        }
    }
}

/// Aborts the reader when the pump returns, whatever the exit path.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Pump<H> {
    stream: Arc<dyn PeerStream>,
    handler: H,
}

impl<H: MessageHandler> Pump<H> {
    pub fn new(stream: Arc<dyn PeerStream>, handler: H) -> Self {
        Self { stream, handler }
    }

    /// Pump until the session ends. Always returns the terminal cause;
    /// a clean hang-up by the peer is `SessionError::StreamEnded`.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let (results_tx, mut results) = mpsc::channel(1);
        let (permits, permits_rx) = mpsc::channel(1);
        let (outcomes, mut outcome_rx) = SendOutcomes::channel();

        let reader = InboundReader {
            stream: self.stream.clone(),
            results: results_tx,
            permits: permits_rx,
        };
        let _reader = AbortOnDrop(tokio::spawn(reader.run()));

        let mut dispatched: u64 = 0;
        loop {
            tokio::select! {
                received = results.recv() => {
                    let msg = match received {
                        Some(Ok(msg)) if msg.is_empty() => return Err(SessionError::EmptyMessage),
                        Some(Ok(msg)) => msg,
                        Some(Err(StreamError::Closed)) => {
                            tracing::debug!(dispatched, "peer closed stream");
                            return Err(SessionError::StreamEnded);
                        }
                        Some(Err(e)) => return Err(SessionError::transport(Phase::Receive, e)),
                        None => return Err(SessionError::transport(Phase::Receive, StreamError::ReaderGone)),
                    };

                    tracing::debug!(msg_type = ?msg.kind(), txid = %msg.txid, "dispatching message");
                    self.handler
                        .handle_message(msg, &outcomes)
                        .await
                        .map_err(SessionError::rejected)?;
                    dispatched += 1;

                    // Outcomes already reported win over the next receive.
                    drain_outcomes(&mut outcome_rx)?;

                    if permits.send(()).await.is_err() {
                        return Err(SessionError::transport(Phase::Receive, StreamError::ReaderGone));
                    }
                }

                Some(outcome) = outcome_rx.recv() => {
                    check_outcome(outcome)?;
                }
            }
        }
    }
}

fn check_outcome(outcome: SendOutcome) -> Result<(), SessionError> {
    outcome.map_err(|e| SessionError::transport(Phase::Send, e))
}

fn drain_outcomes(rx: &mut mpsc::UnboundedReceiver<SendOutcome>) -> Result<(), SessionError> {
    while let Ok(outcome) = rx.try_recv() {
        check_outcome(outcome)?;
    }
    Ok(())
}
