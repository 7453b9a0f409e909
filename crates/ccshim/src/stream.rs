//! The duplex message stream a session runs over.
//!
//! `PeerStream` is the only thing the session layer knows about the
//! transport. `GrpcStream` implements it over one bidirectional gRPC call,
//! opened by us (dial mode) or by the peer (listen mode);
//! `mock::MockStream` implements it in memory for tests.

use async_trait::async_trait;
use prost::Message;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tonic::{Status, Streaming};

use ccshim_core::wire::REGISTER_PATH;
use ccshim_core::{ChaincodeMessage, StreamError};

use crate::transport::grpc::{self, ResponseStream};

/// One active connection to the peer.
///
/// `recv` is never called concurrently with itself by the session layer.
/// `send` may be called from any task, concurrently with `recv` and with
/// other sends; implementations serialize sends themselves.
#[async_trait]
pub trait PeerStream: Send + Sync {
    /// Wait for the next message. `Err(StreamError::Closed)` means the peer
    /// closed its send direction.
    async fn recv(&self) -> Result<ChaincodeMessage, StreamError>;

    /// Transmit one message.
    async fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError>;

    /// Tell the peer nothing more will be sent from this side.
    async fn close_send(&self) -> Result<(), StreamError>;
}

/// How the underlying call came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We dialed the peer.
    Client,
    /// The peer dialed us.
    Server,
}

enum Inbound {
    /// Our call is out; the peer has not answered with headers yet.
    Opening(JoinHandle<Result<Streaming<ChaincodeMessage>, Status>>),
    Open(Streaming<ChaincodeMessage>),
    Finished,
}

/// Chaincode stream carried by a gRPC bidirectional call.
pub struct GrpcStream {
    role: Role,
    peer: String,
    max_message_bytes: usize,
    inbound: Mutex<Inbound>,
    outbound: Mutex<Option<mpsc::Sender<ChaincodeMessage>>>,
}

impl GrpcStream {
    /// Open `ChaincodeSupport/Register` on a connected channel.
    ///
    /// Returns at once: the peer answers the call only after it has read
    /// REGISTER, so the first `recv` is what waits for it.
    pub fn dialed(channel: Channel, peer: impl Into<String>, max_message_bytes: usize) -> Self {
        let (tx, outbound) = grpc::outbound_queue();
        let call = tokio::spawn(grpc::open_call(channel, REGISTER_PATH, outbound, max_message_bytes));
        Self {
            role: Role::Client,
            peer: peer.into(),
            max_message_bytes,
            inbound: Mutex::new(Inbound::Opening(call)),
            outbound: Mutex::new(Some(tx)),
        }
    }

    /// Wrap a call the peer opened to us. The returned stream is the call's
    /// response and carries everything sent on this stream.
    pub fn accepted(
        inbound: Streaming<ChaincodeMessage>,
        peer: impl Into<String>,
        max_message_bytes: usize,
    ) -> (Self, ResponseStream) {
        let (tx, responses) = grpc::response_queue();
        let stream = Self {
            role: Role::Server,
            peer: peer.into(),
            max_message_bytes,
            inbound: Mutex::new(Inbound::Open(inbound)),
            outbound: Mutex::new(Some(tx)),
        };
        (stream, responses)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Drop for GrpcStream {
    fn drop(&mut self) {
        if let Inbound::Opening(call) = self.inbound.get_mut() {
            call.abort();
        }
    }
}

#[async_trait]
impl PeerStream for GrpcStream {
    async fn recv(&self) -> Result<ChaincodeMessage, StreamError> {
        let mut inbound = self.inbound.lock().await;

        if let Inbound::Opening(call) = &mut *inbound {
            let opened = match call.await {
                Ok(opened) => opened,
                Err(e) => Err(Status::aborted(format!("call task failed: {e}"))),
            };
            match opened {
                Ok(streaming) => {
                    tracing::debug!(peer = %self.peer, "peer accepted chaincode stream");
                    *inbound = Inbound::Open(streaming);
                }
                Err(status) => {
                    *inbound = Inbound::Finished;
                    return Err(status.into());
                }
            }
        }

        let Inbound::Open(streaming) = &mut *inbound else {
            return Err(StreamError::Closed);
        };
        let next = streaming.message().await;
        match next {
            Ok(Some(msg)) => {
                tracing::trace!(peer = %self.peer, msg_type = ?msg.kind(), len = msg.payload.len(), "message received");
                Ok(msg)
            }
            Ok(None) => {
                *inbound = Inbound::Finished;
                Err(StreamError::Closed)
            }
            Err(status) => {
                *inbound = Inbound::Finished;
                Err(status.into())
            }
        }
    }

    async fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError> {
        let len = msg.encoded_len();
        if len > self.max_message_bytes {
            return Err(StreamError::MessageTooLarge {
                len,
                max: self.max_message_bytes,
            });
        }
        let tx = self.outbound.lock().await.clone().ok_or(StreamError::SendClosed)?;

        let kind = msg.kind();
        tx.send(msg).await.map_err(|_| StreamError::Closed)?;
        tracing::trace!(peer = %self.peer, msg_type = ?kind, len, "message sent");
        Ok(())
    }

    async fn close_send(&self) -> Result<(), StreamError> {
        if self.outbound.lock().await.take().is_some() {
            tracing::debug!(peer = %self.peer, role = ?self.role, "send side closed");
        }
        Ok(())
    }
}
