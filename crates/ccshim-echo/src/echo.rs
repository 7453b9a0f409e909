//! Echo chaincode: completes every invocation with its own arguments.

use async_trait::async_trait;

use ccshim::{MessageHandler, SendOutcomes, SessionSender};
use ccshim_core::{ChaincodeMessage, MessageType};

pub struct EchoHandler {
    sender: SessionSender,
    completed: u64,
}

impl EchoHandler {
    pub fn new(sender: SessionSender) -> Self {
        Self { sender, completed: 0 }
    }
}

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle_message(
        &mut self,
        msg: ChaincodeMessage,
        outcomes: &SendOutcomes,
    ) -> anyhow::Result<()> {
        match msg.kind() {
            MessageType::Registered | MessageType::Ready => {
                tracing::info!(state = ?msg.kind(), "peer acknowledged chaincode");
            }
            MessageType::Keepalive => {
                outcomes.spawn_send(&self.sender, msg);
            }
            MessageType::Init | MessageType::Transaction => {
                let reply = ChaincodeMessage::new(MessageType::Completed, msg.payload)
                    .with_correlation(msg.txid, msg.channel_id);
                self.completed += 1;
                tracing::debug!(txid = %reply.txid, completed = self.completed, "completing");
                outcomes.spawn_send(&self.sender, reply);
            }
            other => anyhow::bail!("unexpected {other:?} message from peer"),
        }
        Ok(())
    }
}
