//! REGISTER handshake: the first message on every stream.

use ccshim_core::{ChaincodeId, ChaincodeMessage, MessageType};

use crate::error::{Phase, SessionError};
use crate::handler::SessionSender;

/// Build the REGISTER envelope for `name`.
pub fn register_message(name: &str) -> Result<ChaincodeMessage, SessionError> {
    let payload = ChaincodeId::named(name)
        .to_bytes()
        .map_err(SessionError::Serialization)?;
    Ok(ChaincodeMessage::new(MessageType::Register, payload))
}

/// Identify ourselves to the peer.
pub async fn register(name: &str, sender: &SessionSender) -> Result<(), SessionError> {
    let msg = register_message(name)?;
    sender
        .send(msg)
        .await
        .map_err(|e| SessionError::transport(Phase::Register, e))?;
    tracing::info!(chaincode = name, "sent REGISTER");
    Ok(())
}
