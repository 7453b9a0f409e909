//! Protocol envelope exchanged with the peer.
//!
//! Field tags mirror the peer's protobuf schema. Fields this layer never
//! touches (timestamp, signed proposal, chaincode event) are left out and
//! skipped by the decoder.

use prost::Message;

/// Message discriminator carried in every envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Undefined = 0,
    Register = 1,
    Registered = 2,
    Init = 3,
    Ready = 4,
    Transaction = 5,
    Completed = 6,
    Error = 7,
    GetState = 8,
    PutState = 9,
    DelState = 10,
    InvokeChaincode = 11,
    Response = 13,
    GetStateByRange = 14,
    GetQueryResult = 15,
    QueryStateNext = 16,
    QueryStateClose = 17,
    Keepalive = 18,
    GetHistoryForKey = 19,
    GetStateMetadata = 20,
    PutStateMetadata = 21,
    GetPrivateDataHash = 22,
}

/// One protocol message. Everything except REGISTER is opaque to the shim.
#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeMessage {
    #[prost(enumeration = "MessageType", tag = "1")]
    pub msg_type: i32,

    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,

    /// Transaction id used by the peer to correlate replies.
    #[prost(string, tag = "4")]
    pub txid: String,

    #[prost(string, tag = "7")]
    pub channel_id: String,
}

impl ChaincodeMessage {
    pub fn new(kind: MessageType, payload: Vec<u8>) -> Self {
        Self {
            msg_type: kind as i32,
            payload,
            txid: String::new(),
            channel_id: String::new(),
        }
    }

    /// Attach the correlation fields of the transaction this message belongs to.
    pub fn with_correlation(mut self, txid: impl Into<String>, channel_id: impl Into<String>) -> Self {
        self.txid = txid.into();
        self.channel_id = channel_id.into();
        self
    }

    /// Decoded message type. Values this build does not know map to `Undefined`.
    pub fn kind(&self) -> MessageType {
        MessageType::try_from(self.msg_type).unwrap_or(MessageType::Undefined)
    }

    /// True for the all-default envelope (a zero-length gRPC message).
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Identifies the chaincode to the peer. Sent as the REGISTER payload.
#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeId {
    #[prost(string, tag = "1")]
    pub path: String,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(string, tag = "3")]
    pub version: String,
}

impl ChaincodeId {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            name: name.into(),
            version: String::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, prost::EncodeError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }
}
