//! What travels between chaincode and peer.
//!
//! Envelopes are exchanged over one bidirectional gRPC stream. When the
//! chaincode dials, it opens `ChaincodeSupport/Register` on the peer; when
//! the peer dials, it opens `Chaincode/Connect` on the chaincode. Both carry
//! `ChaincodeMessage` in each direction.

use std::io;

/// gRPC service the peer exposes to dialing chaincode.
pub const CHAINCODE_SUPPORT_SERVICE: &str = "protos.ChaincodeSupport";

/// Method path of the chaincode-initiated stream.
pub const REGISTER_PATH: &str = "/protos.ChaincodeSupport/Register";

/// gRPC service a listening chaincode exposes to the peer.
pub const CHAINCODE_SERVICE: &str = "protos.Chaincode";

/// Method path of the peer-initiated stream.
pub const CONNECT_PATH: &str = "/protos.Chaincode/Connect";

/// Largest envelope accepted in either direction. Matches the peer's
/// default gRPC message limit.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failures of a single stream operation.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The remote side closed its send direction.
    #[error("stream closed by remote")]
    Closed,

    /// This side already called `close_send`.
    #[error("send side already closed")]
    SendClosed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("message of {len} bytes exceeds limit of {max}")]
    MessageTooLarge { len: usize, max: usize },

    /// The call ended with a non-OK gRPC status.
    #[error("stream failed: {}: {}", .0.code(), .0.message())]
    Status(#[from] tonic::Status),

    /// The HTTP/2 connection could not be set up.
    #[error("connection failed: {0}")]
    Connect(#[from] tonic::transport::Error),

    /// The task driving receives is gone.
    #[error("receive task exited")]
    ReaderGone,
}

impl StreamError {
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamError::Closed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
