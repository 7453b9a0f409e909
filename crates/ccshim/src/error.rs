//! Session error taxonomy.

use std::fmt;

use ccshim_core::{ConfigError, StreamError};

/// Which step of the session produced a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Listen,
    Dial,
    Accept,
    Register,
    Receive,
    Send,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Listen => "listen",
            Phase::Dial => "dial",
            Phase::Accept => "accept",
            Phase::Register => "register",
            Phase::Receive => "receive",
            Phase::Send => "send",
        };
        f.write_str(s)
    }
}

/// Coarse classification of a `SessionError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Protocol,
    Serialization,
    StreamEnded,
}

/// Why a session (or the process-level serve loop) ended.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{phase} failed: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: StreamError,
    },

    #[error("received empty message, ending chaincode stream")]
    EmptyMessage,

    /// The handler refused an inbound message.
    #[error("error handling message: {0}")]
    Rejected(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("error encoding chaincode id during registration: {0}")]
    Serialization(#[source] prost::EncodeError),

    /// The peer hung up cleanly.
    #[error("received EOF, ending chaincode stream")]
    StreamEnded,
}

impl SessionError {
    pub fn transport(phase: Phase, source: impl Into<StreamError>) -> Self {
        SessionError::Transport {
            phase,
            source: source.into(),
        }
    }

    pub fn rejected(err: anyhow::Error) -> Self {
        SessionError::Rejected(err.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Config(_) => ErrorKind::Configuration,
            SessionError::Transport { .. } => ErrorKind::Transport,
            SessionError::EmptyMessage | SessionError::Rejected(_) => ErrorKind::Protocol,
            SessionError::Serialization(_) => ErrorKind::Serialization,
            SessionError::StreamEnded => ErrorKind::StreamEnded,
        }
    }

    /// Phase of a transport failure, if this is one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SessionError::Transport { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub fn is_stream_ended(&self) -> bool {
        matches!(self, SessionError::StreamEnded)
    }
}
