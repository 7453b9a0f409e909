//! ccshim-core: envelope types, wire constants and configuration.
//! The session crates build on this one.

pub mod config;
pub mod message;
pub mod wire;

pub use config::{ConfigError, ShimConfig};
pub use message::{ChaincodeId, ChaincodeMessage, MessageType};
pub use wire::StreamError;
