//! ccshim: the chaincode side of the peer session. Covers transport selection,
//! REGISTER handshake and the concurrent message pump.

pub mod bootstrap;
pub mod error;
pub mod handler;
pub mod mock;
pub mod session;
pub mod stream;
pub mod transport;

pub use bootstrap::{start, start_in_proc};
pub use error::{ErrorKind, Phase, SessionError};
pub use handler::{HandlerFactory, MessageHandler, SendOutcome, SendOutcomes, SessionSender};
pub use stream::{GrpcStream, PeerStream, Role};
pub use transport::{ChaincodeServer, Dialer, StreamFactory, TransportMode};
