//! Dial mode: one outbound connection to the configured peer.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{ClientTlsConfig, Endpoint};

use ccshim_core::config::PeerConfig;
use ccshim_core::{ConfigError, ShimConfig, StreamError};

use super::{tls, StreamFactory};
use crate::error::{Phase, SessionError};
use crate::stream::{GrpcStream, PeerStream};

/// Everything needed to open the client-role stream, resolved from config.
pub struct Dialer {
    address: String,
    endpoint: Endpoint,
    connect_timeout: Duration,
    max_message_bytes: usize,
    tls: bool,
}

impl Dialer {
    /// Fails with a configuration error if the peer address is missing or
    /// unusable, or the TLS material cannot be loaded.
    pub fn from_config(config: &ShimConfig) -> Result<Self, ConfigError> {
        let address = config
            .peer_address()
            .ok_or(ConfigError::MissingPeerAddress)?
            .to_string();
        let tls = if config.peer.tls.enabled {
            Some(tls::client_config(&config.peer.tls)?)
        } else {
            None
        };

        Ok(Self {
            tls: tls.is_some(),
            endpoint: endpoint(&address, &config.peer, tls)?,
            address,
            connect_timeout: Duration::from_secs(config.peer.dial_timeout_secs),
            max_message_bytes: config.wire.max_message_bytes,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect to the peer and open the chaincode stream. No retries.
    pub async fn dial(&self) -> Result<GrpcStream, SessionError> {
        let channel = tokio::time::timeout(self.connect_timeout, self.endpoint.connect())
            .await
            .map_err(|_| {
                dial_error(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", self.address),
                ))
            })?
            .map_err(dial_error)?;

        tracing::info!(peer = %self.address, tls = self.tls, "connected to peer");
        Ok(GrpcStream::dialed(channel, self.address.clone(), self.max_message_bytes))
    }
}

#[async_trait]
impl StreamFactory for Dialer {
    async fn open(&self) -> Result<Arc<dyn PeerStream>, SessionError> {
        Ok(Arc::new(self.dial().await?))
    }
}

fn dial_error(e: impl Into<StreamError>) -> SessionError {
    SessionError::transport(Phase::Dial, e)
}

/// HTTP/2 endpoint for `address` with the configured timeouts and keepalive.
fn endpoint(address: &str, peer: &PeerConfig, tls: Option<ClientTlsConfig>) -> Result<Endpoint, ConfigError> {
    let scheme = if tls.is_some() { "https" } else { "http" };
    let ka = &peer.keepalive;
    let endpoint = Endpoint::from_shared(format!("{scheme}://{address}"))
        .map_err(|e| ConfigError::InvalidAddress(address.to_string(), e.to_string()))?
        .connect_timeout(Duration::from_secs(peer.dial_timeout_secs))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(ka.interval_secs)))
        .http2_keep_alive_interval(Duration::from_secs(ka.interval_secs))
        .keep_alive_timeout(Duration::from_secs(ka.timeout_secs))
        .keep_alive_while_idle(true);

    match tls {
        None => Ok(endpoint),
        Some(tls) => endpoint
            .tls_config(tls)
            .map_err(|e| ConfigError::Tls(format!("client TLS setup: {e}"))),
    }
}
