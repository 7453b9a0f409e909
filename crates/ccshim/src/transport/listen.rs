//! Listen mode: the peer connects to us and opens `Chaincode/Connect`; every
//! call is an independent session.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::Stream;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tonic::transport::Server;
use tonic::{Request, Status, Streaming};

use ccshim_core::config::KeepaliveConfig;
use ccshim_core::wire::{CHAINCODE_SERVICE, CONNECT_PATH};
use ccshim_core::{ChaincodeMessage, ConfigError, ShimConfig};

use super::grpc::{BidiMethod, BidiServer, ResponseStream};
use crate::error::{Phase, SessionError};
use crate::handler::HandlerFactory;
use crate::session;
use crate::stream::GrpcStream;

/// A session running on one peer call.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub peer_addr: Option<SocketAddr>,
    pub established_at: Instant,
}

/// Live sessions keyed by session number.
pub type SessionTable = Arc<DashMap<u64, SessionMeta>>;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

pub struct ChaincodeServer<F> {
    listener: TcpListener,
    keepalive: KeepaliveConfig,
    max_message_bytes: usize,
    sessions: SessionTable,
    acceptor: Acceptor<F>,
}

impl<F: HandlerFactory> ChaincodeServer<F> {
    /// Bind the configured listen address. Failing to bind is fatal.
    pub async fn bind(config: &ShimConfig, name: &str, handlers: Arc<F>) -> Result<Self, SessionError> {
        let address = config.server.listen_address.trim();
        let addr: SocketAddr = address.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::InvalidAddress(address.to_string(), e.to_string())
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SessionError::transport(Phase::Listen, e))?;
        let local = listener
            .local_addr()
            .map_err(|e| SessionError::transport(Phase::Listen, e))?;
        tracing::info!(address = %local, chaincode = name, "listening for peer connections");

        let sessions: SessionTable = Arc::new(DashMap::new());
        Ok(Self {
            listener,
            keepalive: config.peer.keepalive.clone(),
            max_message_bytes: config.wire.max_message_bytes,
            sessions: sessions.clone(),
            acceptor: Acceptor {
                name: Arc::from(name),
                handlers,
                sessions,
                next_id: AtomicU64::new(1),
                max_message_bytes: config.wire.max_message_bytes,
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        self.listener
            .local_addr()
            .map_err(|e| SessionError::transport(Phase::Listen, e))
    }

    /// Shared handle on the live-session table.
    pub fn sessions(&self) -> SessionTable {
        self.sessions.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Serve until `shutdown` fires (`Ok`) or accepting fails (the error).
    ///
    /// Shutdown stops accepting and returns once the sessions still running
    /// have ended. A shutdown channel whose senders are all gone never
    /// fires.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), SessionError> {
        let ChaincodeServer {
            listener,
            keepalive,
            max_message_bytes,
            sessions,
            acceptor,
        } = self;

        let (accept_failed, mut accept_error) = oneshot::channel();
        let serve = Server::builder()
            .add_service(BidiServer::new(acceptor, max_message_bytes))
            .serve_with_incoming_shutdown(
                Box::pin(incoming(listener, keepalive, accept_failed)),
                shutdown_requested(shutdown),
            );
        tokio::pin!(serve);

        let mut status = tokio::time::interval(STATUS_INTERVAL);
        status.tick().await;

        loop {
            tokio::select! {
                served = &mut serve => {
                    if let Ok(e) = accept_error.try_recv() {
                        return Err(SessionError::transport(Phase::Accept, e));
                    }
                    served.map_err(|e| SessionError::transport(Phase::Accept, e))?;
                    tracing::info!(active = sessions.len(), "chaincode server stopped");
                    return Ok(());
                }

                _ = status.tick() => {
                    tracing::debug!(active = sessions.len(), "chaincode server status");
                }
            }
        }
    }
}

// ── Connect calls ─────────────────────────────────────────────────────────────

/// Serves `Chaincode/Connect`, spawning a session per call.
struct Acceptor<F> {
    name: Arc<str>,
    handlers: Arc<F>,
    sessions: SessionTable,
    next_id: AtomicU64,
    max_message_bytes: usize,
}

impl<F: HandlerFactory> BidiMethod for Acceptor<F> {
    const SERVICE: &'static str = CHAINCODE_SERVICE;
    const PATH: &'static str = CONNECT_PATH;

    fn open(&self, request: Request<Streaming<ChaincodeMessage>>) -> Result<ResponseStream, Status> {
        let peer_addr = request.remote_addr();
        let peer = peer_addr.map_or_else(|| "unknown".to_string(), |a| a.to_string());
        let (stream, responses) = GrpcStream::accepted(request.into_inner(), peer, self.max_message_bytes);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            id,
            SessionMeta {
                peer_addr,
                established_at: Instant::now(),
            },
        );
        tracing::info!(session = id, peer = ?peer_addr, "peer opened chaincode stream");

        let name = self.name.clone();
        let handlers = self.handlers.clone();
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let result = session::run_session(&name, Arc::new(stream), handlers.as_ref()).await;
            let lifetime = sessions
                .remove(&id)
                .map(|(_, meta)| meta.established_at.elapsed())
                .unwrap_or_default();
            match result {
                Ok(()) | Err(SessionError::StreamEnded) => {
                    tracing::info!(session = id, ?lifetime, "session ended");
                }
                Err(e) => {
                    tracing::warn!(session = id, ?lifetime, error = %e, "session failed");
                }
            }
        });

        Ok(responses)
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepted connections. The first accept error is handed to `failed` and
/// ends the stream, which stops the server.
fn incoming(
    listener: TcpListener,
    keepalive: KeepaliveConfig,
    failed: oneshot::Sender<io::Error>,
) -> impl Stream<Item = io::Result<TcpStream>> + Send + 'static {
    futures::stream::unfold((listener, keepalive, failed), |(listener, keepalive, failed)| async move {
        match listener.accept().await {
            Ok((tcp, peer_addr)) => {
                tune(&tcp, &keepalive, peer_addr);
                tracing::debug!(%peer_addr, "peer connected");
                Some((Ok(tcp), (listener, keepalive, failed)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed, no longer accepting");
                let _ = failed.send(e);
                None
            }
        }
    })
}

fn tune(tcp: &TcpStream, ka: &KeepaliveConfig, peer_addr: SocketAddr) {
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::debug!(%peer_addr, error = %e, "set_nodelay failed");
    }
    let params = TcpKeepalive::new().with_time(Duration::from_secs(ka.interval_secs));
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    let params = params.with_interval(Duration::from_secs(ka.timeout_secs));
    if let Err(e) = SockRef::from(tcp).set_tcp_keepalive(&params) {
        tracing::debug!(%peer_addr, error = %e, "set_tcp_keepalive failed");
    }
}

/// Resolves when shutdown is requested.
async fn shutdown_requested(mut shutdown: broadcast::Receiver<()>) {
    if let Err(RecvError::Closed) = shutdown.recv().await {
        // nobody is left to ask
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested, no longer accepting");
}
