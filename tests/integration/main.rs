//! ccshim integration test harness.
//!
//! Tests in this crate run the chaincode side through its public entry
//! points over loopback gRPC. The peer side is `FakePeer`: one end of a
//! `Register` call the chaincode opened (dial mode) or of a `Connect` call
//! the test opened (listen mode).
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tonic::transport::{Endpoint, Server, ServerTlsConfig};
use tonic::{Request, Status, Streaming};

use ccshim::transport::grpc::{open_call, outbound_queue, response_queue, BidiMethod, BidiServer, ResponseStream};
use ccshim::{MessageHandler, SendOutcomes, SessionSender};
use ccshim_core::wire::{CHAINCODE_SUPPORT_SERVICE, CONNECT_PATH, DEFAULT_MAX_MESSAGE_BYTES, REGISTER_PATH};
use ccshim_core::{ChaincodeId, ChaincodeMessage, MessageType, ShimConfig};

mod listen;

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

// ── Fake peer ─────────────────────────────────────────────────────────────────

/// Peer end of one chaincode stream.
pub struct FakePeer {
    outbound: Option<mpsc::Sender<ChaincodeMessage>>,
    inbound: Streaming<ChaincodeMessage>,
}

impl FakePeer {
    /// Open `Chaincode/Connect` on a listening chaincode.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let channel = tokio::time::timeout(
            WAIT,
            Endpoint::from_shared(format!("http://{addr}"))?.connect(),
        )
        .await
        .context("connect timed out")??;
        let (tx, outbound) = outbound_queue();
        let inbound = open_call(channel, CONNECT_PATH, outbound, DEFAULT_MAX_MESSAGE_BYTES).await?;
        Ok(Self {
            outbound: Some(tx),
            inbound,
        })
    }

    pub async fn recv(&mut self) -> Result<ChaincodeMessage> {
        match tokio::time::timeout(WAIT, self.inbound.message())
            .await
            .context("timed out waiting for chaincode")??
        {
            Some(msg) => Ok(msg),
            None => bail!("chaincode closed its send side"),
        }
    }

    pub async fn send(&mut self, msg: ChaincodeMessage) -> Result<()> {
        let tx = self.outbound.as_ref().context("already hung up")?;
        tx.send(msg).await.context("call is gone")?;
        Ok(())
    }

    /// First message must be REGISTER; returns the registered name.
    pub async fn expect_register(&mut self) -> Result<String> {
        let msg = self.recv().await?;
        if msg.kind() != MessageType::Register {
            bail!("expected REGISTER first, got {:?}", msg.kind());
        }
        Ok(ChaincodeId::from_bytes(&msg.payload)?.name)
    }

    /// Invoke the chaincode and wait for its reply.
    pub async fn invoke(&mut self, txid: &str, args: &[u8]) -> Result<ChaincodeMessage> {
        self.send(
            ChaincodeMessage::new(MessageType::Transaction, args.to_vec())
                .with_correlation(txid, "testchannel"),
        )
        .await?;
        self.recv().await
    }

    /// The chaincode closed its send side and the call ended cleanly.
    pub async fn expect_closed(&mut self) -> Result<()> {
        match tokio::time::timeout(WAIT, self.inbound.message()).await {
            Ok(Ok(None)) => Ok(()),
            Ok(Err(status)) => bail!("expected clean close, got {status}"),
            Ok(Ok(Some(msg))) => bail!("expected clean close, got {:?}", msg.kind()),
            Err(_) => bail!("chaincode never closed its send side"),
        }
    }

    /// Close our send direction, as a peer ending the session does.
    pub fn hang_up(&mut self) {
        self.outbound = None;
    }
}

/// Peer side of `ChaincodeSupport/Register`: every call the chaincode
/// opens becomes a `FakePeer` handed to the test.
struct Support(mpsc::UnboundedSender<FakePeer>);

impl BidiMethod for Support {
    const SERVICE: &'static str = CHAINCODE_SUPPORT_SERVICE;
    const PATH: &'static str = REGISTER_PATH;

    fn open(&self, request: Request<Streaming<ChaincodeMessage>>) -> Result<ResponseStream, Status> {
        let (tx, responses) = response_queue();
        let peer = FakePeer {
            outbound: Some(tx),
            inbound: request.into_inner(),
        };
        self.0
            .send(peer)
            .map_err(|_| Status::unavailable("test is over"))?;
        Ok(responses)
    }
}

/// A peer waiting for chaincode to dial it.
pub struct PeerSupport {
    pub addr: SocketAddr,
    calls: mpsc::UnboundedReceiver<FakePeer>,
}

impl PeerSupport {
    pub async fn start(tls: Option<ServerTlsConfig>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await.map(|(tcp, _)| tcp);
            Some((accepted, listener))
        });

        let (tx, calls) = mpsc::unbounded_channel();
        let mut server = Server::builder();
        if let Some(tls) = tls {
            server = server.tls_config(tls).unwrap();
        }
        let router = server.add_service(BidiServer::new(Support(tx), DEFAULT_MAX_MESSAGE_BYTES));
        tokio::spawn(router.serve_with_incoming(Box::pin(incoming)));

        Self { addr, calls }
    }

    /// The next call a chaincode opened.
    pub async fn accept(&mut self) -> FakePeer {
        tokio::time::timeout(WAIT, self.calls.recv())
            .await
            .expect("chaincode never opened its stream")
            .expect("peer server stopped")
    }
}

// ── Chaincode side ────────────────────────────────────────────────────────────

/// Completes every invocation with its arguments.
pub struct Echo {
    sender: SessionSender,
}

impl Echo {
    pub fn new(sender: SessionSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl MessageHandler for Echo {
    async fn handle_message(&mut self, msg: ChaincodeMessage, outcomes: &SendOutcomes) -> anyhow::Result<()> {
        match msg.kind() {
            MessageType::Registered | MessageType::Ready => {}
            MessageType::Init | MessageType::Transaction => {
                let reply = ChaincodeMessage::new(MessageType::Completed, msg.payload)
                    .with_correlation(msg.txid, msg.channel_id);
                outcomes.spawn_send(&self.sender, reply);
            }
            other => bail!("unexpected {other:?}"),
        }
        Ok(())
    }
}

pub fn config(name: &str) -> ShimConfig {
    let mut config = ShimConfig::default();
    config.chaincode.id_name = name.to_string();
    config
}

/// A free loopback port nobody listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
