//! In-memory stream for driving sessions in tests.
//!
//! `MockStream` is the chaincode side and implements `PeerStream`.
//! `MockPeer` is the programmable remote: it feeds inbound results,
//! collects what the chaincode sent and exposes call counters.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use ccshim_core::{ChaincodeMessage, StreamError};

use crate::stream::PeerStream;

type Inbound = Result<ChaincodeMessage, StreamError>;

#[derive(Default)]
struct MockStats {
    recv_calls: AtomicUsize,
    recvs_in_flight: AtomicUsize,
    max_recvs_in_flight: AtomicUsize,
    close_send_calls: AtomicUsize,
    fail_sends: AtomicBool,
}

/// Chaincode half of the mock connection.
pub struct MockStream {
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    outbound: mpsc::UnboundedSender<ChaincodeMessage>,
    stats: Arc<MockStats>,
}

/// Remote half of the mock connection.
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<ChaincodeMessage>,
    stats: Arc<MockStats>,
}

impl MockStream {
    pub fn pair() -> (MockStream, MockPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(MockStats::default());
        (
            MockStream {
                inbound: Mutex::new(in_rx),
                outbound: out_tx,
                stats: stats.clone(),
            },
            MockPeer {
                inbound: Some(in_tx),
                outbound: out_rx,
                stats,
            },
        )
    }
}

struct InFlight<'a>(&'a MockStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a MockStats) -> Self {
        stats.recv_calls.fetch_add(1, Ordering::SeqCst);
        let now = stats.recvs_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_recvs_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.recvs_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerStream for MockStream {
    async fn recv(&self) -> Result<ChaincodeMessage, StreamError> {
        let _in_flight = InFlight::enter(&self.stats);
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.unwrap_or(Err(StreamError::Closed))
    }

    async fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError> {
        if self.stats.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock send failure").into());
        }
        if self.stats.close_send_calls.load(Ordering::SeqCst) > 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "send side closed").into());
        }
        self.outbound
            .send(msg)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "mock peer dropped").into())
    }

    async fn close_send(&self) -> Result<(), StreamError> {
        self.stats.close_send_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MockPeer {
    /// Queue a message for the chaincode's next receive.
    pub fn deliver(&self, msg: ChaincodeMessage) {
        self.push(Ok(msg));
    }

    /// Queue a transport failure for the chaincode's next receive.
    pub fn fail(&self, err: StreamError) {
        self.push(Err(err));
    }

    /// Close the peer's send direction. Receives drain what is queued, then
    /// report end-of-stream.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    fn push(&self, item: Inbound) {
        if let Some(tx) = &self.inbound {
            // receiver lives as long as the MockStream
            let _ = tx.send(item);
        }
    }

    /// Make every following send on the chaincode side fail.
    pub fn fail_sends(&self, fail: bool) {
        self.stats.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Next message the chaincode sent, waiting for it if needed.
    pub async fn next_sent(&mut self) -> Option<ChaincodeMessage> {
        self.outbound.recv().await
    }

    /// Everything the chaincode has sent so far.
    pub fn drain_sent(&mut self) -> Vec<ChaincodeMessage> {
        let mut sent = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            sent.push(msg);
        }
        sent
    }

    pub fn recv_calls(&self) -> usize {
        self.stats.recv_calls.load(Ordering::SeqCst)
    }

    /// Highest number of receives that were ever outstanding at once.
    pub fn max_concurrent_recvs(&self) -> usize {
        self.stats.max_recvs_in_flight.load(Ordering::SeqCst)
    }

    pub fn close_send_calls(&self) -> usize {
        self.stats.close_send_calls.load(Ordering::SeqCst)
    }
}
