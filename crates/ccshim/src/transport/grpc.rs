//! gRPC plumbing shared by both transports.
//!
//! Each side of the peer protocol is a single bidirectional streaming
//! method. `BidiServer` serves one such method over tonic, `open_call`
//! opens one from the client side, and `outbound_queue` is the sending half
//! either way.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tonic::codegen::{http, Body, BoxFuture, Service, StdError};
use tonic::server::{Grpc, NamedService, StreamingService};
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};
use tonic_prost::ProstCodec;

use ccshim_core::ChaincodeMessage;

type Codec = ProstCodec<ChaincodeMessage, ChaincodeMessage>;

/// Messages a served call streams back to its caller.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ChaincodeMessage, Status>> + Send + 'static>>;

/// Sends waiting to go out on one stream before `send` blocks.
const OUTBOUND_QUEUE: usize = 16;

/// Sending half of a call: the queue and the stream that drains it.
pub fn outbound_queue() -> (
    mpsc::Sender<ChaincodeMessage>,
    impl Stream<Item = ChaincodeMessage> + Send + 'static,
) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let drain = futures::stream::unfold(rx, |mut rx| async move {
        let msg = rx.recv().await?;
        Some((msg, rx))
    });
    (tx, drain)
}

/// `outbound_queue` shaped as a server response.
pub fn response_queue() -> (mpsc::Sender<ChaincodeMessage>, ResponseStream) {
    let (tx, drain) = outbound_queue();
    (tx, Box::pin(drain.map(Ok)))
}

/// Open the bidirectional method at `path` on `channel`.
///
/// Resolves once the server has sent response headers. A peer may hold
/// those back until it has read the first message, so callers that must
/// send first run this on its own task.
pub async fn open_call<S>(
    channel: Channel,
    path: &'static str,
    outbound: S,
    max_message_bytes: usize,
) -> Result<Streaming<ChaincodeMessage>, Status>
where
    S: Stream<Item = ChaincodeMessage> + Send + 'static,
{
    let mut grpc = tonic::client::Grpc::new(channel)
        .max_decoding_message_size(max_message_bytes)
        .max_encoding_message_size(max_message_bytes);
    grpc.ready()
        .await
        .map_err(|e| Status::unavailable(format!("connection not ready: {e}")))?;

    let path = http::uri::PathAndQuery::from_static(path);
    let response = grpc
        .streaming(Request::new(outbound), path, Codec::default())
        .await?;
    Ok(response.into_inner())
}

// ── Server side ───────────────────────────────────────────────────────────────

/// One bidirectional streaming method.
pub trait BidiMethod: Send + Sync + 'static {
    /// Fully qualified service name.
    const SERVICE: &'static str;
    /// Request path, `/<service>/<method>`.
    const PATH: &'static str;

    /// Take over a new call. The returned stream is sent back to the caller.
    fn open(&self, request: Request<Streaming<ChaincodeMessage>>) -> Result<ResponseStream, Status>;
}

/// tonic service exposing a single `BidiMethod`. Any other path gets
/// `UNIMPLEMENTED`.
pub struct BidiServer<M> {
    method: Arc<M>,
    max_message_bytes: usize,
}

impl<M> BidiServer<M> {
    pub fn new(method: M, max_message_bytes: usize) -> Self {
        Self {
            method: Arc::new(method),
            max_message_bytes,
        }
    }
}

impl<M> Clone for BidiServer<M> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            max_message_bytes: self.max_message_bytes,
        }
    }
}

impl<M: BidiMethod> NamedService for BidiServer<M> {
    const NAME: &'static str = M::SERVICE;
}

struct Call<M>(Arc<M>);

impl<M: BidiMethod> StreamingService<ChaincodeMessage> for Call<M> {
    type Response = ChaincodeMessage;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<Response<ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<ChaincodeMessage>>) -> Self::Future {
        let method = self.0.clone();
        Box::pin(async move { method.open(request).map(Response::new) })
    }
}

impl<M, B> Service<http::Request<B>> for BidiServer<M>
where
    M: BidiMethod,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if req.uri().path() != M::PATH {
            let status = Status::unimplemented(format!("{} serves only {}", M::SERVICE, M::PATH));
            return Box::pin(async move { Ok(status.into_http()) });
        }

        let call = Call(self.method.clone());
        let limit = self.max_message_bytes;
        Box::pin(async move {
            let mut grpc = Grpc::new(Codec::default())
                .max_decoding_message_size(limit)
                .max_encoding_message_size(limit);
            Ok(grpc.streaming(call, req).await)
        })
    }
}
