use async_trait::async_trait;
use http::uri::PathAndQuery;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    client::Grpc,
    codec::{CompressionEncoding, Streaming},
    transport::Channel,
    Response, Status,
};

use super::{BidiStream, ClientStream, DynamicCodec, Invoke, RequestSink, ResponseStream};
use crate::{error::Error, scope::CallScope};

/// An [`Invoke`] implementation issuing calls over a `tonic` [`Channel`].
///
/// ```no_run
/// # async fn connect() -> Result<(), Box<dyn std::error::Error>> {
/// use tonic::transport::Endpoint;
/// use tonic_load::invoke::ChannelInvoker;
///
/// let channel = Endpoint::from_static("http://[::1]:50051").connect().await?;
/// let invoker = ChannelInvoker::new(channel);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChannelInvoker {
    grpc: Grpc<Channel>,
}

impl ChannelInvoker {
    pub fn new(channel: Channel) -> Self {
        ChannelInvoker {
            grpc: Grpc::new(channel),
        }
    }

    async fn ready(&self, scope: &CallScope) -> Result<Grpc<Channel>, Status> {
        let mut grpc = self.grpc.clone();
        if scope.compression() {
            grpc = grpc
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }

        grpc.ready()
            .await
            .map_err(|err| Status::unavailable(format!("service was not ready: {}", err)))?;

        Ok(grpc)
    }
}

impl std::fmt::Debug for ChannelInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelInvoker").finish_non_exhaustive()
    }
}

#[async_trait]
impl Invoke for ChannelInvoker {
    async fn unary(
        &self,
        method: &MethodDescriptor,
        scope: &CallScope,
        input: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        let mut grpc = self.ready(scope).await?;
        let path = http_path(method)?;

        let response = grpc
            .unary(scope.request(input), path, DynamicCodec::new(method))
            .await?;

        Ok(response.into_inner())
    }

    async fn client_streaming(
        &self,
        method: &MethodDescriptor,
        scope: &CallScope,
    ) -> Result<Box<dyn ClientStream>, Status> {
        let mut grpc = self.ready(scope).await?;
        let path = http_path(method)?;
        let codec = DynamicCodec::new(method);

        let (tx, rx) = mpsc::channel(1);
        let request = scope.request(ReceiverStream::new(rx));
        let deadline = scope.deadline().clone();

        let call = tokio::spawn(async move {
            deadline
                .run(async {
                    grpc.client_streaming(request, path, codec)
                        .await
                        .map(Response::into_inner)
                })
                .await
        });

        Ok(Box::new(ChannelClientStream {
            tx: Some(tx),
            call: Some(call),
        }))
    }

    async fn server_streaming(
        &self,
        method: &MethodDescriptor,
        scope: &CallScope,
        input: DynamicMessage,
    ) -> Result<Box<dyn ResponseStream>, Status> {
        let mut grpc = self.ready(scope).await?;
        let path = http_path(method)?;

        let response = grpc
            .server_streaming(scope.request(input), path, DynamicCodec::new(method))
            .await?;

        Ok(Box::new(ChannelResponses::Open(response.into_inner())))
    }

    async fn bidi_streaming(
        &self,
        method: &MethodDescriptor,
        scope: &CallScope,
    ) -> Result<BidiStream, Status> {
        let mut grpc = self.ready(scope).await?;
        let path = http_path(method)?;
        let codec = DynamicCodec::new(method);

        let (tx, rx) = mpsc::channel(1);
        let request = scope.request(ReceiverStream::new(rx));
        let deadline = scope.deadline().clone();

        // Response headers may only arrive once the first messages are sent,
        // so the call is driven in the background and the response stream
        // resolves it lazily.
        let call = tokio::spawn(async move {
            deadline
                .run(async {
                    grpc.streaming(request, path, codec)
                        .await
                        .map(Response::into_inner)
                })
                .await
        });

        Ok(BidiStream::new(
            Box::new(ChannelSink { tx: Some(tx) }),
            Box::new(ChannelResponses::Pending(call)),
        ))
    }
}

fn http_path(method: &MethodDescriptor) -> Result<PathAndQuery, Status> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    PathAndQuery::try_from(path)
        .map_err(|err| Status::internal(format!("invalid method path: {}", err)))
}

async fn join<T>(call: &mut JoinHandle<Result<T, Status>>) -> Result<T, Status> {
    match call.await {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(Status::cancelled("call was aborted")),
        Err(err) => Err(Status::internal(format!("call task failed: {}", err))),
    }
}

struct ChannelClientStream {
    tx: Option<mpsc::Sender<DynamicMessage>>,
    call: Option<JoinHandle<Result<DynamicMessage, Status>>>,
}

#[async_trait]
impl ClientStream for ChannelClientStream {
    async fn send(&mut self, message: DynamicMessage) -> Result<(), Error> {
        let tx = self.tx.as_ref().ok_or(Error::EndOfStream)?;
        // The receiving half is dropped once the call has finished.
        tx.send(message).await.map_err(|_| Error::EndOfStream)
    }

    async fn close_and_receive(&mut self) -> Result<DynamicMessage, Status> {
        self.tx = None;
        match self.call.as_mut() {
            Some(call) => {
                let response = join(call).await;
                self.call = None;
                response
            }
            None => Err(Status::failed_precondition("stream was already closed")),
        }
    }
}

impl Drop for ChannelClientStream {
    fn drop(&mut self) {
        if let Some(call) = &self.call {
            call.abort();
        }
    }
}

struct ChannelSink {
    tx: Option<mpsc::Sender<DynamicMessage>>,
}

#[async_trait]
impl RequestSink for ChannelSink {
    async fn send(&mut self, message: DynamicMessage) -> Result<(), Error> {
        let tx = self.tx.as_ref().ok_or(Error::EndOfStream)?;
        tx.send(message).await.map_err(|_| Error::EndOfStream)
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        self.tx = None;
        Ok(())
    }
}

enum ChannelResponses {
    Pending(JoinHandle<Result<Streaming<DynamicMessage>, Status>>),
    Open(Streaming<DynamicMessage>),
    Failed,
}

#[async_trait]
impl ResponseStream for ChannelResponses {
    async fn recv(&mut self) -> Result<Option<DynamicMessage>, Status> {
        if let ChannelResponses::Pending(call) = self {
            let opened = join(call).await;
            match opened {
                Ok(streaming) => *self = ChannelResponses::Open(streaming),
                Err(status) => {
                    *self = ChannelResponses::Failed;
                    return Err(status);
                }
            }
        }

        match self {
            ChannelResponses::Open(streaming) => streaming.message().await,
            _ => Ok(None),
        }
    }
}

impl Drop for ChannelResponses {
    fn drop(&mut self) {
        if let ChannelResponses::Pending(call) = self {
            call.abort();
        }
    }
}
