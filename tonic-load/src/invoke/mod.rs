//! The boundary between the request core and the network.
//!
//! An [`Invoke`] implementation performs the actual calls for a method
//! descriptor. Streaming calls hand back small handles the protocol adapters
//! drive message by message. [`ChannelInvoker`] implements it on top of a
//! `tonic` channel; tests and other transports can provide their own.

mod channel;
mod codec;

pub use self::channel::ChannelInvoker;
pub use self::codec::{DynamicCodec, DynamicDecoder, DynamicEncoder};

use async_trait::async_trait;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use tonic::Status;

use crate::{error::Error, scope::CallScope};

/// Performs calls of any shape against a remote method.
#[async_trait]
pub trait Invoke: Send + Sync {
    /// Sends a single message and waits for the single response.
    async fn unary(
        &self,
        method: &MethodDescriptor,
        scope: &CallScope,
        input: DynamicMessage,
    ) -> Result<DynamicMessage, Status>;

    /// Opens a stream of requests answered by a single response.
    async fn client_streaming(
        &self,
        method: &MethodDescriptor,
        scope: &CallScope,
    ) -> Result<Box<dyn ClientStream>, Status>;

    /// Sends a single message and opens the stream of responses.
    async fn server_streaming(
        &self,
        method: &MethodDescriptor,
        scope: &CallScope,
        input: DynamicMessage,
    ) -> Result<Box<dyn ResponseStream>, Status>;

    /// Opens a full duplex stream.
    async fn bidi_streaming(
        &self,
        method: &MethodDescriptor,
        scope: &CallScope,
    ) -> Result<BidiStream, Status>;
}

/// The sending side of a client streaming call.
#[async_trait]
pub trait ClientStream: Send {
    /// Sends one message.
    ///
    /// Fails with [`Error::EndOfStream`] once the remote side has finished
    /// the call; the outcome is then only available through
    /// [`close_and_receive`](ClientStream::close_and_receive).
    async fn send(&mut self, message: DynamicMessage) -> Result<(), Error>;

    /// Half-closes the stream and waits for the response.
    async fn close_and_receive(&mut self) -> Result<DynamicMessage, Status>;
}

/// Responses of a server streaming or bidi call.
#[async_trait]
pub trait ResponseStream: Send {
    /// The next response, `None` once the stream ended successfully.
    async fn recv(&mut self) -> Result<Option<DynamicMessage>, Status>;
}

/// The sending side of a bidi call.
#[async_trait]
pub trait RequestSink: Send {
    /// Sends one message, failing with [`Error::EndOfStream`] once the
    /// remote side has finished the call.
    async fn send(&mut self, message: DynamicMessage) -> Result<(), Error>;

    /// Half-closes the stream. Sending afterwards fails.
    async fn close_send(&mut self) -> Result<(), Status>;
}

/// Both halves of an open bidi call, usable from separate tasks.
pub struct BidiStream {
    pub sink: Box<dyn RequestSink>,
    pub responses: Box<dyn ResponseStream>,
}

impl BidiStream {
    pub fn new(sink: Box<dyn RequestSink>, responses: Box<dyn ResponseStream>) -> Self {
        BidiStream { sink, responses }
    }
}

impl std::fmt::Debug for BidiStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BidiStream").finish_non_exhaustive()
    }
}
