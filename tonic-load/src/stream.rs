//! Protocol adapters driving one call of each RPC shape.
//!
//! Every adapter runs exactly one call to completion through an [`Invoke`]
//! implementation. Each step of the call (opening it, every send, every
//! receive and closing it) is bounded by the call's [`Deadline`].
//!
//! Client streaming and bidi calls only report failures of their send path.
//! The outcome of closing a client stream and the outcome of receiving on a
//! bidi stream are logged but never returned; completed calls are observed
//! by whatever instrumentation the invoker carries.
//!
//! [`Deadline`]: crate::scope::Deadline

use std::{pin::Pin, time::Duration};

use prost_reflect::{DynamicMessage, MethodDescriptor};
use tokio::time::{self, Instant, Sleep};
use tracing::Instrument;

use crate::{
    error::Error,
    invoke::{BidiStream, Invoke},
    scope::CallScope,
};

/// Waits a fixed interval before each message of a stream, reusing a
/// single timer for the whole stream.
#[derive(Debug)]
pub(crate) struct Pacer {
    interval: Duration,
    timer: Option<Pin<Box<Sleep>>>,
}

impl Pacer {
    pub(crate) fn new(interval: Duration) -> Self {
        Pacer {
            interval,
            timer: None,
        }
    }

    /// Returns after a full interval, or immediately when the interval is zero.
    pub(crate) async fn wait(&mut self) {
        if self.interval.is_zero() {
            return;
        }

        let deadline = Instant::now() + self.interval;
        let timer = self
            .timer
            .get_or_insert_with(|| Box::pin(time::sleep_until(deadline)));
        timer.as_mut().reset(deadline);
        timer.as_mut().await;
    }
}

/// One call about to be driven by an adapter.
pub(crate) struct Call<'a> {
    pub(crate) invoker: &'a dyn Invoke,
    pub(crate) method: &'a MethodDescriptor,
    pub(crate) scope: &'a CallScope,
    pub(crate) stream_interval: Duration,
    pub(crate) log: bool,
}

impl Call<'_> {
    pub(crate) async fn unary(&self, input: DynamicMessage) -> Result<(), Error> {
        let logged = self.log.then(|| input.clone());

        let result = self
            .scope
            .deadline()
            .run(self.invoker.unary(self.method, self.scope, input))
            .await;

        if self.log {
            tracing::debug!(
                input = ?logged,
                metadata = ?self.scope.metadata(),
                response = ?result.as_ref().ok(),
                error = ?result.as_ref().err(),
                "Received response"
            );
        }

        result.map(drop).map_err(Error::from)
    }

    pub(crate) async fn client_streaming(&self, inputs: &[DynamicMessage]) -> Result<(), Error> {
        let deadline = self.scope.deadline();

        let opened = deadline
            .run(self.invoker.client_streaming(self.method, self.scope))
            .await;
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(status) => {
                if self.log {
                    tracing::error!(error = %status, "Invoke client streaming call failed");
                }
                return Err(status.into());
            }
        };

        let mut pacer = Pacer::new(self.stream_interval);

        for payload in inputs {
            pacer.wait().await;

            let result = deadline.run(stream.send(payload.clone())).await;

            if self.log {
                tracing::debug!(payload = ?payload, error = ?result.as_ref().err(), "Send message");
            }

            match result {
                Ok(()) => {}
                // The remote side finished the call early, its outcome is
                // only available by closing the stream.
                Err(Error::EndOfStream) => break,
                Err(err) => return Err(err),
            }
        }

        let closed = deadline.run(stream.close_and_receive()).await;

        if self.log {
            tracing::debug!(
                response = ?closed.as_ref().ok(),
                error = ?closed.as_ref().err(),
                "Close and receive"
            );
        }

        Ok(())
    }

    pub(crate) async fn server_streaming(&self, input: DynamicMessage) -> Result<(), Error> {
        let deadline = self.scope.deadline();
        let logged = self.log.then(|| input.clone());

        let opened = deadline
            .run(self.invoker.server_streaming(self.method, self.scope, input))
            .await;
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(status) => {
                if self.log {
                    tracing::error!(
                        input = ?logged,
                        error = %status,
                        "Invoke server streaming call failed"
                    );
                }
                return Err(status.into());
            }
        };

        loop {
            let result = deadline.run(stream.recv()).await;

            if self.log {
                tracing::debug!(
                    response = ?result.as_ref().ok().and_then(Option::as_ref),
                    error = ?result.as_ref().err(),
                    "Receive message"
                );
            }

            match result {
                Ok(Some(_)) => {}
                Ok(None) => return Ok(()),
                Err(status) => return Err(status.into()),
            }
        }
    }

    pub(crate) async fn bidi_streaming(&self, inputs: &[DynamicMessage]) -> Result<(), Error> {
        let deadline = self.scope.deadline();

        let opened = deadline
            .run(self.invoker.bidi_streaming(self.method, self.scope))
            .await;
        let BidiStream {
            mut sink,
            mut responses,
        } = match opened {
            Ok(stream) => stream,
            Err(status) => {
                if self.log {
                    tracing::error!(error = %status, "Invoke bidi call failed");
                }
                return Err(status.into());
            }
        };

        if inputs.is_empty() {
            let closed = deadline.run(sink.close_send()).await;
            if self.log {
                tracing::debug!(error = ?closed.err(), "Close send");
            }
            return Ok(());
        }

        let receiver = {
            let deadline = deadline.clone();
            let log = self.log;
            tokio::spawn(
                async move {
                    loop {
                        let result = deadline.run(responses.recv()).await;

                        if log {
                            tracing::debug!(
                                response = ?result.as_ref().ok().and_then(Option::as_ref),
                                error = ?result.as_ref().err(),
                                "Receive message"
                            );
                        }

                        if !matches!(result, Ok(Some(_))) {
                            break;
                        }
                    }
                }
                .in_current_span(),
            )
        };

        let mut pacer = Pacer::new(self.stream_interval);
        let mut sent = Ok(());

        for payload in inputs {
            pacer.wait().await;

            let result = deadline.run(sink.send(payload.clone())).await;

            if self.log {
                tracing::debug!(payload = ?payload, error = ?result.as_ref().err(), "Send message");
            }

            if let Err(err) = result {
                sent = Err(err);
                break;
            }
        }

        let closed = deadline.run(sink.close_send()).await;
        if self.log {
            tracing::debug!(error = ?closed.err(), "Close send");
        }

        if let Err(err) = receiver.await {
            if self.log {
                tracing::error!(error = %err, "Receive task failed");
            }
        }

        match sent {
            Err(Error::EndOfStream) => Ok(()),
            sent => sent,
        }
    }
}
