//! Descriptors and a scripted [`Invoke`] shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use tonic::Status;

use crate::{
    error::Error,
    invoke::{BidiStream, ClientStream, Invoke, RequestSink, ResponseStream},
    scope::CallScope,
};

mod fixtures;

pub(crate) use self::fixtures::{method, name_of, ping, trace_init};

/// How a [`Scripted`] invoker behaves.
#[derive(Clone, Debug, Default)]
pub(crate) struct Script {
    pub(crate) open_error: Option<Status>,
    pub(crate) unary_error: Option<Status>,
    pub(crate) end_of_stream_at: Option<usize>,
    pub(crate) send_error_at: Option<(usize, Status)>,
    pub(crate) stall_sends: bool,
    pub(crate) close_error: Option<Status>,
    pub(crate) responses: Vec<Result<&'static str, Status>>,
    pub(crate) response_delay: Duration,
}

/// An [`Invoke`] following a [`Script`] and recording what it was asked.
#[derive(Clone, Debug, Default)]
pub(crate) struct Scripted {
    script: Arc<Script>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    pub(crate) fn new(script: Script) -> Self {
        Scripted {
            script: Arc::new(script),
            events: Arc::default(),
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    async fn send(&self, index: usize, message: DynamicMessage) -> Result<(), Error> {
        if self.script.stall_sends {
            std::future::pending::<()>().await;
        }

        let name = name_of(&message);
        if self.script.end_of_stream_at == Some(index) {
            self.record(format!("send {} eof", name));
            return Err(Error::EndOfStream);
        }
        if let Some((at, status)) = &self.script.send_error_at {
            if *at == index {
                self.record(format!("send {} failed", name));
                return Err(status.clone().into());
            }
        }

        self.record(format!("send {}", name));
        Ok(())
    }

    fn close(&self) -> Result<(), Status> {
        self.record("close");
        match &self.script.close_error {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        }
    }

    fn responses(&self) -> Box<dyn ResponseStream> {
        Box::new(Responses {
            invoker: self.clone(),
            queue: self.script.responses.iter().cloned().collect(),
        })
    }
}

#[async_trait]
impl Invoke for Scripted {
    async fn unary(
        &self,
        _method: &MethodDescriptor,
        _scope: &CallScope,
        input: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        self.record(format!("unary {}", name_of(&input)));
        match &self.script.unary_error {
            Some(status) => Err(status.clone()),
            None => Ok(input),
        }
    }

    async fn client_streaming(
        &self,
        _method: &MethodDescriptor,
        _scope: &CallScope,
    ) -> Result<Box<dyn ClientStream>, Status> {
        self.record("open");
        if let Some(status) = &self.script.open_error {
            return Err(status.clone());
        }
        Ok(Box::new(Sends {
            invoker: self.clone(),
            sent: 0,
        }))
    }

    async fn server_streaming(
        &self,
        _method: &MethodDescriptor,
        _scope: &CallScope,
        input: DynamicMessage,
    ) -> Result<Box<dyn ResponseStream>, Status> {
        self.record(format!("open {}", name_of(&input)));
        if let Some(status) = &self.script.open_error {
            return Err(status.clone());
        }
        Ok(self.responses())
    }

    async fn bidi_streaming(
        &self,
        _method: &MethodDescriptor,
        _scope: &CallScope,
    ) -> Result<BidiStream, Status> {
        self.record("open");
        if let Some(status) = &self.script.open_error {
            return Err(status.clone());
        }
        Ok(BidiStream::new(
            Box::new(Sends {
                invoker: self.clone(),
                sent: 0,
            }),
            self.responses(),
        ))
    }
}

struct Sends {
    invoker: Scripted,
    sent: usize,
}

impl Sends {
    async fn next(&mut self, message: DynamicMessage) -> Result<(), Error> {
        let index = self.sent;
        self.sent += 1;
        self.invoker.send(index, message).await
    }
}

#[async_trait]
impl ClientStream for Sends {
    async fn send(&mut self, message: DynamicMessage) -> Result<(), Error> {
        self.next(message).await
    }

    async fn close_and_receive(&mut self) -> Result<DynamicMessage, Status> {
        self.invoker.close().map(|()| ping("done"))
    }
}

#[async_trait]
impl RequestSink for Sends {
    async fn send(&mut self, message: DynamicMessage) -> Result<(), Error> {
        self.next(message).await
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        self.invoker.close()
    }
}

struct Responses {
    invoker: Scripted,
    queue: VecDeque<Result<&'static str, Status>>,
}

#[async_trait]
impl ResponseStream for Responses {
    async fn recv(&mut self) -> Result<Option<DynamicMessage>, Status> {
        if !self.invoker.script.response_delay.is_zero() {
            tokio::time::sleep(self.invoker.script.response_delay).await;
        }

        match self.queue.pop_front() {
            Some(Ok(name)) => {
                self.invoker.record(format!("recv {}", name));
                Ok(Some(ping(name)))
            }
            Some(Err(status)) => {
                self.invoker.record("recv failed");
                Err(status)
            }
            None => {
                self.invoker.record("recv end");
                Ok(None)
            }
        }
    }
}
