#![allow(dead_code, unused_imports)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use tonic::{metadata::MetadataMap, Status};
use tonic_load::{
    invoke::{BidiStream, ClientStream, Invoke, RequestSink, ResponseStream},
    payload::{PayloadDecoder, ProtoDecoder},
    CallScope, DecodeError, Error, PayloadFormat,
};

#[path = "../../src/testing/fixtures.rs"]
mod fixtures;

pub(crate) use self::fixtures::{method, name_of, ping, ping_descriptor, trace_init};

/// One call seen by a [`Recorder`].
#[derive(Clone, Debug)]
pub struct Recorded {
    pub inputs: Vec<String>,
    pub metadata: MetadataMap,
}

impl Recorded {
    pub fn header(&self, key: &str) -> Option<String> {
        self.metadata
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    }
}

#[derive(Debug, Default)]
struct Inner {
    calls: Mutex<Vec<Recorded>>,
    started: AtomicUsize,
    completed: AtomicUsize,
    delay: Duration,
    error: Option<Status>,
}

/// An [`Invoke`] recording the inputs and metadata of every call.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder::default()
    }

    /// Every call takes `delay` to complete.
    pub fn with_delay(delay: Duration) -> Self {
        Recorder {
            inner: Arc::new(Inner {
                delay,
                ..Default::default()
            }),
        }
    }

    /// Every call fails with `status`.
    pub fn failing(status: Status) -> Self {
        Recorder {
            inner: Arc::new(Inner {
                error: Some(status),
                ..Default::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// First input name of every call, in the order calls completed.
    pub fn names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.inputs.into_iter().next().unwrap_or_default())
            .collect()
    }

    pub fn started(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }

    async fn complete(&self, inputs: Vec<String>, scope: &CallScope) -> Result<(), Status> {
        self.inner.started.fetch_add(1, Ordering::SeqCst);
        if !self.inner.delay.is_zero() {
            tokio::time::sleep(self.inner.delay).await;
        }

        self.inner.calls.lock().unwrap().push(Recorded {
            inputs,
            metadata: scope.metadata().clone(),
        });
        self.inner.completed.fetch_add(1, Ordering::SeqCst);

        match &self.inner.error {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Invoke for Recorder {
    async fn unary(
        &self,
        _method: &MethodDescriptor,
        scope: &CallScope,
        input: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        self.complete(vec![name_of(&input)], scope).await?;
        Ok(input)
    }

    async fn client_streaming(
        &self,
        _method: &MethodDescriptor,
        scope: &CallScope,
    ) -> Result<Box<dyn ClientStream>, Status> {
        Ok(Box::new(Collect {
            recorder: self.clone(),
            metadata: scope.metadata().clone(),
            inputs: Vec::new(),
        }))
    }

    async fn server_streaming(
        &self,
        _method: &MethodDescriptor,
        scope: &CallScope,
        input: DynamicMessage,
    ) -> Result<Box<dyn ResponseStream>, Status> {
        self.complete(vec![name_of(&input)], scope).await?;
        Ok(Box::new(Ended))
    }

    async fn bidi_streaming(
        &self,
        _method: &MethodDescriptor,
        scope: &CallScope,
    ) -> Result<BidiStream, Status> {
        let sink = Collect {
            recorder: self.clone(),
            metadata: scope.metadata().clone(),
            inputs: Vec::new(),
        };
        Ok(BidiStream::new(Box::new(sink), Box::new(Ended)))
    }
}

/// A response stream with nothing in it.
struct Ended;

#[async_trait]
impl ResponseStream for Ended {
    async fn recv(&mut self) -> Result<Option<DynamicMessage>, Status> {
        Ok(None)
    }
}

struct Collect {
    recorder: Recorder,
    metadata: MetadataMap,
    inputs: Vec<String>,
}

impl Collect {
    fn finish(&mut self) {
        self.recorder.inner.calls.lock().unwrap().push(Recorded {
            inputs: std::mem::take(&mut self.inputs),
            metadata: self.metadata.clone(),
        });
    }
}

#[async_trait]
impl ClientStream for Collect {
    async fn send(&mut self, message: DynamicMessage) -> Result<(), Error> {
        self.inputs.push(name_of(&message));
        Ok(())
    }

    async fn close_and_receive(&mut self) -> Result<DynamicMessage, Status> {
        self.finish();
        Ok(ping("done"))
    }
}

#[async_trait]
impl RequestSink for Collect {
    async fn send(&mut self, message: DynamicMessage) -> Result<(), Error> {
        self.inputs.push(name_of(&message));
        Ok(())
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        self.finish();
        Ok(())
    }
}

/// A [`ProtoDecoder`] counting how often it is used.
#[derive(Clone, Debug, Default)]
pub struct CountingDecoder {
    calls: Arc<AtomicUsize>,
}

impl CountingDecoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PayloadDecoder for CountingDecoder {
    fn decode(
        &self,
        data: &[u8],
        format: PayloadFormat,
        input: &MessageDescriptor,
    ) -> Result<Vec<DynamicMessage>, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ProtoDecoder.decode(data, format, input)
    }
}
