//! Assembly of one request: payloads, metadata and scope.

use std::fmt;

use prost_reflect::MethodDescriptor;
use tonic::metadata::{AsciiMetadataKey, BinaryMetadataKey, MetadataMap, MetadataValue};
use tracing::{Instrument, Span};

use crate::{
    config::RunConfig,
    error::Error,
    invoke::Invoke,
    payload::{rotation_index, PayloadSource},
    scope::CallScope,
    stream::Call,
    template::{expand_metadata, CallTemplateData, TemplateEngine},
};

/// The shape of an RPC, derived from its streaming flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidi,
}

impl CallType {
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (true, true) => CallType::Bidi,
            (true, false) => CallType::ClientStreaming,
            (false, true) => CallType::ServerStreaming,
            (false, false) => CallType::Unary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Unary => "unary",
            CallType::ClientStreaming => "client-streaming",
            CallType::ServerStreaming => "server-streaming",
            CallType::Bidi => "bidi",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view of a worker, enough to build and issue one request.
pub(crate) struct CallBuilder<'a> {
    pub(crate) invoker: &'a dyn Invoke,
    pub(crate) method: &'a MethodDescriptor,
    pub(crate) call_type: CallType,
    pub(crate) config: &'a RunConfig,
    pub(crate) worker_id: &'a str,
    pub(crate) templates: &'a dyn TemplateEngine,
    pub(crate) payloads: &'a PayloadSource,
}

impl CallBuilder<'_> {
    /// Issues request `request_number` and drives it to completion.
    pub(crate) async fn make_request(&self, request_number: u64) -> Result<(), Error> {
        let span = if self.config.log {
            tracing::debug_span!(
                "request",
                worker_id = self.worker_id,
                call_type = %self.call_type,
                call = self.method.full_name(),
                request_number
            )
        } else {
            Span::none()
        };

        self.issue(request_number).instrument(span).await
    }

    async fn issue(&self, request_number: u64) -> Result<(), Error> {
        let data = CallTemplateData::new(self.method, self.worker_id, request_number);

        let inputs = self.payloads.resolve(self.config, self.method, &data)?;
        let metadata = self.metadata(&data)?;

        // Dropping the scope when the call returns ends anything still bound to it.
        let scope = CallScope::new(self.config.call_timeout(), metadata, self.config.compression);

        if self.config.log {
            tracing::debug!(input = ?inputs, metadata = ?scope.metadata(), "Making request");
        }

        if inputs.is_empty() {
            return Err(Error::NoPayload);
        }
        let single = || inputs[rotation_index(request_number, inputs.len())].clone();

        let call = Call {
            invoker: self.invoker,
            method: self.method,
            scope: &scope,
            stream_interval: self.config.stream_interval,
            log: self.config.log,
        };

        match self.call_type {
            CallType::Unary => call.unary(single()).await,
            CallType::ClientStreaming => call.client_streaming(&inputs).await,
            CallType::ServerStreaming => call.server_streaming(single()).await,
            CallType::Bidi => call.bidi_streaming(&inputs).await,
        }
    }

    fn metadata(&self, data: &CallTemplateData) -> Result<MetadataMap, Error> {
        let entries = expand_metadata(self.templates, &self.config.metadata, data)?;
        let mut metadata = build_metadata(entries)?;

        if self.config.compression {
            metadata.insert("grpc-accept-encoding", MetadataValue::from_static("gzip"));
        }

        Ok(metadata)
    }
}

/// Converts expanded metadata into outgoing metadata.
///
/// Keys ending in `-bin` carry the raw bytes of their value, every other
/// value must be printable ASCII.
pub(crate) fn build_metadata<I>(entries: I) -> Result<MetadataMap, Error>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut metadata = MetadataMap::new();

    for (key, value) in entries {
        if key.to_ascii_lowercase().ends_with("-bin") {
            let name = BinaryMetadataKey::from_bytes(key.as_bytes())
                .map_err(|source| Error::InvalidMetadataKey { key, source })?;
            metadata.insert_bin(name, MetadataValue::from_bytes(value.as_bytes()));
        } else {
            let name = match AsciiMetadataKey::from_bytes(key.as_bytes()) {
                Ok(name) => name,
                Err(source) => return Err(Error::InvalidMetadataKey { key, source }),
            };
            let value = MetadataValue::try_from(value.as_str())
                .map_err(|source| Error::InvalidMetadataValue { key, source })?;
            metadata.insert(name, value);
        }
    }

    Ok(metadata)
}
