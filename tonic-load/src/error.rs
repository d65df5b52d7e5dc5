use std::{fmt, slice, vec};

use tokio::task::JoinError;
use tonic::{
    metadata::errors::{InvalidMetadataKey, InvalidMetadataValue},
    Status,
};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while issuing a single request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resolved payload set was empty, nothing was sent.
    #[error("no data provided for request")]
    NoPayload,
    /// The payload bytes could not be turned into input messages.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] DecodeError),
    /// A payload or metadata template could not be expanded.
    #[error("failed to expand template: {0}")]
    Template(#[from] TemplateError),
    #[error("invalid metadata key `{key}`: {source}")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("invalid metadata value for key `{key}`: {source}")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
    /// The invocation failed, this includes transport failures, expired
    /// deadlines and error statuses returned by the remote service.
    #[error(transparent)]
    Invocation(#[from] Status),
    /// The remote side closed the stream while messages were still being sent.
    #[error("stream closed by remote")]
    EndOfStream,
    /// A concurrently issued request panicked or was aborted.
    #[error("request task failed: {0}")]
    Task(#[from] JoinError),
}

impl Error {
    /// Returns the gRPC status of an invocation failure.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Invocation(status) => Some(status),
            _ => None,
        }
    }
}

/// Errors raised by a [`PayloadDecoder`](crate::payload::PayloadDecoder).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON does not match message `{message}`: {source}")]
    Message {
        message: String,
        source: serde_json::Error,
    },
    #[error("JSON payload must be an object or an array of objects")]
    Shape,
    #[error("invalid binary message: {0}")]
    Binary(#[from] prost::DecodeError),
    #[error(transparent)]
    Other(BoxError),
}

impl DecodeError {
    /// Wraps an error from a custom decoder.
    pub fn other(source: impl Into<BoxError>) -> Self {
        DecodeError::Other(source.into())
    }
}

/// Errors raised by a [`TemplateEngine`](crate::template::TemplateEngine).
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unclosed template action starting at byte {0}")]
    Unclosed(usize),
    #[error("unknown template field `{0}`")]
    UnknownField(String),
    #[error("unsupported template action `{0}`")]
    Unsupported(String),
    #[error("template is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("metadata must be a JSON object of string values: {0}")]
    Metadata(#[source] serde_json::Error),
    #[error(transparent)]
    Other(BoxError),
}

impl TemplateError {
    /// Wraps an error from a custom template engine.
    pub fn other(source: impl Into<BoxError>) -> Self {
        TemplateError::Other(source.into())
    }
}

/// All errors collected over a sequential run, in the order they happened.
#[derive(Debug, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn new() -> Self {
        Errors(Vec::new())
    }

    pub fn push(&mut self, error: Error) {
        self.0.push(error);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Error> {
        self.0.last()
    }

    pub fn iter(&self) -> slice::Iter<'_, Error> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Error> {
        self.0
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), Errors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            fmt::Display::fmt(error, f)?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

impl From<Error> for Errors {
    fn from(error: Error) -> Self {
        Errors(vec![error])
    }
}

impl Extend<Error> for Errors {
    fn extend<T: IntoIterator<Item = Error>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a Error;
    type IntoIter = slice::Iter<'a, Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
