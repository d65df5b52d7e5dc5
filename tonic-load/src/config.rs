use std::time::Duration;

use bytes::Bytes;

/// How the payload bytes of a [`RunConfig`] are interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadFormat {
    /// A JSON object or array of objects, expanded as a template per request.
    #[default]
    Json,
    /// Protobuf encoded messages, decoded once and reused for every request.
    Binary,
}

/// Read-only settings shared by every request a worker issues.
///
/// ```
/// # use std::time::Duration;
/// # use tonic_load::RunConfig;
/// let config = RunConfig::default()
///     .data(r#"{"name": "worker {{.WorkerID}}"}"#)
///     .metadata(r#"{"x-request-id": "{{.RequestNumber}}"}"#)
///     .timeout(Duration::from_secs(20))
///     .compression(true);
/// ```
#[derive(Clone, Debug, Default)]
pub struct RunConfig {
    pub(crate) format: PayloadFormat,
    pub(crate) data: Bytes,
    pub(crate) metadata: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) stream_interval: Duration,
    pub(crate) compression: bool,
    pub(crate) log: bool,
}

impl RunConfig {
    /// Set the payload format, JSON by default.
    pub fn format(self, format: PayloadFormat) -> Self {
        RunConfig { format, ..self }
    }

    /// Set the payload template, or the encoded messages in binary mode.
    pub fn data(self, data: impl Into<Bytes>) -> Self {
        RunConfig {
            data: data.into(),
            ..self
        }
    }

    /// Set the metadata template. Once expanded it must be a JSON object
    /// of string values.
    pub fn metadata(self, metadata: impl Into<String>) -> Self {
        RunConfig {
            metadata: metadata.into(),
            ..self
        }
    }

    /// Bound each call to `timeout`. A zero duration leaves calls unbounded.
    pub fn timeout(self, timeout: Duration) -> Self {
        RunConfig {
            timeout: Some(timeout).filter(|t| !t.is_zero()),
            ..self
        }
    }

    /// Wait `interval` before every message sent on a client or bidi stream.
    pub fn stream_interval(self, interval: Duration) -> Self {
        RunConfig {
            stream_interval: interval,
            ..self
        }
    }

    /// Compress requests with gzip and advertise gzip for responses.
    pub fn compression(self, enabled: bool) -> Self {
        RunConfig {
            compression: enabled,
            ..self
        }
    }

    /// Emit `tracing` records for every step of every call.
    pub fn log(self, enabled: bool) -> Self {
        RunConfig {
            log: enabled,
            ..self
        }
    }

    pub fn payload_format(&self) -> PayloadFormat {
        self.format
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_binary(&self) -> bool {
        self.format == PayloadFormat::Binary
    }
}
