//! Per-request templating of payloads and metadata.
//!
//! Every request gets its own [`CallTemplateData`]. Payload and metadata
//! templates are expanded against it by a [`TemplateEngine`] before the
//! request is built, so values such as `{{.RequestNumber}}` differ from one
//! request to the next.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use prost_reflect::MethodDescriptor;

use crate::error::TemplateError;

/// Values a template can refer to while a single request is being built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallTemplateData {
    pub worker_id: String,
    pub request_number: u64,
    pub fully_qualified_name: String,
    pub method_name: String,
    pub service_name: String,
    pub input_name: String,
    pub output_name: String,
    pub is_client_streaming: bool,
    pub is_server_streaming: bool,
    pub timestamp: String,
    pub timestamp_unix: i64,
    pub timestamp_unix_milli: i64,
    pub timestamp_unix_nano: i64,
    pub uuid: String,
}

impl CallTemplateData {
    pub fn new(method: &MethodDescriptor, worker_id: &str, request_number: u64) -> Self {
        let now = Utc::now();

        CallTemplateData {
            worker_id: worker_id.to_string(),
            request_number,
            fully_qualified_name: method.full_name().to_string(),
            method_name: method.name().to_string(),
            service_name: method.parent_service().full_name().to_string(),
            input_name: method.input().full_name().to_string(),
            output_name: method.output().full_name().to_string(),
            is_client_streaming: method.is_client_streaming(),
            is_server_streaming: method.is_server_streaming(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Nanos, true),
            timestamp_unix: now.timestamp(),
            timestamp_unix_milli: now.timestamp_millis(),
            timestamp_unix_nano: now.timestamp_nanos_opt().unwrap_or_default(),
            uuid: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Looks up a field by its template name, e.g. `RequestNumber`.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "WorkerID" => self.worker_id.clone(),
            "RequestNumber" => self.request_number.to_string(),
            "FullyQualifiedName" => self.fully_qualified_name.clone(),
            "MethodName" => self.method_name.clone(),
            "ServiceName" => self.service_name.clone(),
            "InputName" => self.input_name.clone(),
            "OutputName" => self.output_name.clone(),
            "IsClientStreaming" => self.is_client_streaming.to_string(),
            "IsServerStreaming" => self.is_server_streaming.to_string(),
            "Timestamp" => self.timestamp.clone(),
            "TimestampUnix" => self.timestamp_unix.to_string(),
            "TimestampUnixMilli" => self.timestamp_unix_milli.to_string(),
            "TimestampUnixNano" => self.timestamp_unix_nano.to_string(),
            "UUID" => self.uuid.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// Expands a template against the data of one request.
///
/// Implementations must be deterministic for a given [`CallTemplateData`]
/// and are invoked at least once per request.
pub trait TemplateEngine: Send + Sync {
    fn expand(&self, template: &str, data: &CallTemplateData) -> Result<String, TemplateError>;
}

/// A [`TemplateEngine`] substituting `{{.Field}}` actions with the matching
/// [`CallTemplateData`] field.
///
/// Only field actions are understood. Function calls, pipelines and control
/// actions fail with [`TemplateError::Unsupported`]; install a richer engine
/// through [`Builder::template_engine`](crate::worker::Builder::template_engine)
/// when templates need them.
///
/// ```
/// # use tonic_load::template::{CallTemplateData, Placeholders, TemplateEngine};
/// let data = CallTemplateData {
///     worker_id: "w1".into(),
///     request_number: 7,
///     ..Default::default()
/// };
/// let out = Placeholders.expand(r#"{"id": "{{.WorkerID}}-{{ .RequestNumber }}"}"#, &data);
/// assert_eq!(out.unwrap(), r#"{"id": "w1-7"}"#);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Placeholders;

impl TemplateEngine for Placeholders {
    fn expand(&self, template: &str, data: &CallTemplateData) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);

            let offset = template.len() - rest.len() + start;
            let action = &rest[start + 2..];
            let end = action.find("}}").ok_or(TemplateError::Unclosed(offset))?;
            let expr = action[..end].trim();

            match expr.strip_prefix('.') {
                Some(name) if !name.is_empty() => {
                    let value = data
                        .field(name)
                        .ok_or_else(|| TemplateError::UnknownField(name.to_string()))?;
                    out.push_str(&value);
                }
                _ => return Err(TemplateError::Unsupported(expr.to_string())),
            }

            rest = &action[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// Expands a metadata template and parses it as a JSON object of strings.
///
/// A blank template yields an empty map.
pub fn expand_metadata(
    engine: &dyn TemplateEngine,
    template: &str,
    data: &CallTemplateData,
) -> Result<BTreeMap<String, String>, TemplateError> {
    if template.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let expanded = engine.expand(template, data)?;
    serde_json::from_str(&expanded).map_err(TemplateError::Metadata)
}
