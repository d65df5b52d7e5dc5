//! Resolution of the input messages sent by each request.

use std::sync::{Arc, OnceLock};

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use serde_json::Value;

use crate::{
    config::{PayloadFormat, RunConfig},
    error::{DecodeError, Error},
    template::{CallTemplateData, TemplateEngine},
};

/// Turns resolved payload bytes into messages of a method's input type.
pub trait PayloadDecoder: Send + Sync {
    /// Decodes `data` into an ordered set of messages of type `input`.
    ///
    /// Empty input decodes to an empty set.
    fn decode(
        &self,
        data: &[u8],
        format: PayloadFormat,
        input: &MessageDescriptor,
    ) -> Result<Vec<DynamicMessage>, DecodeError>;
}

/// The default [`PayloadDecoder`], backed by `prost-reflect`.
///
/// JSON payloads are either a single object or an array of objects, using
/// the canonical protobuf JSON mapping. Binary payloads are either a
/// sequence of length-delimited messages or one bare message.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtoDecoder;

impl PayloadDecoder for ProtoDecoder {
    fn decode(
        &self,
        data: &[u8],
        format: PayloadFormat,
        input: &MessageDescriptor,
    ) -> Result<Vec<DynamicMessage>, DecodeError> {
        match format {
            PayloadFormat::Json => decode_json(data, input),
            PayloadFormat::Binary => decode_binary(data, input),
        }
    }
}

fn decode_json(
    data: &[u8],
    input: &MessageDescriptor,
) -> Result<Vec<DynamicMessage>, DecodeError> {
    let text = std::str::from_utf8(data)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| message_from_json(input, item))
            .collect(),
        object @ Value::Object(_) => Ok(vec![message_from_json(input, object)?]),
        _ => Err(DecodeError::Shape),
    }
}

fn message_from_json(
    input: &MessageDescriptor,
    value: Value,
) -> Result<DynamicMessage, DecodeError> {
    if !value.is_object() {
        return Err(DecodeError::Shape);
    }

    DynamicMessage::deserialize(input.clone(), value).map_err(|source| DecodeError::Message {
        message: input.full_name().to_string(),
        source,
    })
}

fn decode_binary(
    data: &[u8],
    input: &MessageDescriptor,
) -> Result<Vec<DynamicMessage>, DecodeError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    match decode_delimited(data, input) {
        Ok(messages) if !messages.is_empty() => Ok(messages),
        _ => Ok(vec![DynamicMessage::decode(input.clone(), data)?]),
    }
}

fn decode_delimited(
    mut data: &[u8],
    input: &MessageDescriptor,
) -> Result<Vec<DynamicMessage>, prost::DecodeError> {
    let mut messages = Vec::new();
    while !data.is_empty() {
        let mut message = DynamicMessage::new(input.clone());
        message.merge_length_delimited(&mut data)?;
        messages.push(message);
    }
    Ok(messages)
}

/// Splits a top-level JSON array into the text of each element.
///
/// The result is the variant rotation handed to
/// [`Builder::json_variants`](crate::worker::Builder::json_variants).
/// Returns `None` when `data` is not a JSON array, which is expected for
/// templates that only become valid JSON once expanded.
pub fn json_variants(data: &[u8]) -> Option<Vec<String>> {
    match serde_json::from_slice::<Value>(data).ok()? {
        Value::Array(items) if !items.is_empty() => {
            Some(items.iter().map(Value::to_string).collect())
        }
        _ => None,
    }
}

/// Index of the element used by request `request_number` out of `len`.
///
/// Request numbers start at 1, so the first request always uses the first
/// element and later ones rotate through the rest.
pub(crate) fn rotation_index(request_number: u64, len: usize) -> usize {
    (request_number.saturating_sub(1) % len as u64) as usize
}

/// Chooses between the binary cache, the JSON variant rotation and the
/// full payload template for each request of one worker.
pub(crate) struct PayloadSource {
    decoder: Arc<dyn PayloadDecoder>,
    templates: Arc<dyn TemplateEngine>,
    variants: Vec<String>,
    cache: OnceLock<Arc<Vec<DynamicMessage>>>,
}

impl PayloadSource {
    pub(crate) fn new(
        decoder: Arc<dyn PayloadDecoder>,
        templates: Arc<dyn TemplateEngine>,
        variants: Vec<String>,
    ) -> Self {
        PayloadSource {
            decoder,
            templates,
            variants,
            cache: OnceLock::new(),
        }
    }

    pub(crate) fn resolve(
        &self,
        config: &RunConfig,
        method: &MethodDescriptor,
        data: &CallTemplateData,
    ) -> Result<Arc<Vec<DynamicMessage>>, Error> {
        if let Some(cached) = self.cache.get() {
            return Ok(cached.clone());
        }

        let input = method.input();

        if config.is_binary() {
            let messages = self
                .decoder
                .decode(&config.data, PayloadFormat::Binary, &input)?;
            // Concurrent first requests may both get here, the first stored set wins.
            return Ok(self.cache.get_or_init(|| Arc::new(messages)).clone());
        }

        // client streams send the whole ordered set, never one variant
        let template: &str = if !method.is_client_streaming() && !self.variants.is_empty() {
            &self.variants[rotation_index(data.request_number, self.variants.len())]
        } else {
            std::str::from_utf8(&config.data).map_err(DecodeError::from)?
        };

        let expanded = self.templates.expand(template, data)?;
        let messages = self
            .decoder
            .decode(expanded.as_bytes(), PayloadFormat::Json, &input)?;

        Ok(Arc::new(messages))
    }
}
