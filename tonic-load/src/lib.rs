//! The request-issuing core of a gRPC load generator built on `tonic`.
//!
//! A [`Worker`] repeatedly calls one method, described at runtime by a
//! [`prost_reflect::MethodDescriptor`], for as long as a condition policy
//! lets it. Unary, client streaming, server streaming and bidi methods are
//! all supported. Payloads and metadata are templates expanded for every
//! request, so each one can carry its own request number, worker id,
//! timestamp or UUID.
//!
//! Calls go through the [`Invoke`](invoke::Invoke) trait.
//! [`ChannelInvoker`](invoke::ChannelInvoker) implements it over a `tonic`
//! [`Channel`](tonic::transport::Channel).
//!
//! # Example
//!
//! ```no_run
//! # async fn run(pool: prost_reflect::DescriptorPool) -> Result<(), Box<dyn std::error::Error>> {
//! use std::{sync::Arc, time::Duration};
//!
//! use tonic::transport::Endpoint;
//! use tonic_load::{invoke::ChannelInvoker, RequestCounter, RunConfig, Worker};
//!
//! let method = pool
//!     .get_service_by_name("helloworld.Greeter")
//!     .and_then(|service| service.methods().find(|m| m.name() == "SayHello"))
//!     .ok_or("unknown method")?;
//!
//! let channel = Endpoint::from_static("http://[::1]:50051").connect().await?;
//! let counter = Arc::new(RequestCounter::new());
//!
//! let worker = Worker::builder(Arc::new(ChannelInvoker::new(channel)), method, counter)
//!     .worker_id("w0")
//!     .config(
//!         RunConfig::default()
//!             .data(r#"{"name": "request {{.RequestNumber}}"}"#)
//!             .timeout(Duration::from_secs(20)),
//!     )
//!     .build();
//!
//! // Issue 200 requests, one at a time.
//! worker.run(|_, _, issued, _| issued < 200, true).await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(issue_tracker_base_url = "https://github.com/hyperium/tonic/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod call;
mod config;
mod error;
mod scope;
mod stream;

#[cfg(test)]
mod testing;

pub mod invoke;
pub mod payload;
pub mod template;
pub mod worker;

pub use self::call::CallType;
pub use self::config::{PayloadFormat, RunConfig};
pub use self::error::{DecodeError, Error, Errors, TemplateError};
pub use self::scope::{CallScope, Deadline};
pub use self::worker::{RequestCounter, Worker};
