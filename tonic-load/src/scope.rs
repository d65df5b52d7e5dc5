use std::{future::Future, time::Duration};

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tonic::{metadata::MetadataMap, Request, Status};

/// The time bound of one call, shared by every step of it.
///
/// Clones observe the same cancellation, so a bound can be moved into
/// tasks spawned for the call.
#[derive(Clone, Debug)]
pub struct Deadline {
    at: Option<Instant>,
    token: CancellationToken,
}

impl Deadline {
    /// A deadline `timeout` from now, or an unbounded one if `None`.
    pub fn new(timeout: Option<Duration>) -> Self {
        Deadline {
            at: timeout.map(|timeout| Instant::now() + timeout),
            token: CancellationToken::new(),
        }
    }

    pub fn unbounded() -> Self {
        Deadline::new(None)
    }

    /// Time left before expiry, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    /// Drives `future` until it completes, the deadline expires or the
    /// call is cancelled, whichever happens first.
    pub async fn run<F, T, E>(&self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Status>,
    {
        let expired = async {
            match self.at {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = future => result,
            _ = self.token.cancelled() => Err(Status::cancelled("call was cancelled").into()),
            _ = expired => {
                Err(Status::deadline_exceeded("deadline expired before the call completed").into())
            }
        }
    }
}

/// Everything needed to issue one call besides its messages.
///
/// Dropping the scope cancels its [`Deadline`], ending any work still
/// bound to it.
#[derive(Debug)]
pub struct CallScope {
    deadline: Deadline,
    metadata: MetadataMap,
    compression: bool,
}

impl CallScope {
    pub fn new(timeout: Option<Duration>, metadata: MetadataMap, compression: bool) -> Self {
        CallScope {
            deadline: Deadline::new(timeout),
            metadata,
            compression,
        }
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Outgoing metadata attached to the call.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Whether messages should be sent gzip compressed.
    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Wraps `message` in a request carrying the scope's metadata and the
    /// time left before the deadline as `grpc-timeout`.
    pub fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        *request.metadata_mut() = self.metadata.clone();
        if let Some(timeout) = self.deadline.remaining() {
            request.set_timeout(timeout);
        }
        request
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        self.deadline.cancel();
    }
}
