//! The request scheduler and its lifecycle.
//!
//! A [`Worker`] repeatedly issues calls to one method for as long as its
//! condition policy allows. Any number of workers may share one
//! [`RequestCounter`] so request numbers stay unique across all of them.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock, RwLockWriteGuard,
    },
    time::Duration,
};

use prost_reflect::MethodDescriptor;
use tokio::{
    task::{self, JoinError, JoinSet},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    call::{CallBuilder, CallType},
    config::RunConfig,
    error::{Error, Errors},
    invoke::Invoke,
    payload::{PayloadDecoder, PayloadSource, ProtoDecoder},
    template::{Placeholders, TemplateEngine},
};

/// Hands out request numbers, starting at 1.
#[derive(Debug, Default)]
pub struct RequestCounter(AtomicU64);

impl RequestCounter {
    pub fn new() -> Self {
        RequestCounter::default()
    }

    /// Takes the next request number. Every call returns a distinct value.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The last number handed out, 0 before the first request.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Issues calls to one method until its condition policy or a
/// cancellation stops it.
///
/// Clones share all state: stopping a clone stops the worker.
#[derive(Clone)]
pub struct Worker {
    shared: Arc<Shared>,
}

struct Shared {
    invoker: Arc<dyn Invoke>,
    method: MethodDescriptor,
    call_type: CallType,
    config: RunConfig,
    counter: Arc<RequestCounter>,
    worker_id: String,
    templates: Arc<dyn TemplateEngine>,
    payloads: PayloadSource,
    token: CancellationToken,
    // Number of scheduler loops currently running on clones of this worker.
    active: RwLock<usize>,
}

impl Shared {
    fn call(&self) -> CallBuilder<'_> {
        CallBuilder {
            invoker: self.invoker.as_ref(),
            method: &self.method,
            call_type: self.call_type,
            config: &self.config,
            worker_id: &self.worker_id,
            templates: self.templates.as_ref(),
            payloads: &self.payloads,
        }
    }

    fn active(&self) -> RwLockWriteGuard<'_, usize> {
        self.active.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts one running loop until dropped.
struct ActiveGuard<'a>(&'a Shared);

impl<'a> ActiveGuard<'a> {
    fn new(shared: &'a Shared) -> Self {
        *shared.active() += 1;
        ActiveGuard(shared)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.0.active();
        *active = active.saturating_sub(1);
    }
}

impl Worker {
    /// Starts building a worker calling `method` through `invoker`.
    pub fn builder(
        invoker: Arc<dyn Invoke>,
        method: MethodDescriptor,
        counter: Arc<RequestCounter>,
    ) -> Builder {
        Builder {
            invoker,
            method,
            counter,
            worker_id: String::new(),
            config: RunConfig::default(),
            templates: Arc::new(Placeholders),
            decoder: Arc::new(ProtoDecoder),
            variants: Vec::new(),
            token: CancellationToken::new(),
        }
    }

    /// Issues requests one after the other.
    ///
    /// Before each request `cond` is given the worker id, the error of the
    /// previous request, the number of requests this call has issued and the
    /// time since it started. While it returns `false` the loop either
    /// returns, when `stop_on_cond` is set, or keeps asking.
    ///
    /// A failed request never stops the loop. Every error is collected and
    /// returned once the loop ends, including when it ends through
    /// [`stop`](Worker::stop). An in-flight request is not interrupted by
    /// `stop`; it runs until it completes or its timeout expires.
    pub async fn run<C>(&self, mut cond: C, stop_on_cond: bool) -> Result<(), Errors>
    where
        C: FnMut(&str, Option<&Error>, u64, Duration) -> bool,
    {
        let shared = &*self.shared;
        let _active = ActiveGuard::new(shared);

        let start = Instant::now();
        let mut issued = 0;
        let mut errors = Errors::new();
        let mut last_failed = false;

        loop {
            if shared.token.is_cancelled() {
                return errors.into_result();
            }

            let last = if last_failed { errors.last() } else { None };

            if cond(shared.worker_id.as_str(), last, issued, start.elapsed()) {
                let request_number = shared.counter.next();
                issued += 1;

                let result = shared.call().make_request(request_number).await;
                last_failed = result.is_err();
                if let Err(err) = result {
                    errors.push(err);
                }
            } else if stop_on_cond {
                return errors.into_result();
            } else {
                task::yield_now().await;
            }
        }
    }

    /// Issues every accepted request on its own task without waiting for
    /// earlier ones to complete.
    ///
    /// `cond` is never given an error since requests complete out of order.
    /// Once the loop ends all outstanding requests are awaited and the first
    /// error to complete, if any, is returned.
    pub async fn run_concurrent<C>(&self, mut cond: C, stop_on_cond: bool) -> Result<(), Error>
    where
        C: FnMut(&str, Option<&Error>, u64, Duration) -> bool,
    {
        let shared = &*self.shared;
        let _active = ActiveGuard::new(shared);

        let start = Instant::now();
        let mut issued = 0;
        let mut tasks = JoinSet::new();
        let mut first = None;

        loop {
            if shared.token.is_cancelled() {
                break;
            }

            if cond(shared.worker_id.as_str(), None, issued, start.elapsed()) {
                let request_number = shared.counter.next();
                issued += 1;

                let worker = self.clone();
                tasks.spawn(async move {
                    worker.shared.call().make_request(request_number).await
                });

                while let Some(joined) = tasks.try_join_next() {
                    keep_first(&mut first, joined);
                }
            } else if stop_on_cond {
                break;
            }

            // Lets spawned requests and whoever stops the worker make progress.
            task::yield_now().await;
        }

        tracing::trace!(
            worker_id = %shared.worker_id,
            outstanding = tasks.len(),
            "Waiting for outstanding requests"
        );

        while let Some(joined) = tasks.join_next().await {
            keep_first(&mut first, joined);
        }

        first.map_or(Ok(()), Err)
    }

    /// Stops the scheduler loop before its next request.
    pub fn stop(&self) {
        self.shared.token.cancel();
    }

    /// Whether a scheduler loop is currently running on this worker or any
    /// of its clones.
    pub fn is_active(&self) -> bool {
        *self
            .shared
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            > 0
    }

    /// The token cancelled by [`stop`](Worker::stop).
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.shared.token
    }

    pub fn worker_id(&self) -> &str {
        &self.shared.worker_id
    }

    pub fn call_type(&self) -> CallType {
        self.shared.call_type
    }
}

fn keep_first(first: &mut Option<Error>, joined: Result<Result<(), Error>, JoinError>) {
    if let Err(err) = joined.map_err(Error::from).and_then(|result| result) {
        first.get_or_insert(err);
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.shared.worker_id)
            .field("method", &self.shared.method.full_name())
            .field("call_type", &self.shared.call_type)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Configures a [`Worker`].
///
/// Created with [`Worker::builder`].
pub struct Builder {
    invoker: Arc<dyn Invoke>,
    method: MethodDescriptor,
    counter: Arc<RequestCounter>,
    worker_id: String,
    config: RunConfig,
    templates: Arc<dyn TemplateEngine>,
    decoder: Arc<dyn PayloadDecoder>,
    variants: Vec<String>,
    token: CancellationToken,
}

impl Builder {
    /// Identity of the worker, passed to the condition policy and
    /// available to templates as `{{.WorkerID}}`.
    pub fn worker_id(self, worker_id: impl Into<String>) -> Self {
        Builder {
            worker_id: worker_id.into(),
            ..self
        }
    }

    pub fn config(self, config: RunConfig) -> Self {
        Builder { config, ..self }
    }

    /// Replace the default [`Placeholders`] engine.
    pub fn template_engine(self, engine: impl TemplateEngine + 'static) -> Self {
        Builder {
            templates: Arc::new(engine),
            ..self
        }
    }

    /// Replace the default [`ProtoDecoder`].
    pub fn payload_decoder(self, decoder: impl PayloadDecoder + 'static) -> Self {
        Builder {
            decoder: Arc::new(decoder),
            ..self
        }
    }

    /// Rotate through pre-split JSON payloads, one per request, instead of
    /// sending the whole configured payload.
    ///
    /// Ignored for client streaming methods and binary payloads. See
    /// [`json_variants`](crate::payload::json_variants).
    pub fn json_variants(self, variants: Vec<String>) -> Self {
        Builder { variants, ..self }
    }

    /// Use `token` to stop the worker, e.g. a child of a token shared by
    /// every worker of a run.
    pub fn cancellation_token(self, token: CancellationToken) -> Self {
        Builder { token, ..self }
    }

    pub fn build(self) -> Worker {
        let call_type = CallType::of(&self.method);
        let payloads = PayloadSource::new(self.decoder, self.templates.clone(), self.variants);

        Worker {
            shared: Arc::new(Shared {
                invoker: self.invoker,
                method: self.method,
                call_type,
                config: self.config,
                counter: self.counter,
                worker_id: self.worker_id,
                templates: self.templates,
                payloads,
                token: self.token,
                active: RwLock::new(0),
            }),
        }
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("worker_id", &self.worker_id)
            .field("method", &self.method.full_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
