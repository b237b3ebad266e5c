//! Bounded-concurrency request executor with lifecycle hooks.
//!
//! `Runtime` gates handler execution behind a fair semaphore: requests
//! past the concurrency limit queue FIFO and suspend their callers until
//! a slot frees. Around the handler sits an onion of middleware and an
//! ordered list of lifecycle hooks; failures funnel through a recovery
//! path that turns them into responses or re-propagates them.

pub mod context;
pub mod error;
pub mod events;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::http::Request;
use axum::response::Response;
use tokio::sync::Semaphore;

pub use context::{ConnectionContext, InformationalResponder, TlsInfo};
pub use error::{HttpError, RuntimeError};
pub use events::{ErrorEvent, LifecycleHook, RequestEvent, ResponseEvent, TerminateEvent};

/// In-flight handler invocations allowed when no limit is configured.
const DEFAULT_CONCURRENCY_LIMIT: usize = 100;

/// Terminal request handler invoked at the end of the middleware chain.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        context: &ConnectionContext,
        request: Request<()>,
    ) -> Result<Response, RuntimeError>;
}

/// Wraps handler execution; each middleware decides whether to call
/// through to the rest of the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(
        &self,
        context: &ConnectionContext,
        request: Request<()>,
        next: Next<'_>,
    ) -> Result<Response, RuntimeError>;
}

/// Remainder of the middleware chain, ending at the handler.
pub struct Next<'a> {
    handler: &'a dyn RequestHandler,
    middlewares: &'a [Arc<dyn Middleware>],
}

impl Next<'_> {
    pub async fn run(
        self,
        context: &ConnectionContext,
        request: Request<()>,
    ) -> Result<Response, RuntimeError> {
        match self.middlewares.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    handler: self.handler,
                    middlewares: rest,
                };
                current.process(context, request, next).await
            }
            None => self.handler.handle(context, request).await,
        }
    }
}

pub struct RuntimeBuilder {
    concurrency_limit: usize,
    handler: Option<Arc<dyn RequestHandler>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl RuntimeBuilder {
    fn new() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            handler: None,
            middlewares: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// A limit of zero would deadlock every caller, so it is raised to one.
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            limiter: Semaphore::new(self.concurrency_limit),
            concurrency_limit: self.concurrency_limit,
            queued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            handler: self.handler,
            middlewares: self.middlewares,
            hooks: self.hooks,
        }
    }
}

/// Concurrency-bounded request pipeline.
///
/// The semaphore is the only shared mutable structure; the counters next
/// to it exist purely for introspection and are maintained by RAII guards
/// so they stay accurate even when a waiting caller is cancelled.
pub struct Runtime {
    limiter: Semaphore,
    concurrency_limit: usize,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    handler: Option<Arc<dyn RequestHandler>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Executes `request` once a concurrency slot is available.
    ///
    /// Callers past the limit suspend here in FIFO order. The returned
    /// response has already been through every response hook; errors have
    /// already been offered to the recovery path.
    pub async fn handle(
        &self,
        context: &ConnectionContext,
        request: Request<()>,
    ) -> Result<Response, RuntimeError> {
        let permit = {
            let _queued = CounterGuard::enter(&self.queued);
            self.limiter
                .acquire()
                .await
                .map_err(|_| RuntimeError::ShuttingDown)?
        };

        let _in_flight = CounterGuard::enter(&self.in_flight);
        let result = self.dispatch(context, request).await;
        drop(permit);
        result
    }

    async fn dispatch(
        &self,
        context: &ConnectionContext,
        request: Request<()>,
    ) -> Result<Response, RuntimeError> {
        let mut event = RequestEvent::new(context.clone(), request);
        for hook in &self.hooks {
            event = hook.on_request(event).await;
        }
        let (request, supplied_handler, early_response) = event.into_dispatch();

        let outcome = match early_response {
            Some(response) => Ok(response),
            None => match supplied_handler.or_else(|| self.handler.clone()) {
                Some(handler) => {
                    let next = Next {
                        handler: handler.as_ref(),
                        middlewares: &self.middlewares,
                    };
                    next.run(context, request).await
                }
                None => Err(RuntimeError::Handler(anyhow::anyhow!(
                    "no handler resolved for request"
                ))),
            },
        };

        let response = match outcome {
            Ok(response) => response,
            Err(error) => self.recover(context, error).await?,
        };

        let mut event = ResponseEvent::new(context.clone(), response);
        for hook in &self.hooks {
            event = hook.on_response(event).await;
        }
        Ok(event.into_response())
    }

    /// Offers `error` to every hook; the first supplied response wins the
    /// body, but a structured HTTP error keeps its status and headers.
    async fn recover(
        &self,
        context: &ConnectionContext,
        error: RuntimeError,
    ) -> Result<Response, RuntimeError> {
        let mut event = ErrorEvent::new(context.clone(), error);
        for hook in &self.hooks {
            event = hook.on_error(event).await;
        }
        let (error, response) = event.into_parts();

        let Some(mut response) = response else {
            return Err(error);
        };
        if let RuntimeError::Http(http) = &error {
            *response.status_mut() = http.status();
            for (name, value) in http.headers() {
                response.headers_mut().insert(name, value.clone());
            }
        }
        Ok(response)
    }

    /// Fire-and-forget notification that the response has been fully
    /// written. Called by the transport after the fact, so the event only
    /// carries the response envelope.
    ///
    /// The envelope is snapshotted before the returned future exists so
    /// the future stays `Send` even though the response body is `!Sync`.
    pub fn terminate<'a>(
        &'a self,
        context: &ConnectionContext,
        request: Request<()>,
        response: &Response,
    ) -> impl Future<Output = ()> + Send + 'a {
        let event = TerminateEvent {
            context: context.clone(),
            request,
            status: response.status(),
            headers: response.headers().clone(),
        };
        async move {
            for hook in &self.hooks {
                hook.on_terminate(&event).await;
            }
        }
    }

    /// Closes the limiter; queued and future callers get `ShuttingDown`.
    /// Requests already dispatched run to completion.
    pub fn shutdown(&self) {
        self.limiter.close();
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Increments a counter on entry, decrements on drop.
struct CounterGuard<'a>(&'a AtomicUsize);

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
