//! Lifecycle events and the hook trait that observes them.
//!
//! Hooks form an ordered list; the runtime folds each event through every
//! hook in registration order. Request, response, and error events are
//! owned values a hook takes and returns, so a hook can replace what it
//! was given; terminate events are observational only.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;

use super::RequestHandler;
use super::context::ConnectionContext;
use super::error::RuntimeError;

/// Fired before handler resolution.
///
/// A hook may supply a handler, a ready response, or both; a supplied
/// response short-circuits handler execution entirely.
pub struct RequestEvent {
    context: ConnectionContext,
    request: Request<()>,
    handler: Option<Arc<dyn RequestHandler>>,
    response: Option<Response>,
}

impl RequestEvent {
    pub(super) fn new(context: ConnectionContext, request: Request<()>) -> Self {
        Self {
            context,
            request,
            handler: None,
            response: None,
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn request(&self) -> &Request<()> {
        &self.request
    }

    pub fn supply_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn supply_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub(super) fn into_dispatch(
        self,
    ) -> (
        Request<()>,
        Option<Arc<dyn RequestHandler>>,
        Option<Response>,
    ) {
        (self.request, self.handler, self.response)
    }
}

/// Fired after a response exists, whether produced by a handler, a
/// request hook, or error recovery.
pub struct ResponseEvent {
    context: ConnectionContext,
    response: Response,
}

impl ResponseEvent {
    pub(super) fn new(context: ConnectionContext, response: Response) -> Self {
        Self { context, response }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = response;
        self
    }

    pub(super) fn into_response(self) -> Response {
        self.response
    }
}

/// Fired when the handler chain failed.
///
/// A hook that supplies a response converts the failure into that
/// response; if no hook does, the error propagates to the runtime's
/// caller.
pub struct ErrorEvent {
    context: ConnectionContext,
    error: RuntimeError,
    response: Option<Response>,
}

impl ErrorEvent {
    pub(super) fn new(context: ConnectionContext, error: RuntimeError) -> Self {
        Self {
            context,
            error,
            response: None,
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn error(&self) -> &RuntimeError {
        &self.error
    }

    pub fn supply_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub(super) fn into_parts(self) -> (RuntimeError, Option<Response>) {
        (self.error, self.response)
    }
}

/// Fired after the response has been written to the client.
///
/// Carries a snapshot of the response envelope since the response itself
/// is gone by then. Useful for access logging and cleanup.
pub struct TerminateEvent {
    pub context: ConnectionContext,
    pub request: Request<()>,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Observes and transforms requests as they move through the runtime.
///
/// Every method defaults to a passthrough, so hooks implement only the
/// stages they care about.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn on_request(&self, event: RequestEvent) -> RequestEvent {
        event
    }

    async fn on_response(&self, event: ResponseEvent) -> ResponseEvent {
        event
    }

    async fn on_error(&self, event: ErrorEvent) -> ErrorEvent {
        event
    }

    async fn on_terminate(&self, _event: &TerminateEvent) {}
}
