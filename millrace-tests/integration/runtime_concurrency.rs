//! Runtime concurrency limits under deterministic load.
//!
//! Handlers park on a gate so the tests control exactly when slots free
//! up; counters are polled rather than raced.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use millrace_core::runtime::{ConnectionContext, RequestHandler, Runtime, RuntimeError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Parks every invocation on a gate, recording entry order.
struct GatedEchoHandler {
    gate: Notify,
    entered: AtomicUsize,
    entry_order: Mutex<Vec<String>>,
}

impl GatedEchoHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            entered: AtomicUsize::new(0),
            entry_order: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RequestHandler for GatedEchoHandler {
    async fn handle(
        &self,
        _context: &ConnectionContext,
        request: Request<()>,
    ) -> Result<Response, RuntimeError> {
        let path = request.uri().path().to_string();
        self.entry_order.lock().unwrap().push(path.clone());
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(Response::new(Body::from(path)))
    }
}

fn submit(runtime: &Arc<Runtime>, client_id: u64, path: &str) -> JoinHandle<Result<Response, RuntimeError>> {
    let runtime = runtime.clone();
    let request = Request::builder().uri(path).body(()).unwrap();
    tokio::spawn(async move {
        runtime
            .handle(&ConnectionContext::new(client_id), request)
            .await
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_limit_plus_k_requests_dispatch_limit_and_queue_k() {
    let handler = GatedEchoHandler::new();
    let runtime = Arc::new(
        Runtime::builder()
            .concurrency_limit(2)
            .handler(handler.clone())
            .build(),
    );

    let tasks: Vec<_> = (0..5)
        .map(|i| submit(&runtime, i, &format!("/request/{i}")))
        .collect();

    // Exactly the limit dispatches; the rest queue.
    wait_until(|| handler.entered.load(Ordering::SeqCst) == 2).await;
    wait_until(|| runtime.queued() == 3).await;
    assert_eq!(runtime.in_flight(), 2);
    assert_eq!(handler.entered.load(Ordering::SeqCst), 2);

    // Release one slot at a time; the queue drains one by one.
    for expected_entered in 3..=5 {
        handler.gate.notify_one();
        wait_until(|| handler.entered.load(Ordering::SeqCst) == expected_entered).await;
        assert_eq!(runtime.queued(), 5 - expected_entered);
    }
    // Two handlers are still parked on the gate.
    handler.gate.notify_one();
    handler.gate.notify_one();

    let mut bodies = Vec::new();
    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1 << 16)
            .await
            .unwrap();
        bodies.push(String::from_utf8(body.to_vec()).unwrap());
    }

    // No lost or duplicated responses; each caller got its own.
    bodies.sort();
    let expected: Vec<String> = (0..5).map(|i| format!("/request/{i}")).collect();
    assert_eq!(bodies, expected);

    assert_eq!(runtime.in_flight(), 0);
    assert_eq!(runtime.queued(), 0);
}

#[tokio::test]
async fn test_queued_requests_dispatch_in_submission_order() {
    let handler = GatedEchoHandler::new();
    let runtime = Arc::new(
        Runtime::builder()
            .concurrency_limit(1)
            .handler(handler.clone())
            .build(),
    );

    let first = submit(&runtime, 1, "/first");
    wait_until(|| handler.entered.load(Ordering::SeqCst) == 1).await;

    let second = submit(&runtime, 2, "/second");
    wait_until(|| runtime.queued() == 1).await;
    let third = submit(&runtime, 3, "/third");
    wait_until(|| runtime.queued() == 2).await;

    for expected_entered in 2..=3 {
        handler.gate.notify_one();
        wait_until(|| handler.entered.load(Ordering::SeqCst) == expected_entered).await;
    }
    handler.gate.notify_one();

    for task in [first, second, third] {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(
        handler.entry_order.lock().unwrap().as_slice(),
        &["/first", "/second", "/third"]
    );
}

#[tokio::test]
async fn test_shutdown_rejects_queued_but_finishes_in_flight() {
    let handler = GatedEchoHandler::new();
    let runtime = Arc::new(
        Runtime::builder()
            .concurrency_limit(1)
            .handler(handler.clone())
            .build(),
    );

    let in_flight = submit(&runtime, 1, "/in-flight");
    wait_until(|| handler.entered.load(Ordering::SeqCst) == 1).await;

    let queued = submit(&runtime, 2, "/queued");
    wait_until(|| runtime.queued() == 1).await;

    runtime.shutdown();

    // The queued caller is turned away immediately.
    let queued_result = queued.await.unwrap();
    assert!(matches!(queued_result, Err(RuntimeError::ShuttingDown)));

    // The dispatched one still completes normally.
    handler.gate.notify_one();
    let in_flight_result = in_flight.await.unwrap();
    assert!(in_flight_result.is_ok());

    // New submissions are rejected as well.
    let late = runtime
        .handle(
            &ConnectionContext::new(3),
            Request::builder().uri("/late").body(()).unwrap(),
        )
        .await;
    assert!(matches!(late, Err(RuntimeError::ShuttingDown)));
}
