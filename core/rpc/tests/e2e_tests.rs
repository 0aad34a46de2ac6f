// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests over an in-memory connection.
//!
//! Every test wires a `Client` and a `ServerConnection` through
//! `tokio::io::duplex` and checks the call shapes, flow control, deadlines,
//! cancellation and connection loss as seen by both ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;

use courier_rpc::{
    CallContext, CallOptions, Client, Code, MethodDescriptor, RequestStream, ResponseSink,
    ServerConnection, ServiceRegistry, SessionConfig, Shape, Status, bincode_codec,
};

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
struct Number {
    value: i64,
}

bincode_codec!(Number);

fn number(value: i64) -> Number {
    Number { value }
}

const DOUBLE: MethodDescriptor = MethodDescriptor::new("test.Math", "Double", Shape::Unary);
const COUNT: MethodDescriptor = MethodDescriptor::new("test.Math", "Count", Shape::ServerStream);
const TOTAL: MethodDescriptor = MethodDescriptor::new("test.Math", "Total", Shape::ClientStream);
const ECHO: MethodDescriptor = MethodDescriptor::new("test.Math", "Echo", Shape::BidiStream);
const SLOW: MethodDescriptor = MethodDescriptor::new("test.Math", "Slow", Shape::Unary);
const LOOKUP: MethodDescriptor = MethodDescriptor::new("test.Math", "Lookup", Shape::Unary);
const TENANT: MethodDescriptor = MethodDescriptor::new("test.Math", "Tenant", Shape::Unary);
const HANG: MethodDescriptor = MethodDescriptor::new("test.Math", "Hang", Shape::ServerStream);

// ============================================================================
// Test Helpers
// ============================================================================

async fn double(request: Number, _ctx: CallContext) -> Result<Number, Status> {
    Ok(number(request.value * 2))
}

async fn count(request: Number, sink: ResponseSink<Number>, _ctx: CallContext) -> Result<(), Status> {
    for i in 0..request.value {
        sink.send(number(i)).await?;
    }
    Ok(())
}

async fn total(mut requests: RequestStream<Number>, _ctx: CallContext) -> Result<Number, Status> {
    let mut sum = 0;
    while let Some(request) = requests.receive().await? {
        sum += request.value;
    }
    Ok(number(sum))
}

async fn echo(
    mut requests: RequestStream<Number>,
    sink: ResponseSink<Number>,
    _ctx: CallContext,
) -> Result<(), Status> {
    while let Some(request) = requests.receive().await? {
        sink.send(number(request.value * 10)).await?;
    }
    Ok(())
}

async fn slow(request: Number, _ctx: CallContext) -> Result<Number, Status> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(request)
}

async fn lookup(request: Number, _ctx: CallContext) -> Result<Number, Status> {
    Err(Status::not_found(format!("no entry {}", request.value)))
}

async fn tenant(_request: Number, ctx: CallContext) -> Result<Number, Status> {
    let value = ctx
        .metadata_value("tenant")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Status::invalid_argument("missing tenant"))?;
    Ok(number(value))
}

async fn hang(_request: Number, _sink: ResponseSink<Number>, ctx: CallContext) -> Result<(), Status> {
    ctx.cancelled().await;
    Ok(())
}

fn registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry
        .register_unary(&DOUBLE, double)
        .unwrap()
        .register_server_stream(&COUNT, count)
        .unwrap()
        .register_client_stream(&TOTAL, total)
        .unwrap()
        .register_bidi_stream(&ECHO, echo)
        .unwrap()
        .register_unary(&SLOW, slow)
        .unwrap()
        .register_unary(&LOOKUP, lookup)
        .unwrap()
        .register_unary(&TENANT, tenant)
        .unwrap()
        .register_server_stream(&HANG, hang)
        .unwrap();
    registry
}

/// Client and server wired through an in-memory connection
struct TestEnv {
    client: Client,
    server: ServerConnection,
}

impl TestEnv {
    fn new(config: SessionConfig) -> Self {
        Self::with_registry(registry(), config)
    }

    fn with_registry(registry: ServiceRegistry, config: SessionConfig) -> Self {
        Self::with_configs(registry, config.clone(), config)
    }

    /// Server and client each with their own session settings.
    fn with_configs(registry: ServiceRegistry, server: SessionConfig, client: SessionConfig) -> Self {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = ServerConnection::accept(server_io, Arc::new(registry), server);
        let client = Client::connect(client_io, client);
        Self { client, server }
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Call shapes
// ============================================================================

#[tokio::test]
#[tracing_test::traced_test]
async fn test_unary() {
    let env = TestEnv::new(SessionConfig::default());

    let response: Number = env
        .client
        .unary(&DOUBLE, number(21), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(response, number(42));

    eventually(|| env.client.live_calls() == 0 && env.server.live_calls() == 0).await;
    assert!(logs_contain("call started"));
}

#[tokio::test]
async fn test_unary_handle_rejects_second_request() {
    let env = TestEnv::new(SessionConfig::default());

    let mut call = env
        .client
        .open_unary::<Number, Number>(&DOUBLE, CallOptions::new())
        .await
        .unwrap();
    call.send_one(number(4)).await.unwrap();
    let err = call.send_one(number(5)).await.unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);

    assert_eq!(call.receive_one().await.unwrap(), number(8));
    assert_eq!(call.status(), Some(Status::ok()));
}

#[tokio::test]
async fn test_server_stream_preserves_order() {
    let env = TestEnv::new(SessionConfig::default());

    let mut call = env
        .client
        .open_server_stream::<Number, Number>(&COUNT, CallOptions::new())
        .await
        .unwrap();
    call.send_one(number(100)).await.unwrap();

    let mut received = Vec::new();
    while let Some(response) = call.receive().await.unwrap() {
        received.push(response.value);
    }
    assert_eq!(received, (0..100).collect::<Vec<_>>());

    // the outcome was reported with the end of the stream
    let err = call.receive().await.unwrap_err();
    assert_eq!(err, Status::already_terminated());
}

#[tokio::test]
async fn test_server_stream_with_no_responses() {
    let env = TestEnv::new(SessionConfig::default());

    let mut call = env
        .client
        .open_server_stream::<Number, Number>(&COUNT, CallOptions::new())
        .await
        .unwrap();
    call.send_one(number(0)).await.unwrap();
    let responses: Vec<_> = call.into_stream().collect().await;
    assert!(responses.is_empty());
}

#[tokio::test]
async fn test_client_stream() {
    let env = TestEnv::new(SessionConfig::default());

    let call = env
        .client
        .open_client_stream::<Number, Number>(&TOTAL, CallOptions::new())
        .await
        .unwrap();
    for value in [8, 56, 21, 27, 14] {
        call.send(number(value)).await.unwrap();
    }
    assert_eq!(call.close_and_receive().await.unwrap(), number(126));
}

#[tokio::test]
async fn test_bidi_drive_joins_both_loops() {
    let env = TestEnv::new(SessionConfig::default());

    let call = env
        .client
        .open_bidi_stream::<Number, Number>(&ECHO, CallOptions::new())
        .await
        .unwrap();
    let mut responses = Vec::new();
    call.drive(stream::iter((1..=5).map(number)), |response| {
        responses.push(response.value)
    })
    .await
    .unwrap();
    assert_eq!(responses, vec![10, 20, 30, 40, 50]);
}

#[tokio::test]
async fn test_bidi_interleaving_with_window_of_one() {
    let env = TestEnv::new(SessionConfig::default().with_window(1));

    let mut call = env
        .client
        .open_bidi_stream::<Number, Number>(&ECHO, CallOptions::new())
        .await
        .unwrap();
    for value in 0..20 {
        call.send(number(value)).await.unwrap();
        assert_eq!(call.receive().await.unwrap(), Some(number(value * 10)));
    }

    call.close_send().await;
    call.close_send().await;
    assert_eq!(call.receive().await.unwrap(), None);
    assert_eq!(call.status(), Some(Status::ok()));
}

#[tokio::test]
async fn test_bidi_split_halves_run_in_separate_tasks() {
    let env = TestEnv::new(SessionConfig::default().with_window(2));

    let call = env
        .client
        .open_bidi_stream::<Number, Number>(&ECHO, CallOptions::new())
        .await
        .unwrap();
    let (sender, mut receiver) = call.split();

    let producer = tokio::spawn(async move {
        for value in 0..50 {
            sender.send(number(value)).await.unwrap();
        }
        sender.close().await;
    });

    let mut received = Vec::new();
    while let Some(response) = receiver.receive().await.unwrap() {
        received.push(response.value);
    }
    producer.await.unwrap();
    assert_eq!(received, (0..50).map(|v| v * 10).collect::<Vec<_>>());
}

// ============================================================================
// Flow control
// ============================================================================

#[tokio::test]
async fn test_slow_reader_applies_backpressure() {
    let sent = Arc::new(AtomicUsize::new(0));
    let flood = MethodDescriptor::new("test.Math", "Flood", Shape::ServerStream);

    let mut registry = ServiceRegistry::new();
    let counter = sent.clone();
    registry
        .register_server_stream(&flood, move |request: Number, sink: ResponseSink<Number>, _ctx: CallContext| {
            let counter = counter.clone();
            async move {
                for i in 0..request.value {
                    sink.send(number(i)).await?;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, Status>(())
            }
        })
        .unwrap();

    let env = TestEnv::with_registry(registry, SessionConfig::default().with_window(4));
    let mut call = env
        .client
        .open_server_stream::<Number, Number>(&flood, CallOptions::new())
        .await
        .unwrap();
    call.send_one(number(40)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sent.load(Ordering::SeqCst), 4);

    let mut received = Vec::new();
    while let Some(response) = call.receive().await.unwrap() {
        received.push(response.value);
    }
    assert_eq!(received, (0..40).collect::<Vec<_>>());
    assert_eq!(sent.load(Ordering::SeqCst), 40);
}

#[tokio::test]
async fn test_client_window_larger_than_server_window() {
    let late_total = MethodDescriptor::new("test.Math", "LateTotal", Shape::ClientStream);
    let mut registry = ServiceRegistry::new();
    registry
        .register_client_stream(&late_total, |requests: RequestStream<Number>, ctx: CallContext| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            total(requests, ctx).await
        })
        .unwrap();

    let env = TestEnv::with_configs(
        registry,
        SessionConfig::default().with_window(2),
        SessionConfig::default().with_window(16),
    );
    let call = env
        .client
        .open_client_stream::<Number, Number>(&late_total, CallOptions::new())
        .await
        .unwrap();
    for _ in 0..10 {
        call.send(number(1)).await.unwrap();
    }
    assert_eq!(call.close_and_receive().await.unwrap(), number(10));
}

#[tokio::test]
async fn test_server_window_larger_than_client_window() {
    let env = TestEnv::with_configs(
        registry(),
        SessionConfig::default().with_window(16),
        SessionConfig::default().with_window(2),
    );

    let mut call = env
        .client
        .open_server_stream::<Number, Number>(&COUNT, CallOptions::new())
        .await
        .unwrap();
    call.send_one(number(30)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut received = Vec::new();
    while let Some(response) = call.receive().await.unwrap() {
        received.push(response.value);
    }
    assert_eq!(received, (0..30).collect::<Vec<_>>());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_oversized_request_fails_only_its_call() {
    let size = MethodDescriptor::new("test.Bytes", "Size", Shape::Unary);
    let mut registry = registry();
    registry
        .register_unary(&size, |request: Vec<u8>, _ctx: CallContext| async move {
            Ok::<_, Status>(number(request.len() as i64))
        })
        .unwrap();
    let env = TestEnv::with_registry(registry, SessionConfig::default().with_max_frame_size(1024));

    let mut other = env
        .client
        .open_server_stream::<Number, Number>(&HANG, CallOptions::new())
        .await
        .unwrap();
    other.send_one(number(0)).await.unwrap();
    eventually(|| env.server.live_calls() == 1).await;

    let err = env
        .client
        .unary::<Vec<u8>, Number>(&size, vec![0; 4096], CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);
    assert!(logs_contain("outbound message too large"));

    // the connection and the other call are untouched
    assert!(!env.client.is_closed());
    assert!(!env.server.is_closed());
    assert_eq!(other.status(), None);
    let response: Number = env
        .client
        .unary(&size, vec![0; 512], CallOptions::new())
        .await
        .unwrap();
    assert_eq!(response, number(512));

    other.cancel();
    assert_eq!(other.receive().await.unwrap_err().code(), Code::Cancelled);
}

#[tokio::test]
async fn test_oversized_response_fails_only_its_call() {
    let bloat = MethodDescriptor::new("test.Bytes", "Bloat", Shape::Unary);
    let mut registry = registry();
    registry
        .register_unary(&bloat, |request: Number, _ctx: CallContext| async move {
            Ok::<_, Status>(vec![7u8; request.value as usize])
        })
        .unwrap();
    let env = TestEnv::with_registry(registry, SessionConfig::default().with_max_frame_size(1024));

    let err = env
        .client
        .unary::<Number, Vec<u8>>(&bloat, number(4096), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);

    let response: Vec<u8> = env
        .client
        .unary(&bloat, number(16), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(response, vec![7u8; 16]);
    assert!(!env.client.is_closed());
    eventually(|| env.server.live_calls() == 0).await;
}

// ============================================================================
// Status propagation
// ============================================================================

#[tokio::test]
async fn test_handler_error_becomes_terminal_status() {
    let env = TestEnv::new(SessionConfig::default());

    let err = env
        .client
        .unary::<Number, Number>(&LOOKUP, number(7), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err, Status::not_found("no entry 7"));
}

#[tokio::test]
async fn test_unknown_method_is_unimplemented() {
    let env = TestEnv::new(SessionConfig::default());
    let missing = MethodDescriptor::new("test.Math", "Missing", Shape::Unary);

    let err = env
        .client
        .unary::<Number, Number>(&missing, number(1), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
    assert_eq!(err.message(), "method not found: test.Math/Missing");
}

#[tokio::test]
async fn test_shape_mismatch_with_server_is_unimplemented() {
    let env = TestEnv::new(SessionConfig::default());
    // same path as Double, different shape
    let streaming_double = MethodDescriptor::new("test.Math", "Double", Shape::ServerStream);

    let mut call = env
        .client
        .open_server_stream::<Number, Number>(&streaming_double, CallOptions::new())
        .await
        .unwrap();
    let _ = call.send_one(number(1)).await;
    let err = call.receive().await.unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
}

#[tokio::test]
async fn test_client_validates_shape() {
    let env = TestEnv::new(SessionConfig::default());

    let err = env
        .client
        .open_unary::<Number, Number>(&COUNT, CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(env.client.live_calls(), 0);
}

#[tokio::test]
async fn test_metadata_reaches_handler() {
    let env = TestEnv::new(SessionConfig::default());

    let response: Number = env
        .client
        .unary(
            &TENANT,
            number(0),
            CallOptions::new().with_metadata("tenant", "17"),
        )
        .await
        .unwrap();
    assert_eq!(response, number(17));
}

// ============================================================================
// Deadlines and cancellation
// ============================================================================

#[tokio::test]
#[tracing_test::traced_test]
async fn test_deadline_beats_slow_handler() {
    let env = TestEnv::new(SessionConfig::default());

    let err = env
        .client
        .unary::<Number, Number>(
            &SLOW,
            number(1),
            CallOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    eventually(|| env.server.live_calls() == 0).await;
}

#[tokio::test]
async fn test_session_default_timeout_applies() {
    let config = SessionConfig::default().with_default_timeout(Some(Duration::from_millis(50)));
    let env = TestEnv::new(config);

    let err = env
        .client
        .unary::<Number, Number>(&SLOW, number(1), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    // an explicit timeout wins over the default
    let response: Number = env
        .client
        .unary(
            &SLOW,
            number(3),
            CallOptions::new().with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(response, number(3));
}

#[tokio::test]
async fn test_cancel_reaches_the_handler() {
    let watch = MethodDescriptor::new("test.Math", "Watch", Shape::ServerStream);
    let (report_tx, mut report_rx) = mpsc::channel::<Status>(1);

    let mut registry = ServiceRegistry::new();
    registry
        .register_server_stream(&watch, move |_request: Number, sink: ResponseSink<Number>, ctx: CallContext| {
            let report = report_tx.clone();
            async move {
                // keeps producing from a task that outlives the handler
                tokio::spawn(async move {
                    let mut i = 0;
                    loop {
                        if let Err(status) = sink.send(number(i)).await {
                            let _ = report.send(status).await;
                            return;
                        }
                        i += 1;
                    }
                });
                ctx.cancelled().await;
                Err::<(), _>(Status::cancelled("observed by handler"))
            }
        })
        .unwrap();

    let env = TestEnv::with_registry(registry, SessionConfig::default().with_window(2));
    let mut call = env
        .client
        .open_server_stream::<Number, Number>(&watch, CallOptions::new())
        .await
        .unwrap();
    call.send_one(number(0)).await.unwrap();
    assert_eq!(call.receive().await.unwrap(), Some(number(0)));

    call.cancel();
    let err = call.receive().await.unwrap_err();
    assert_eq!(err.code(), Code::Cancelled);

    let server_side = tokio::time::timeout(Duration::from_secs(2), report_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server_side.code(), Code::Cancelled);
}

#[tokio::test]
async fn test_dropping_a_call_handle_cancels_it() {
    let env = TestEnv::new(SessionConfig::default());

    let mut call = env
        .client
        .open_server_stream::<Number, Number>(&HANG, CallOptions::new())
        .await
        .unwrap();
    call.send_one(number(0)).await.unwrap();
    eventually(|| env.server.live_calls() == 1).await;

    drop(call);
    eventually(|| env.server.live_calls() == 0 && env.client.live_calls() == 0).await;
}

// ============================================================================
// Connection loss
// ============================================================================

#[tokio::test]
async fn test_closing_the_client_fails_every_open_call() {
    let env = TestEnv::new(SessionConfig::default());

    let mut calls = Vec::new();
    for _ in 0..4 {
        let mut call = env
            .client
            .open_server_stream::<Number, Number>(&HANG, CallOptions::new())
            .await
            .unwrap();
        call.send_one(number(0)).await.unwrap();
        calls.push(call);
    }
    eventually(|| env.server.live_calls() == 4).await;

    env.client.close();
    for call in &mut calls {
        let err = call.receive().await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }
    assert_eq!(env.client.live_calls(), 0);

    // the server sees the connection go away too
    tokio::time::timeout(Duration::from_secs(2), env.server.closed())
        .await
        .unwrap();
    assert_eq!(env.server.live_calls(), 0);

    let err = env
        .client
        .unary::<Number, Number>(&DOUBLE, number(1), CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

#[tokio::test]
async fn test_server_shutdown_cancels_open_calls() {
    let env = TestEnv::new(SessionConfig::default());

    let mut first = env
        .client
        .open_server_stream::<Number, Number>(&HANG, CallOptions::new())
        .await
        .unwrap();
    first.send_one(number(0)).await.unwrap();
    let mut second = env
        .client
        .open_server_stream::<Number, Number>(&HANG, CallOptions::new())
        .await
        .unwrap();
    second.send_one(number(0)).await.unwrap();
    eventually(|| env.server.live_calls() == 2).await;

    env.server.shutdown();
    for call in [&mut first, &mut second] {
        let err = call.receive().await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }
    tokio::time::timeout(Duration::from_secs(2), env.client.closed())
        .await
        .unwrap();
}
