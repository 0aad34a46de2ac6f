// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The binary's server and call paths over real TCP sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use courier::args::Method;
use courier::server::Server;
use courier::{client, runner};
use courier_rpc::{CallOptions, Code, SessionConfig, Status};
use courier_services::{BlogItem, GreetConfig};
use courier_store::MemoryStore;

struct Running {
    address: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

async fn start(greet: GreetConfig) -> Running {
    let registry =
        courier_services::registry(greet, Arc::new(MemoryStore::<BlogItem>::new())).unwrap();
    let server = Server::bind("127.0.0.1:0", registry, SessionConfig::default())
        .await
        .unwrap();
    let address = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(runner::serve_until(
        server,
        Duration::from_secs(5),
        async move {
            let _ = stopped.await;
        },
    ));
    Running {
        address,
        stop,
        task,
    }
}

async fn run(
    address: SocketAddr,
    method: Method,
    options: CallOptions,
) -> Result<Vec<String>, Status> {
    let client = client::connect(&address.to_string(), SessionConfig::default())
        .await
        .unwrap();
    let mut lines = Vec::new();
    let result = client::call(&client, &method, options, |line| lines.push(line)).await;
    client.close();
    result.map(|_| lines)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_calls_over_tcp() {
    let server = start(GreetConfig::immediate()).await;
    let address = server.address;

    let lines = run(address, Method::Sum { a: 3, b: 10 }, CallOptions::new())
        .await
        .unwrap();
    assert_eq!(lines, vec!["13"]);

    let lines = run(
        address,
        Method::DecomposePrimeNumber { number: 120 },
        CallOptions::new(),
    )
    .await
    .unwrap();
    assert_eq!(lines, vec!["2", "2", "2", "3", "5"]);

    let lines = run(
        address,
        Method::Average {
            numbers: vec![8, 56, 21, 27, 14],
        },
        CallOptions::new(),
    )
    .await
    .unwrap();
    assert_eq!(lines, vec!["25.2"]);

    let lines = run(
        address,
        Method::FindMaximum {
            numbers: vec![1, 5, 3, 6, 2, 20],
        },
        CallOptions::new(),
    )
    .await
    .unwrap();
    assert_eq!(lines, vec!["1", "5", "6", "20"]);

    let err = run(address, Method::SquareRoot { number: -1.0 }, CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let lines = run(
        address,
        Method::GreetEveryone {
            first_names: vec!["Ada".to_string(), "Alan".to_string()],
        },
        CallOptions::new(),
    )
    .await
    .unwrap();
    assert_eq!(lines, vec!["Hello, Ada!", "Hello, Alan!"]);

    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
    assert!(logs_contain("all connections drained"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blog_commands() {
    let server = start(GreetConfig::immediate()).await;
    let address = server.address;

    let created = run(
        address,
        Method::CreateBlog {
            author_id: "rob".to_string(),
            title: "first".to_string(),
            content: "hello".to_string(),
        },
        CallOptions::new(),
    )
    .await
    .unwrap();
    let id = created[0].split(' ').next().unwrap().to_string();
    assert_eq!(id.len(), 24);

    let listed = run(
        address,
        Method::ListBlog {
            offset: 0,
            limit: 0,
        },
        CallOptions::new(),
    )
    .await
    .unwrap();
    assert_eq!(listed, created);

    let deleted = run(address, Method::DeleteBlog { id: id.clone() }, CallOptions::new())
        .await
        .unwrap();
    assert_eq!(deleted, vec![format!("deleted {id}")]);

    let err = run(address, Method::ReadBlog { id }, CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_from_timeout() {
    let server = start(GreetConfig::immediate().with_deadline_step(Duration::from_millis(200))).await;

    let err = run(
        server.address,
        Method::GreetWithDeadline {
            first_name: "Ada".to_string(),
            last_name: String::new(),
        },
        CallOptions::new().with_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_shutdown_cancels_open_calls() {
    let server = start(GreetConfig::immediate().with_deadline_step(Duration::from_secs(60))).await;
    let address = server.address;

    let pending = tokio::spawn(run(
        address,
        Method::GreetWithDeadline {
            first_name: "Ada".to_string(),
            last_name: String::new(),
        },
        CallOptions::new(),
    ));

    // give the call time to reach its handler
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err, Status::unavailable("server shutting down"));
    assert!(logs_contain("connection drained"));
}
