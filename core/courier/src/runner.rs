// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use courier_rpc::CallOptions;
use courier_services::BlogItem;
use courier_store::MemoryStore;

use crate::args::CallArgs;
use crate::client;
use crate::config::ConfigLoader;
use crate::server::Server;

/// Binds the configured address and serves until a shutdown signal arrives.
pub async fn serve(mut config: ConfigLoader, address: Option<&str>) -> Result<()> {
    let drain_timeout = config
        .runtime()
        .context("invalid runtime configuration")?
        .drain_timeout();
    let session = config
        .session()
        .context("invalid session configuration")?
        .clone();
    let server_config = config
        .server()
        .context("invalid server configuration")?
        .clone();
    let address = address.unwrap_or(server_config.address());

    let registry = courier_services::registry(
        server_config.greet().clone(),
        Arc::new(MemoryStore::<BlogItem>::new()),
    )
    .context("failed to register services")?;

    let server = Server::bind(address, registry, session)
        .await
        .with_context(|| format!("failed to listen on {address}"))?;

    serve_until(server, drain_timeout, courier_signal::shutdown()).await
}

/// Runs `server` until `shutdown` resolves, then drains open connections
/// within `drain_timeout`.
pub async fn serve_until(
    server: Server,
    drain_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let (signal, watch) = drain::channel();
    let accept_loop = tokio::spawn(server.run(watch));

    shutdown.await;
    debug!("received shutdown signal");

    match tokio::time::timeout(drain_timeout, signal.drain()).await {
        Ok(()) => info!("all connections drained"),
        Err(_) => {
            warn!(timeout = ?drain_timeout, "connections did not drain in time");
            anyhow::bail!("shutdown timed out after {:?}", drain_timeout);
        }
    }

    accept_loop.await.context("accept loop failed")?;
    Ok(())
}

/// Connects to the server and runs one call, printing each result line.
pub async fn call(mut config: ConfigLoader, args: &CallArgs) -> Result<()> {
    let session = config
        .session()
        .context("invalid session configuration")?
        .clone();
    let address = match args.address() {
        Some(address) => address.to_string(),
        None => config
            .client()
            .context("invalid client configuration")?
            .address()
            .to_string(),
    };

    let client = client::connect(&address, session)
        .await
        .with_context(|| format!("failed to connect to {address}"))?;

    let options = match args.timeout() {
        Some(timeout) => CallOptions::new().with_timeout(timeout),
        None => CallOptions::new(),
    };

    let result = client::call(&client, args.method(), options, |line| println!("{line}")).await;
    client.close();
    result.map_err(|status| anyhow!("call failed: {status}"))
}
