// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! TCP front end: accepts connections and serves a registry on each of them
//! until the drain signal fires.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use courier_rpc::{ServerConnection, ServiceRegistry, SessionConfig};
use courier_services::GreetConfig;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfiguration {
    #[serde(default = "default_address")]
    address: String,

    /// pacing of the greet service
    #[serde(default)]
    greet: GreetConfig,
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        ServerConfiguration {
            address: default_address(),
            greet: GreetConfig::default(),
        }
    }
}

pub(crate) fn default_address() -> String {
    "127.0.0.1:50051".to_string()
}

impl ServerConfiguration {
    pub fn with_address(self, address: impl Into<String>) -> Self {
        ServerConfiguration {
            address: address.into(),
            ..self
        }
    }

    pub fn with_greet(self, greet: GreetConfig) -> Self {
        ServerConfiguration { greet, ..self }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn greet(&self) -> &GreetConfig {
        &self.greet
    }
}

pub struct Server {
    listener: TcpListener,
    registry: Arc<ServiceRegistry>,
    session: SessionConfig,
}

impl Server {
    pub async fn bind(
        address: &str,
        registry: ServiceRegistry,
        session: SessionConfig,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        info!(address = %listener.local_addr()?, methods = registry.len(), "server listening");
        Ok(Server {
            listener,
            registry: Arc::new(registry),
            session,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `watch` is signaled. Every connection holds
    /// a clone of the watch, so draining the signal waits for all of them.
    pub async fn run(self, watch: drain::Watch) {
        let shutdown = watch.clone().signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            self.registry.clone(),
                            self.session.clone(),
                            watch.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                    }
                },
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ServiceRegistry>,
    session: SessionConfig,
    watch: drain::Watch,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "cannot disable nagle");
    }

    info!(%peer, "connection accepted");
    let connection = ServerConnection::accept(stream, registry, session);

    tokio::select! {
        _ = connection.closed() => {
            info!(%peer, "connection closed");
        }
        release = watch.signaled() => {
            connection.shutdown();
            connection.closed().await;
            info!(%peer, "connection drained");
            drop(release);
        }
    }
}
