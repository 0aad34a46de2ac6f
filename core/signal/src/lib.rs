// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Process shutdown signals.
//!
//! [`shutdown`] resolves once the process has been asked to stop: SIGINT or
//! SIGTERM on unix, Ctrl-C elsewhere.

/// Waits for the first shutdown signal delivered to the process.
pub async fn shutdown() {
    imp::shutdown().await
}

#[cfg(unix)]
mod imp {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::{info, warn};

    pub(super) async fn shutdown() {
        tokio::select! {
            // interrupt from the terminal
            _ = sig(SignalKind::interrupt(), "SIGINT") => {}
            // orchestrators stop processes with SIGTERM
            _ = sig(SignalKind::terminate(), "SIGTERM") => {}
        };
    }

    async fn sig(kind: SignalKind, name: &str) {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(
                    target: "courier::signal",
                    signal = name,
                    "received signal, starting shutdown",
                );
            }
            Err(e) => {
                // a missing handler must not end the process early
                warn!(
                    target: "courier::signal",
                    signal = name,
                    error = %e,
                    "cannot register signal handler",
                );
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use tracing::{info, warn};

    pub(super) async fn shutdown() {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(
                target: "courier::signal",
                "received Ctrl-C, starting shutdown",
            ),
            Err(e) => {
                warn!(target: "courier::signal", error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    }
}
