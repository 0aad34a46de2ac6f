// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Per-connection registry of live calls.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::Status;
use crate::call::{CallCore, CallId, CallLimits, CallSpec, Inbound};
use crate::frame::Frame;

/// A live call as seen by the connection reader.
#[derive(Debug, Clone)]
pub(crate) struct CallEntry {
    pub(crate) core: Arc<CallCore>,
    pub(crate) inbound: mpsc::Sender<Inbound>,
}

#[derive(Debug, Default)]
struct RegistryState {
    calls: HashMap<CallId, CallEntry>,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Drops a terminal call; called once by the call itself.
    pub(crate) fn remove(&self, id: CallId) -> Option<CallEntry> {
        self.state.lock().calls.remove(&id)
    }
}

/// Owns the calls of one connection. Registration, lookup and bulk
/// termination are serialized on a single lock; per-call state is not.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionCoordinator {
    registry: Arc<Registry>,
}

impl SessionCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Creates a call and makes it reachable by id.
    ///
    /// Fails with `AlreadyExists` when the id is live and with `Unavailable`
    /// once the connection has been closed.
    pub(crate) fn register(
        &self,
        spec: CallSpec,
        outbound: mpsc::Sender<Frame>,
        limits: CallLimits,
    ) -> Result<(Arc<CallCore>, mpsc::Receiver<Inbound>), Status> {
        let id = spec.id;
        // one extra slot for the end-of-stream marker
        let (inbound_tx, inbound_rx) = mpsc::channel(limits.recv_window as usize + 1);
        let core = Arc::new(CallCore::new(
            spec,
            outbound,
            limits,
            Arc::downgrade(&self.registry),
        ));

        let mut state = self.registry.state.lock();
        if state.closed {
            return Err(Status::unavailable("connection lost"));
        }
        match state.calls.entry(id) {
            Entry::Occupied(_) => Err(Status::already_exists(format!(
                "call id {id} already registered"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(CallEntry {
                    core: core.clone(),
                    inbound: inbound_tx,
                });
                Ok((core, inbound_rx))
            }
        }
    }

    pub(crate) fn lookup(&self, id: CallId) -> Option<CallEntry> {
        self.registry.state.lock().calls.get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.state.lock().calls.len()
    }

    /// Terminates every live call with `Unavailable` and refuses new
    /// registrations. Returns the number of calls terminated.
    pub(crate) fn on_connection_closed(&self) -> usize {
        let calls = {
            let mut state = self.registry.state.lock();
            state.closed = true;
            std::mem::take(&mut state.calls)
        };

        let terminated = calls
            .into_values()
            .filter(|entry| {
                entry
                    .core
                    .terminate_local(Status::unavailable("connection lost"))
            })
            .count();
        debug!(terminated, "connection closed, live calls terminated");
        terminated
    }

    /// Cancels every live call with `status`, telling the peer about each.
    pub(crate) fn abort_all(&self, status: Status) -> usize {
        let calls: Vec<CallEntry> = self.registry.state.lock().calls.values().cloned().collect();
        calls
            .into_iter()
            .filter(|entry| entry.core.abort(status.clone()))
            .count()
    }
}
