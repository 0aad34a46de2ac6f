// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Deadline and cancellation propagation.
//!
//! Each side of a call arms its own timer from the deadline it knows about.
//! Whichever happens first between expiry, explicit cancellation and normal
//! completion decides the terminal status; the others become no-ops.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::Status;
use crate::call::CallCore;
use crate::config::MAX_TIMEOUT;

/// Absolute deadline for a timeout starting now, capped at [`MAX_TIMEOUT`].
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(MAX_TIMEOUT)
}

/// Time left before `deadline`, in whole milliseconds, as sent on the wire.
pub(crate) fn remaining_millis(deadline: Instant) -> u64 {
    let remaining = deadline.saturating_duration_since(Instant::now());
    u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX)
}

/// Spawns the timer of a call. The task exits as soon as the call is
/// terminal, whatever the reason.
pub(crate) fn arm(core: &Arc<CallCore>) {
    let Some(deadline) = core.deadline() else {
        return;
    };

    let core = core.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                if core.abort(Status::deadline_exceeded("deadline exceeded")) {
                    debug!(call_id = %core.id(), method = %core.path(), "deadline fired");
                }
            }
            _ = core.done().cancelled() => {}
        }
    });
}

/// Caller-initiated cancellation.
pub(crate) fn cancel(core: &CallCore) -> bool {
    let cancelled = core.abort(Status::cancelled("call cancelled by the caller"));
    if cancelled {
        debug!(call_id = %core.id(), method = %core.path(), "call cancelled");
    }
    cancelled
}
