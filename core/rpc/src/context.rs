// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::call::{CallCore, CallId};

/// What a handler knows about the call it serves.
#[derive(Debug, Clone)]
pub struct CallContext {
    call_id: CallId,
    method: String,
    deadline: Option<Instant>,
    metadata: HashMap<String, String>,
    done: CancellationToken,
}

impl CallContext {
    pub(crate) fn for_call(core: &CallCore) -> Self {
        Self {
            call_id: core.id(),
            method: core.path().to_string(),
            deadline: core.deadline(),
            metadata: core.metadata().clone(),
            done: core.done().clone(),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Method path, `service/method`.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` without a deadline.
    pub fn remaining_time(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// True once the call was terminated from outside the handler: caller
    /// cancellation, deadline or connection loss.
    pub fn is_cancelled(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves when [`CallContext::is_cancelled`] becomes true.
    pub async fn cancelled(&self) {
        self.done.cancelled().await
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
