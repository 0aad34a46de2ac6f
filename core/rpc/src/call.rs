// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! One logical invocation on a connection.
//!
//! A [`CallCore`] owns the direction state of a call, its terminal status
//! and the per-direction flow control. Every public handle (client call
//! handles, server request streams and response sinks) is a thin typed view
//! over a shared `CallCore`.
//!
//! Termination is a single transition guarded by the state lock: the first
//! status recorded wins, both directions close, the send window is closed
//! and the completion token fires, so anything suspended in `send` or
//! `receive` wakes up and observes the outcome.

use std::collections::HashMap;
use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::coordinator::Registry;
use crate::frame::{Frame, MESSAGE_FRAME_OVERHEAD};
use crate::{Shape, Status};

/// Connection-scoped call identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocates call ids for the initiating side of a connection. Ids start at
/// 1 and are never reused on the same connection.
#[derive(Debug)]
pub(crate) struct CallIdGenerator {
    next: AtomicU64,
}

impl CallIdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next(&self) -> CallId {
        CallId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Which end of the call this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Item of a call's inbound queue.
#[derive(Debug)]
pub(crate) enum Inbound {
    Message(Vec<u8>),
    End,
}

/// Everything needed to create a call.
#[derive(Debug, Clone)]
pub(crate) struct CallSpec {
    pub(crate) id: CallId,
    pub(crate) path: String,
    pub(crate) shape: Shape,
    pub(crate) role: Role,
    pub(crate) deadline: Option<Instant>,
    pub(crate) metadata: HashMap<String, String>,
}

/// Flow control and size limits of one call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallLimits {
    /// Envelopes this side buffers for the call; credits go back in
    /// batches of half of it.
    pub(crate) recv_window: u32,
    /// Receive window of the peer. The client learns it from the first
    /// credit grant, the server from the `Open` frame.
    pub(crate) peer_window: Option<u32>,
    pub(crate) max_frame_size: usize,
}

#[cfg(test)]
impl CallLimits {
    pub(crate) fn symmetric(window: u32) -> Self {
        Self {
            recv_window: window,
            peer_window: Some(window),
            max_frame_size: 1 << 20,
        }
    }
}

#[derive(Debug, Default)]
struct CallState {
    send_closed: bool,
    // the local reader has seen the end of the inbound direction
    recv_closed: bool,
    // the peer has half-closed its direction
    peer_closed: bool,
    next_send_seq: u64,
    next_recv_seq: u64,
    pending_credits: u32,
    peer_window: Option<u32>,
    status: Option<Status>,
    // terminal status was imposed (cancel, deadline, connection loss, fault)
    forced: bool,
    // terminal outcome already handed out by `receive`
    reported: bool,
}

impl CallState {
    fn send_error(&self) -> Status {
        match &self.status {
            Some(status) if self.forced => status.clone(),
            Some(_) => Status::already_terminated(),
            None if self.send_closed => Status::failed_precondition("send direction already closed"),
            None => Status::unavailable("connection lost"),
        }
    }
}

pub(crate) struct CallCore {
    id: CallId,
    path: String,
    shape: Shape,
    role: Role,
    deadline: Option<Instant>,
    metadata: HashMap<String, String>,
    recv_window: u32,
    max_payload: usize,
    state: Mutex<CallState>,
    done: CancellationToken,
    send_window: Semaphore,
    // serializes sequence assignment with the enqueue on the connection
    send_lock: AsyncMutex<()>,
    outbound: mpsc::Sender<Frame>,
    registry: Weak<Registry>,
}

impl fmt::Debug for CallCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCore")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("shape", &self.shape)
            .field("role", &self.role)
            .field("status", &self.status())
            .finish()
    }
}

impl CallCore {
    pub(crate) fn new(
        spec: CallSpec,
        outbound: mpsc::Sender<Frame>,
        limits: CallLimits,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            id: spec.id,
            path: spec.path,
            shape: spec.shape,
            role: spec.role,
            deadline: spec.deadline,
            metadata: spec.metadata,
            recv_window: limits.recv_window,
            max_payload: limits.max_frame_size.saturating_sub(MESSAGE_FRAME_OVERHEAD),
            state: Mutex::new(CallState {
                peer_window: limits.peer_window,
                ..CallState::default()
            }),
            done: CancellationToken::new(),
            // no credit until the peer's window is known
            send_window: Semaphore::new(limits.peer_window.unwrap_or(0) as usize),
            send_lock: AsyncMutex::new(()),
            outbound,
            registry,
        }
    }

    pub(crate) fn id(&self) -> CallId {
        self.id
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn shape(&self) -> Shape {
        self.shape
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Fires once the call reached its terminal status, whatever it is.
    pub(crate) fn done(&self) -> &CancellationToken {
        &self.done
    }

    pub(crate) fn status(&self) -> Option<Status> {
        self.state.lock().status.clone()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.lock().status.is_some()
    }

    /// The terminal outcome was already returned by `receive`.
    pub(crate) fn is_reported(&self) -> bool {
        self.state.lock().reported
    }

    pub(crate) fn is_send_closed(&self) -> bool {
        self.state.lock().send_closed
    }

    /// Records the terminal status. Returns false if the call was already
    /// terminal; the first status wins and is never replaced.
    fn finish(&self, status: Status, forced: bool) -> bool {
        {
            let mut state = self.state.lock();
            if state.status.is_some() {
                return false;
            }
            debug!(
                call_id = %self.id,
                method = %self.path,
                role = %self.role,
                code = %status.code(),
                message = status.message(),
                forced,
                "call terminated"
            );
            state.status = Some(status);
            state.forced = forced;
            state.send_closed = true;
            state.recv_closed = true;
        }

        self.send_window.close();
        self.done.cancel();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        true
    }

    /// Forces termination from this side and tells the peer with a `Cancel`
    /// frame. Used for explicit cancellation, deadlines and protocol faults.
    pub(crate) fn abort(&self, status: Status) -> bool {
        let frame = Frame::cancel(self.id.as_u64(), status.code(), status.message());
        if !self.finish(status, true) {
            return false;
        }
        self.notify_peer(frame);
        true
    }

    /// Applies a termination decided by the peer. Nothing is sent back.
    /// `forced` discards envelopes not yet handed to the application.
    pub(crate) fn terminate_from_peer(&self, status: Status, forced: bool) -> bool {
        self.finish(status, forced)
    }

    /// Terminates without talking to the peer: the connection is gone.
    pub(crate) fn terminate_local(&self, status: Status) -> bool {
        self.finish(status, true)
    }

    /// Server side: records the handler outcome and sends it as the terminal
    /// status frame, after every message already queued by this call.
    pub(crate) async fn complete(&self, status: Status) {
        let frame = Frame::status(self.id.as_u64(), status.code(), status.message());
        if !self.finish(status, false) {
            return;
        }

        let _guard = self.send_lock.lock().await;
        if self.outbound.send(frame).await.is_err() {
            debug!(call_id = %self.id, "connection gone before the status was sent");
        }
    }

    // called from synchronous contexts (reader task, drop guards)
    fn notify_peer(&self, frame: Frame) {
        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let outbound = self.outbound.clone();
                    handle.spawn(async move {
                        let _ = outbound.send(frame).await;
                    });
                }
            }
            Err(TrySendError::Closed(_)) => {
                trace!(call_id = %self.id, "connection closed, peer not notified");
            }
        }
    }

    /// Sends one envelope. Suspends while the peer has not granted credit.
    ///
    /// A payload that cannot fit in one frame fails the call with
    /// `ResourceExhausted`; the connection and other calls are unaffected.
    pub(crate) async fn send(&self, payload: Vec<u8>) -> Result<(), Status> {
        let _guard = self.send_lock.lock().await;
        {
            let state = self.state.lock();
            if state.status.is_some() || state.send_closed {
                return Err(state.send_error());
            }
        }

        if payload.len() > self.max_payload {
            debug!(
                call_id = %self.id,
                method = %self.path,
                size = payload.len(),
                limit = self.max_payload,
                "outbound message too large"
            );
            let status = Status::resource_exhausted(format!(
                "message of {} bytes larger than max frame size",
                payload.len()
            ));
            self.abort(status);
            return Err(self.state.lock().send_error());
        }

        tokio::select! {
            biased;
            _ = self.done.cancelled() => return Err(self.state.lock().send_error()),
            permit = self.send_window.acquire() => match permit {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(self.state.lock().send_error()),
            },
        }

        let seq = {
            let mut state = self.state.lock();
            if state.status.is_some() || state.send_closed {
                return Err(state.send_error());
            }
            let seq = state.next_send_seq;
            state.next_send_seq += 1;
            seq
        };

        trace!(call_id = %self.id, seq, "sending message");
        let frame = Frame::message(self.id.as_u64(), seq, payload);
        tokio::select! {
            biased;
            _ = self.done.cancelled() => Err(self.state.lock().send_error()),
            res = self.outbound.send(frame) => res.map_err(|_| Status::unavailable("connection lost")),
        }
    }

    /// Closes the outbound direction. Idempotent, never fails.
    pub(crate) async fn close_send(&self) {
        let _guard = self.send_lock.lock().await;
        let seq = {
            let mut state = self.state.lock();
            if state.send_closed || state.status.is_some() {
                return;
            }
            state.send_closed = true;
            state.next_send_seq
        };

        trace!(call_id = %self.id, seq, "closing send direction");
        let frame = Frame::half_close(self.id.as_u64(), seq);
        tokio::select! {
            biased;
            _ = self.done.cancelled() => {}
            res = self.outbound.send(frame) => {
                if res.is_err() {
                    trace!(call_id = %self.id, "connection gone while closing send direction");
                }
            }
        }
    }

    /// Waits for the next inbound envelope.
    ///
    /// Returns `Ok(None)` once the peer closed its direction. After the call
    /// is terminal, envelopes still queued are delivered first unless the
    /// termination was forced; then the outcome is reported once (`Ok(None)`
    /// for OK, the status otherwise) and later calls fail with
    /// `FailedPrecondition`.
    pub(crate) async fn receive(
        &self,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> Result<Option<Vec<u8>>, Status> {
        loop {
            {
                let mut state = self.state.lock();
                if state.reported {
                    return Err(Status::already_terminated());
                }
                if state.forced {
                    if let Some(status) = state.status.clone() {
                        state.reported = true;
                        return Err(status);
                    }
                }
            }

            let item = match inbound.try_recv() {
                Ok(item) => Some(item),
                Err(_) => {
                    {
                        let mut state = self.state.lock();
                        if let Some(status) = state.status.clone() {
                            state.reported = true;
                            return if status.is_ok() { Ok(None) } else { Err(status) };
                        }
                        if state.recv_closed {
                            return Ok(None);
                        }
                    }

                    tokio::select! {
                        biased;
                        item = inbound.recv() => item,
                        _ = self.done.cancelled() => continue,
                    }
                }
            };

            match item {
                Some(Inbound::Message(payload)) => {
                    self.release_credit().await;
                    return Ok(Some(payload));
                }
                Some(Inbound::End) => {
                    self.state.lock().recv_closed = true;
                    return Ok(None);
                }
                None => {
                    if self.is_terminal() {
                        continue;
                    }
                    return Err(Status::unavailable("connection lost"));
                }
            }
        }
    }

    // grants are batched: half a window at a time
    async fn release_credit(&self) {
        let threshold = (self.recv_window / 2).max(1);
        let grant = {
            let mut state = self.state.lock();
            if state.status.is_some() {
                return;
            }
            state.pending_credits += 1;
            if state.pending_credits >= threshold {
                std::mem::take(&mut state.pending_credits)
            } else {
                0
            }
        };

        if grant > 0 {
            trace!(call_id = %self.id, grant, "returning credits");
            let frame = Frame::credit(self.id.as_u64(), grant);
            tokio::select! {
                biased;
                _ = self.done.cancelled() => {}
                _ = self.outbound.send(frame) => {}
            }
        }
    }

    /// Connection reader: accepts one envelope from the peer.
    pub(crate) fn accept_message(
        &self,
        inbound: &mpsc::Sender<Inbound>,
        seq: u64,
        payload: Vec<u8>,
    ) -> Result<(), Status> {
        {
            let mut state = self.state.lock();
            if state.status.is_some() {
                return Ok(());
            }
            if state.peer_closed {
                return Err(Status::internal(format!(
                    "envelope {seq} received after end of stream"
                )));
            }
            if seq != state.next_recv_seq {
                return Err(Status::internal(format!(
                    "out of order envelope: expected seq {}, got {seq}",
                    state.next_recv_seq
                )));
            }
            state.next_recv_seq += 1;
        }

        match inbound.try_send(Inbound::Message(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Status::internal("peer exceeded its send window")),
            // receiving half dropped: nobody is interested any more
            Err(TrySendError::Closed(_)) => Ok(()),
        }
    }

    /// Connection reader: the peer closed its direction.
    pub(crate) fn accept_half_close(
        &self,
        inbound: &mpsc::Sender<Inbound>,
        seq: u64,
    ) -> Result<(), Status> {
        {
            let mut state = self.state.lock();
            if state.status.is_some() {
                return Ok(());
            }
            if state.peer_closed {
                return Err(Status::internal("duplicate end of stream"));
            }
            if seq != state.next_recv_seq {
                return Err(Status::internal(format!(
                    "out of order end of stream: expected seq {}, got {seq}",
                    state.next_recv_seq
                )));
            }
            state.peer_closed = true;
        }

        match inbound.try_send(Inbound::End) {
            Ok(()) | Err(TrySendError::Closed(_)) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Status::internal("peer exceeded its send window")),
        }
    }

    /// Connection reader: the peer returned send credits. A client call
    /// takes the first grant as the peer's receive window.
    pub(crate) fn accept_credit(&self, credits: u32) -> Result<(), Status> {
        {
            let mut state = self.state.lock();
            if state.status.is_some() {
                return Ok(());
            }
            match state.peer_window {
                None if credits == 0 => {
                    return Err(Status::internal("peer announced an empty receive window"));
                }
                None => {
                    trace!(call_id = %self.id, window = credits, "peer receive window");
                    state.peer_window = Some(credits);
                }
                Some(window) => {
                    let available = self.send_window.available_permits();
                    if available + credits as usize > window as usize {
                        return Err(Status::internal(format!(
                            "peer granted {credits} credits with {available} of {window} available"
                        )));
                    }
                }
            }
        }
        self.send_window.add_permits(credits as usize);
        Ok(())
    }
}
