// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Connection plumbing shared by clients and servers.
//!
//! A connection runs two tasks: the writer drains the shared outbound queue
//! into the transport, the reader decodes frames and routes them to the
//! calls registered with the session coordinator. Neither task ever blocks
//! on a single call.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::call::{CallIdGenerator, CallLimits, CallSpec, Role};
use crate::coordinator::{CallEntry, SessionCoordinator};
use crate::frame::{Frame, FrameCodec, FrameKind};
use crate::server::{self, ServiceRegistry};
use crate::{CallId, Code, SessionConfig, Status, deadline};

// time allowed for pushing queued frames out once the connection is closing
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) struct Connection {
    role: Role,
    coordinator: SessionCoordinator,
    outbound: mpsc::Sender<Frame>,
    config: SessionConfig,
    call_ids: CallIdGenerator,
    closed: CancellationToken,
}

impl Connection {
    /// Splits the transport and spawns the reader and writer tasks. A
    /// server connection routes incoming `Open` frames to `services`.
    pub(crate) fn start<IO>(
        io: IO,
        role: Role,
        services: Option<Arc<ServiceRegistry>>,
        config: SessionConfig,
    ) -> Arc<Self>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (tx, rx) = mpsc::channel(config.outbound_queue());
        let reader = FramedRead::new(read_half, FrameCodec::new(config.max_frame_size()));
        let writer = FramedWrite::new(write_half, FrameCodec::new(config.max_frame_size()));

        let connection = Arc::new(Self {
            role,
            coordinator: SessionCoordinator::new(),
            outbound: tx,
            config,
            call_ids: CallIdGenerator::new(),
            closed: CancellationToken::new(),
        });

        tokio::spawn(write_loop(writer, rx, connection.closed.clone(), role));
        tokio::spawn(connection.clone().read_loop(reader, services));

        debug!(%role, "connection started");
        connection
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub(crate) fn outbound(&self) -> &mpsc::Sender<Frame> {
        &self.outbound
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Limits of a call on this connection, given what the peer announced.
    pub(crate) fn call_limits(&self, peer_window: Option<u32>) -> CallLimits {
        CallLimits {
            recv_window: self.config.window(),
            peer_window,
            max_frame_size: self.config.max_frame_size(),
        }
    }

    pub(crate) fn next_call_id(&self) -> CallId {
        self.call_ids.next()
    }

    pub(crate) fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stops both tasks. Calls still live end with `Unavailable`.
    pub(crate) fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let terminated = self.coordinator.on_connection_closed();
        debug!(role = %self.role, terminated, "connection closed locally");
    }

    async fn read_loop<R>(
        self: Arc<Self>,
        mut frames: FramedRead<R, FrameCodec>,
        services: Option<Arc<ServiceRegistry>>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => break,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => self.route(frame, services.as_ref()),
                Some(Err(e)) => {
                    warn!(role = %self.role, error = %e, "cannot read frame, closing connection");
                    break;
                }
                None => {
                    debug!(role = %self.role, "connection closed by peer");
                    break;
                }
            }
        }

        self.closed.cancel();
        let terminated = self.coordinator.on_connection_closed();
        debug!(role = %self.role, terminated, "connection reader stopped");
    }

    fn route(&self, frame: Frame, services: Option<&Arc<ServiceRegistry>>) {
        let id = CallId::new(frame.call_id);
        trace!(role = %self.role, call_id = %id, kind = frame.kind_name(), "frame received");

        match frame.kind {
            FrameKind::Open {
                method,
                shape,
                timeout_ms,
                window,
                metadata,
            } => {
                let Some(services) = services else {
                    warn!(call_id = %id, %method, "peer tried to open a call on a client connection");
                    self.send_control(Frame::cancel(
                        id.as_u64(),
                        Code::Unimplemented,
                        "this endpoint does not serve calls",
                    ));
                    return;
                };
                if window == 0 {
                    warn!(call_id = %id, %method, "peer opened a call with an empty window");
                    self.send_control(Frame::cancel(
                        id.as_u64(),
                        Code::Internal,
                        "open announced an empty receive window",
                    ));
                    return;
                }

                let spec = CallSpec {
                    id,
                    path: method,
                    shape,
                    role: Role::Server,
                    deadline: timeout_ms
                        .map(|ms| deadline::deadline_after(Duration::from_millis(ms))),
                    metadata,
                };
                match self.coordinator.register(
                    spec,
                    self.outbound.clone(),
                    self.call_limits(Some(window)),
                ) {
                    Ok((core, inbound)) => {
                        // announces the server window to the client
                        self.send_control(Frame::credit(id.as_u64(), self.config.window()));
                        deadline::arm(&core);
                        tokio::spawn(server::dispatch(services.clone(), core, inbound));
                    }
                    Err(status) if status.code() == Code::AlreadyExists => {
                        warn!(call_id = %id, "call id opened twice");
                        if let Some(entry) = self.coordinator.lookup(id) {
                            entry
                                .core
                                .abort(Status::internal(format!("call id {id} opened twice")));
                        }
                    }
                    Err(status) => {
                        self.send_control(Frame::cancel(
                            id.as_u64(),
                            status.code(),
                            status.message(),
                        ));
                    }
                }
            }
            FrameKind::Message { seq, payload } => self.with_call(id, |entry| {
                entry.core.accept_message(&entry.inbound, seq, payload)
            }),
            FrameKind::HalfClose { seq } => self.with_call(id, |entry| {
                entry.core.accept_half_close(&entry.inbound, seq)
            }),
            FrameKind::Credit { credits } => {
                self.with_call(id, |entry| entry.core.accept_credit(credits))
            }
            FrameKind::Status { code, message } => {
                if self.role == Role::Server {
                    warn!(call_id = %id, code, "ignoring status frame sent by a client");
                    return;
                }
                if let Some(entry) = self.coordinator.lookup(id) {
                    entry
                        .core
                        .terminate_from_peer(Status::from_wire(code, message), false);
                }
            }
            FrameKind::Cancel { code, message } => {
                if let Some(entry) = self.coordinator.lookup(id) {
                    entry
                        .core
                        .terminate_from_peer(Status::from_wire(code, message), true);
                }
            }
        }
    }

    // routes a frame to a live call; protocol faults abort that call only
    fn with_call<F>(&self, id: CallId, accept: F)
    where
        F: FnOnce(&CallEntry) -> Result<(), Status>,
    {
        let Some(entry) = self.coordinator.lookup(id) else {
            debug!(role = %self.role, call_id = %id, "frame for unknown call dropped");
            return;
        };
        if let Err(status) = accept(&entry) {
            warn!(
                role = %self.role,
                call_id = %id,
                method = %entry.core.path(),
                error = %status,
                "protocol fault, aborting call"
            );
            entry.core.abort(status);
        }
    }

    fn send_control(&self, frame: Frame) {
        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                let outbound = self.outbound.clone();
                tokio::spawn(async move {
                    let _ = outbound.send(frame).await;
                });
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut frames: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    role: Role,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = frames.recv() => {
                let Some(frame) = next else { break };
                if let Err(e) = sink.send(frame).await {
                    warn!(%role, error = %e, "cannot write frame, closing connection");
                    closed.cancel();
                    return;
                }
            }
        }
    }

    // frames queued before the close (final statuses, cancels) still go out
    let flush = async {
        while let Ok(frame) = frames.try_recv() {
            sink.feed(frame).await?;
        }
        sink.close().await
    };
    match tokio::time::timeout(FLUSH_TIMEOUT, flush).await {
        Ok(Ok(())) => debug!(%role, "connection writer stopped"),
        Ok(Err(e)) => debug!(%role, error = %e, "error while flushing connection"),
        Err(_) => debug!(%role, "timeout while flushing connection"),
    }
}
