// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Typed message channels over a call.
//!
//! [`MessageSender`] and [`MessageReceiver`] are the two directions of a
//! call as seen by application code, on either side of the connection.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;

use crate::call::{CallCore, CallId, Inbound, Role};
use crate::{Decoder, Encoder, Status, deadline};

/// Cancels a client call once every handle on it is gone.
pub(crate) struct CancelOnDrop {
    core: Arc<CallCore>,
}

impl CancelOnDrop {
    pub(crate) fn new(core: Arc<CallCore>) -> Arc<Self> {
        Arc::new(Self { core })
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.core.is_terminal() {
            self.core.abort(Status::cancelled("call handle dropped"));
        }
    }
}

/// Outbound direction of a call.
pub struct MessageSender<T> {
    core: Arc<CallCore>,
    guard: Option<Arc<CancelOnDrop>>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for MessageSender<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            guard: self.guard.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for MessageSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSender")
            .field("call", &self.core)
            .finish()
    }
}

impl<T: Encoder> MessageSender<T> {
    pub(crate) fn new(core: Arc<CallCore>, guard: Option<Arc<CancelOnDrop>>) -> Self {
        Self {
            core,
            guard,
            _marker: PhantomData,
        }
    }

    /// Encodes and sends one message, waiting for send credit if the peer
    /// is slower than this side.
    ///
    /// Fails with the terminal status of the call when it was cancelled,
    /// timed out or lost its connection, and with `FailedPrecondition` once
    /// the direction is closed.
    pub async fn send(&self, message: T) -> Result<(), Status> {
        let payload = message.encode()?;
        self.core.send(payload).await
    }

    /// Half-closes the direction. Idempotent.
    pub async fn close(&self) {
        self.core.close_send().await
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_send_closed()
    }

    pub fn status(&self) -> Option<Status> {
        self.core.status()
    }

    pub fn call_id(&self) -> CallId {
        self.core.id()
    }

    pub fn control(&self) -> CallControl {
        CallControl::new(self.core.clone())
    }
}

/// Inbound direction of a call.
pub struct MessageReceiver<T> {
    core: Arc<CallCore>,
    inbound: mpsc::Receiver<Inbound>,
    _guard: Option<Arc<CancelOnDrop>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for MessageReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageReceiver")
            .field("call", &self.core)
            .finish()
    }
}

impl<T: Decoder> MessageReceiver<T> {
    pub(crate) fn new(
        core: Arc<CallCore>,
        inbound: mpsc::Receiver<Inbound>,
        guard: Option<Arc<CancelOnDrop>>,
    ) -> Self {
        Self {
            core,
            inbound,
            _guard: guard,
            _marker: PhantomData,
        }
    }

    /// Next message in send order, `Ok(None)` at the end of the stream.
    ///
    /// On the client the end of the response stream is reported once the
    /// call completed with `OK`; any other terminal status is returned as
    /// the error. A payload that does not decode aborts the call.
    pub async fn receive(&mut self) -> Result<Option<T>, Status> {
        match self.core.receive(&mut self.inbound).await? {
            Some(payload) => match T::decode(&payload) {
                Ok(message) => Ok(Some(message)),
                Err(status) => {
                    self.core.abort(status.clone());
                    Err(status)
                }
            },
            None if self.core.role() == Role::Client && !self.core.is_reported() => {
                // responses ended early, the status frame decides the outcome
                self.core.done().cancelled().await;
                match self.core.receive(&mut self.inbound).await? {
                    Some(_) => Err(Status::internal("response after end of stream")),
                    None => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    /// Receives a direction expected to carry exactly one message.
    pub(crate) async fn receive_single(
        &mut self,
        missing: impl FnOnce() -> Status,
        extra: impl FnOnce() -> Status,
    ) -> Result<T, Status> {
        let Some(message) = self.receive().await? else {
            return Err(missing());
        };
        match self.receive().await? {
            None => Ok(message),
            Some(_) => Err(extra()),
        }
    }

    /// Adapts the receiver into a stream. The stream ends after the end of
    /// the direction or after yielding the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, Status>> {
        let mut receiver = self;
        async_stream::stream! {
            loop {
                match receiver.receive().await {
                    Ok(Some(message)) => yield Ok(message),
                    Ok(None) => break,
                    Err(status) => {
                        yield Err(status);
                        break;
                    }
                }
            }
        }
    }

    pub fn status(&self) -> Option<Status> {
        self.core.status()
    }

    pub fn call_id(&self) -> CallId {
        self.core.id()
    }

    pub fn control(&self) -> CallControl {
        CallControl::new(self.core.clone())
    }
}

/// Stream of requests handed to a server handler.
pub type RequestStream<T> = MessageReceiver<T>;

/// Response direction handed to a server handler.
pub type ResponseSink<T> = MessageSender<T>;

/// Untyped control over a call: cancellation and outcome.
#[derive(Debug, Clone)]
pub struct CallControl {
    core: Arc<CallCore>,
}

impl CallControl {
    pub(crate) fn new(core: Arc<CallCore>) -> Self {
        Self { core }
    }

    /// Cancels the call. The peer is told, pending operations on both
    /// sides fail with `Cancelled`. No-op on a terminal call.
    pub fn cancel(&self) {
        deadline::cancel(&self.core);
    }

    pub fn status(&self) -> Option<Status> {
        self.core.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.core.is_terminal()
    }

    pub fn call_id(&self) -> CallId {
        self.core.id()
    }

    /// Forces the call to `status` and tells the peer.
    pub(crate) fn abort(&self, status: Status) -> bool {
        self.core.abort(status)
    }

    /// Waits for the terminal status.
    pub async fn finished(&self) -> Status {
        self.core.done().cancelled().await;
        self.core
            .status()
            .unwrap_or_else(|| Status::internal("call finished without a status"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Weak;

    use futures::StreamExt;

    use crate::call::{CallLimits, CallSpec};
    use crate::frame::{Frame, FrameKind};
    use crate::{Code, Shape};

    struct Wire {
        core: Arc<CallCore>,
        inbound: mpsc::Sender<Inbound>,
        outbound: mpsc::Receiver<Frame>,
    }

    fn open(window: u32) -> (Wire, mpsc::Receiver<Inbound>) {
        let (tx, outbound) = mpsc::channel(64);
        let (inbound, rx) = mpsc::channel(window as usize + 1);
        let spec = CallSpec {
            id: CallId::new(3),
            path: "test.Echo/Chat".to_string(),
            shape: Shape::BidiStream,
            role: Role::Server,
            deadline: None,
            metadata: HashMap::new(),
        };
        let core = Arc::new(CallCore::new(spec, tx, CallLimits::symmetric(window), Weak::new()));
        (
            Wire {
                core,
                inbound,
                outbound,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_sender_encodes_payload() {
        let (mut wire, _rx) = open(4);
        let sender = MessageSender::<Vec<u8>>::new(wire.core.clone(), None);
        sender.send(vec![1, 2, 3]).await.unwrap();
        assert_eq!(
            wire.outbound.recv().await.unwrap(),
            Frame::message(3, 0, vec![1, 2, 3])
        );
        assert!(!sender.is_closed());
        sender.close().await;
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_receive_single() {
        let (wire, rx) = open(4);
        let mut receiver = MessageReceiver::<Vec<u8>>::new(wire.core.clone(), rx, None);
        wire.core.accept_message(&wire.inbound, 0, vec![5]).unwrap();
        wire.core.accept_half_close(&wire.inbound, 1).unwrap();

        let message = receiver
            .receive_single(
                || Status::invalid_argument("none"),
                || Status::invalid_argument("too many"),
            )
            .await
            .unwrap();
        assert_eq!(message, vec![5]);
    }

    #[tokio::test]
    async fn test_receive_single_rejects_extra_message() {
        let (wire, rx) = open(4);
        let mut receiver = MessageReceiver::<Vec<u8>>::new(wire.core.clone(), rx, None);
        wire.core.accept_message(&wire.inbound, 0, vec![5]).unwrap();
        wire.core.accept_message(&wire.inbound, 1, vec![6]).unwrap();

        let err = receiver
            .receive_single(
                || Status::invalid_argument("none"),
                || Status::invalid_argument("too many"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.message(), "too many");
    }

    #[tokio::test]
    async fn test_stream_ends_with_terminal_error() {
        let (wire, rx) = open(4);
        let receiver = MessageReceiver::<Vec<u8>>::new(wire.core.clone(), rx, None);
        wire.core.accept_message(&wire.inbound, 0, vec![1]).unwrap();
        wire.core
            .terminate_from_peer(Status::not_found("gone"), false);

        let items: Vec<_> = receiver.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(vec![1]));
        assert_eq!(items[1].as_ref().unwrap_err().code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_cancels() {
        let (mut wire, rx) = open(4);
        let guard = CancelOnDrop::new(wire.core.clone());
        let sender = MessageSender::<Vec<u8>>::new(wire.core.clone(), Some(guard.clone()));
        let receiver = MessageReceiver::<Vec<u8>>::new(wire.core.clone(), rx, Some(guard));

        drop(sender);
        assert!(!wire.core.is_terminal());
        drop(receiver);
        assert_eq!(wire.core.status().unwrap().code(), Code::Cancelled);
        assert!(matches!(
            wire.outbound.recv().await.unwrap().kind,
            FrameKind::Cancel { .. }
        ));
    }

    #[tokio::test]
    async fn test_control_cancel_and_finished() {
        let (wire, _rx) = open(4);
        let control = CallControl::new(wire.core.clone());
        assert!(!control.is_terminal());
        control.cancel();
        control.cancel();
        assert_eq!(control.finished().await.code(), Code::Cancelled);
    }
}
