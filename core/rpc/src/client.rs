// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Client side of a connection: typed call starters and shape-scoped
//! call handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::debug;

use crate::call::{CallCore, CallSpec, Inbound, Role};
use crate::channel::{CallControl, CancelOnDrop, MessageReceiver, MessageSender};
use crate::connection::Connection;
use crate::frame::Frame;
use crate::{
    CallId, Code, Decoder, Encoder, MethodDescriptor, SessionConfig, Shape, Status, deadline,
};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    metadata: HashMap<String, String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline relative to the start of the call. Overrides the session
    /// default timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

#[derive(Debug)]
struct ClientInner {
    connection: Arc<Connection>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.connection.close();
    }
}

/// Initiating end of a connection. Cheap to clone; the connection is
/// closed when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Starts a client over an established byte stream. Must be called
    /// from within a tokio runtime.
    pub fn connect<IO>(io: IO, config: SessionConfig) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = Connection::start(io, Role::Client, None, config);
        Self {
            inner: Arc::new(ClientInner { connection }),
        }
    }

    /// Number of calls not yet terminal.
    pub fn live_calls(&self) -> usize {
        self.inner.connection.coordinator().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.connection.is_closed()
    }

    /// Resolves once the connection is closed, by either side.
    pub async fn closed(&self) {
        self.inner.connection.closed().cancelled().await
    }

    /// Severs the connection. Live calls end with `Unavailable`.
    pub fn close(&self) {
        self.inner.connection.close();
    }

    async fn start_call(
        &self,
        method: &MethodDescriptor,
        shape: Shape,
        options: CallOptions,
    ) -> Result<(Arc<CallCore>, mpsc::Receiver<Inbound>), Status> {
        if method.shape() != shape {
            return Err(Status::invalid_argument(format!(
                "method {} is {}, cannot be called as {}",
                method.path(),
                method.shape(),
                shape
            )));
        }

        let connection = &self.inner.connection;
        if connection.is_closed() {
            return Err(Status::unavailable("connection lost"));
        }

        let id = connection.next_call_id();
        let deadline = options
            .timeout
            .or(connection.config().default_timeout())
            .map(deadline::deadline_after);
        let open = Frame::open(
            id.as_u64(),
            method.path(),
            shape,
            deadline.map(deadline::remaining_millis),
            connection.config().window(),
            options.metadata.clone(),
        );
        let spec = CallSpec {
            id,
            path: method.path(),
            shape,
            role: Role::Client,
            deadline,
            metadata: options.metadata,
        };

        let (core, inbound) = connection
            .coordinator()
            .register(spec, connection.outbound().clone(), connection.call_limits(None))
            .map_err(|status| match status.code() {
                // ids come from a monotonic counter, a collision is a bug
                Code::AlreadyExists => Status::internal(status.message()),
                _ => status,
            })?;

        tokio::select! {
            biased;
            _ = core.done().cancelled() => {
                return Err(core.status().unwrap_or_else(|| Status::unavailable("connection lost")));
            }
            res = connection.outbound().send(open) => {
                if res.is_err() {
                    let status = Status::unavailable("connection lost");
                    core.terminate_local(status.clone());
                    return Err(status);
                }
            }
        }

        deadline::arm(&core);
        debug!(call_id = %id, method = %core.path(), shape = %shape, "call started");
        Ok((core, inbound))
    }

    async fn open<Req: Encoder, Res: Decoder>(
        &self,
        method: &MethodDescriptor,
        shape: Shape,
        options: CallOptions,
    ) -> Result<(MessageSender<Req>, MessageReceiver<Res>), Status> {
        let (core, inbound) = self.start_call(method, shape, options).await?;
        let guard = CancelOnDrop::new(core.clone());
        Ok((
            MessageSender::new(core.clone(), Some(guard.clone())),
            MessageReceiver::new(core, inbound, Some(guard)),
        ))
    }

    pub async fn open_unary<Req: Encoder, Res: Decoder>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<UnaryCall<Req, Res>, Status> {
        let (sender, receiver) = self.open(method, Shape::Unary, options).await?;
        Ok(UnaryCall {
            sender,
            receiver,
            sent: false,
        })
    }

    pub async fn open_server_stream<Req: Encoder, Res: Decoder>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<ServerStreamCall<Req, Res>, Status> {
        let (sender, receiver) = self.open(method, Shape::ServerStream, options).await?;
        Ok(ServerStreamCall {
            sender,
            receiver,
            sent: false,
        })
    }

    pub async fn open_client_stream<Req: Encoder, Res: Decoder>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<ClientStreamCall<Req, Res>, Status> {
        let (sender, receiver) = self.open(method, Shape::ClientStream, options).await?;
        Ok(ClientStreamCall { sender, receiver })
    }

    pub async fn open_bidi_stream<Req: Encoder, Res: Decoder>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<BidiStreamCall<Req, Res>, Status> {
        let (sender, receiver) = self.open(method, Shape::BidiStream, options).await?;
        Ok(BidiStreamCall { sender, receiver })
    }

    /// One request, one response.
    pub async fn unary<Req: Encoder, Res: Decoder>(
        &self,
        method: &MethodDescriptor,
        request: Req,
        options: CallOptions,
    ) -> Result<Res, Status> {
        let mut call = self.open_unary::<Req, Res>(method, options).await?;
        if let Err(status) = call.send_one(request).await {
            // the server may have answered before the request went out
            if call.status().is_some_and(|s| s.is_err()) {
                return call.receive_one().await;
            }
            return Err(status);
        }
        call.receive_one().await
    }
}

fn missing_response() -> Status {
    Status::internal("call completed without a response")
}

fn extra_response() -> Status {
    Status::internal("server sent more than one response")
}

// the single request of a unary or server-streaming call
async fn send_single<Req: Encoder>(
    sender: &MessageSender<Req>,
    sent: &mut bool,
    request: Req,
) -> Result<(), Status> {
    if std::mem::replace(sent, true) {
        return Err(Status::failed_precondition("request already sent"));
    }
    sender.send(request).await?;
    sender.close().await;
    Ok(())
}

async fn receive_single<Res: Decoder>(
    receiver: &mut MessageReceiver<Res>,
) -> Result<Res, Status> {
    let result = receiver
        .receive_single(missing_response, extra_response)
        .await;
    if let Err(status) = &result {
        receiver.control().abort(status.clone());
    }
    result
}

/// Handle of a unary call.
#[derive(Debug)]
pub struct UnaryCall<Req, Res> {
    sender: MessageSender<Req>,
    receiver: MessageReceiver<Res>,
    sent: bool,
}

impl<Req: Encoder, Res: Decoder> UnaryCall<Req, Res> {
    /// Sends the request and closes the send direction.
    pub async fn send_one(&mut self, request: Req) -> Result<(), Status> {
        send_single(&self.sender, &mut self.sent, request).await
    }

    /// Waits for the response and the terminal status.
    pub async fn receive_one(&mut self) -> Result<Res, Status> {
        receive_single(&mut self.receiver).await
    }

    pub fn cancel(&self) {
        self.sender.control().cancel()
    }

    pub fn status(&self) -> Option<Status> {
        self.sender.status()
    }

    pub fn call_id(&self) -> CallId {
        self.sender.call_id()
    }
}

/// Handle of a server-streaming call.
#[derive(Debug)]
pub struct ServerStreamCall<Req, Res> {
    sender: MessageSender<Req>,
    receiver: MessageReceiver<Res>,
    sent: bool,
}

impl<Req: Encoder, Res: Decoder> ServerStreamCall<Req, Res> {
    pub async fn send_one(&mut self, request: Req) -> Result<(), Status> {
        send_single(&self.sender, &mut self.sent, request).await
    }

    /// Next response, `None` once the call completed with `OK`.
    pub async fn receive(&mut self) -> Result<Option<Res>, Status> {
        self.receiver.receive().await
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Res, Status>> {
        self.receiver.into_stream()
    }

    pub fn cancel(&self) {
        self.sender.control().cancel()
    }

    pub fn status(&self) -> Option<Status> {
        self.sender.status()
    }

    pub fn call_id(&self) -> CallId {
        self.sender.call_id()
    }
}

/// Handle of a client-streaming call.
#[derive(Debug)]
pub struct ClientStreamCall<Req, Res> {
    sender: MessageSender<Req>,
    receiver: MessageReceiver<Res>,
}

impl<Req: Encoder, Res: Decoder> ClientStreamCall<Req, Res> {
    pub async fn send(&self, request: Req) -> Result<(), Status> {
        self.sender.send(request).await
    }

    /// Ends the request stream and waits for the single response.
    pub async fn close_and_receive(mut self) -> Result<Res, Status> {
        self.sender.close().await;
        receive_single(&mut self.receiver).await
    }

    pub fn cancel(&self) {
        self.sender.control().cancel()
    }

    pub fn status(&self) -> Option<Status> {
        self.sender.status()
    }

    pub fn call_id(&self) -> CallId {
        self.sender.call_id()
    }
}

/// Handle of a bidirectional streaming call. Both directions are
/// independent; closing the send direction leaves responses flowing.
#[derive(Debug)]
pub struct BidiStreamCall<Req, Res> {
    sender: MessageSender<Req>,
    receiver: MessageReceiver<Res>,
}

impl<Req: Encoder, Res: Decoder> BidiStreamCall<Req, Res> {
    pub async fn send(&self, request: Req) -> Result<(), Status> {
        self.sender.send(request).await
    }

    pub async fn receive(&mut self) -> Result<Option<Res>, Status> {
        self.receiver.receive().await
    }

    pub async fn close_send(&self) {
        self.sender.close().await
    }

    /// Separates the directions so they can be driven from different
    /// tasks. The call is cancelled once both halves are dropped before it
    /// completed.
    pub fn split(self) -> (MessageSender<Req>, MessageReceiver<Res>) {
        (self.sender, self.receiver)
    }

    /// Sends every request of `requests` while handing each response to
    /// `on_response`. Both loops run concurrently and are joined before
    /// returning the outcome of the call.
    pub async fn drive<S, F>(self, requests: S, mut on_response: F) -> Result<(), Status>
    where
        S: Stream<Item = Req>,
        F: FnMut(Res),
    {
        let (sender, mut receiver) = self.split();

        let send_loop = async {
            futures::pin_mut!(requests);
            while let Some(request) = requests.next().await {
                if let Err(status) = sender.send(request).await {
                    // a server done early is not a failure of this loop
                    if sender.status().is_some_and(|s| s.is_ok()) {
                        return Ok(());
                    }
                    return Err(status);
                }
            }
            sender.close().await;
            Ok::<(), Status>(())
        };

        let receive_loop = async {
            while let Some(response) = receiver.receive().await? {
                on_response(response);
            }
            Ok::<(), Status>(())
        };

        let (sent, received) = tokio::join!(send_loop, receive_loop);
        received?;
        sent
    }

    pub fn cancel(&self) {
        self.sender.control().cancel()
    }

    pub fn status(&self) -> Option<Status> {
        self.sender.status()
    }

    pub fn call_id(&self) -> CallId {
        self.sender.call_id()
    }
}
