// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Serving side: the typed method registry and the call dispatcher.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::call::{CallCore, Inbound, Role};
use crate::channel::{MessageReceiver, MessageSender, RequestStream, ResponseSink};
use crate::connection::Connection;
use crate::context::CallContext;
use crate::{Decoder, Encoder, MethodDescriptor, RpcError, SessionConfig, Shape, Status};

type HandlerFuture = BoxFuture<'static, Result<(), Status>>;
type BoxedHandler = Arc<dyn Fn(ServerCall) -> HandlerFuture + Send + Sync>;

/// A freshly opened call, before the handler gives it types.
struct ServerCall {
    core: Arc<CallCore>,
    inbound: mpsc::Receiver<Inbound>,
}

impl ServerCall {
    fn into_parts<Req: Decoder, Res: Encoder>(
        self,
    ) -> (RequestStream<Req>, ResponseSink<Res>, CallContext) {
        let context = CallContext::for_call(&self.core);
        (
            MessageReceiver::new(self.core.clone(), self.inbound, None),
            MessageSender::new(self.core, None),
            context,
        )
    }
}

fn missing_request() -> Status {
    Status::invalid_argument("expected exactly one request, got none")
}

fn extra_request() -> Status {
    Status::invalid_argument("expected exactly one request, got more")
}

struct RegisteredMethod {
    shape: Shape,
    handler: BoxedHandler,
}

/// Method path to typed handler, resolved once per call.
#[derive(Default)]
pub struct ServiceRegistry {
    methods: HashMap<String, RegisteredMethod>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<_> = self.methods.keys().collect();
        paths.sort();
        f.debug_struct("ServiceRegistry")
            .field("methods", &paths)
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Shape of the handler registered under `path`, if any.
    pub fn shape_of(&self, path: &str) -> Option<Shape> {
        self.methods.get(path).map(|m| m.shape)
    }

    /// Registered method paths with their shapes, sorted by path.
    pub fn methods(&self) -> Vec<(String, Shape)> {
        let mut methods: Vec<_> = self
            .methods
            .iter()
            .map(|(path, m)| (path.clone(), m.shape))
            .collect();
        methods.sort();
        methods
    }

    fn insert(
        &mut self,
        method: &MethodDescriptor,
        shape: Shape,
        handler: BoxedHandler,
    ) -> Result<&mut Self, RpcError> {
        if method.shape() != shape {
            return Err(RpcError::ShapeMismatch {
                path: method.path(),
                declared: method.shape(),
                registered: shape,
            });
        }

        match self.methods.entry(method.path()) {
            Entry::Occupied(entry) => Err(RpcError::DuplicateMethod(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(method = %method, "handler registered");
                entry.insert(RegisteredMethod { shape, handler });
                Ok(self)
            }
        }
    }

    /// Registers a single request, single response handler.
    pub fn register_unary<Req, Res, F, Fut>(
        &mut self,
        method: &MethodDescriptor,
        handler: F,
    ) -> Result<&mut Self, RpcError>
    where
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
        F: Fn(Req, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            method,
            Shape::Unary,
            Arc::new(move |call: ServerCall| {
                let handler = handler.clone();
                async move {
                    let (mut requests, responses, context) = call.into_parts::<Req, Res>();
                    let request = requests
                        .receive_single(missing_request, extra_request)
                        .await?;
                    let response = handler(request, context).await?;
                    responses.send(response).await
                }
                .boxed()
            }),
        )
    }

    /// Registers a handler answering one request with a response stream.
    pub fn register_server_stream<Req, Res, F, Fut>(
        &mut self,
        method: &MethodDescriptor,
        handler: F,
    ) -> Result<&mut Self, RpcError>
    where
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
        F: Fn(Req, ResponseSink<Res>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            method,
            Shape::ServerStream,
            Arc::new(move |call: ServerCall| {
                let handler = handler.clone();
                async move {
                    let (mut requests, responses, context) = call.into_parts::<Req, Res>();
                    let request = requests
                        .receive_single(missing_request, extra_request)
                        .await?;
                    handler(request, responses, context).await
                }
                .boxed()
            }),
        )
    }

    /// Registers a handler folding a request stream into one response.
    pub fn register_client_stream<Req, Res, F, Fut>(
        &mut self,
        method: &MethodDescriptor,
        handler: F,
    ) -> Result<&mut Self, RpcError>
    where
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
        F: Fn(RequestStream<Req>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            method,
            Shape::ClientStream,
            Arc::new(move |call: ServerCall| {
                let handler = handler.clone();
                async move {
                    let (requests, responses, context) = call.into_parts::<Req, Res>();
                    let response = handler(requests, context).await?;
                    responses.send(response).await
                }
                .boxed()
            }),
        )
    }

    /// Registers a handler with independent request and response streams.
    pub fn register_bidi_stream<Req, Res, F, Fut>(
        &mut self,
        method: &MethodDescriptor,
        handler: F,
    ) -> Result<&mut Self, RpcError>
    where
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
        F: Fn(RequestStream<Req>, ResponseSink<Res>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            method,
            Shape::BidiStream,
            Arc::new(move |call: ServerCall| {
                let handler = handler.clone();
                async move {
                    let (requests, responses, context) = call.into_parts::<Req, Res>();
                    handler(requests, responses, context).await
                }
                .boxed()
            }),
        )
    }
}

/// Runs the handler of a newly opened call and turns its result into the
/// terminal status. The handler is dropped as soon as the call is
/// terminated from outside (deadline, cancel, connection loss).
pub(crate) async fn dispatch(
    services: Arc<ServiceRegistry>,
    core: Arc<CallCore>,
    inbound: mpsc::Receiver<Inbound>,
) {
    let handler = match services.methods.get(core.path()) {
        Some(method) if method.shape == core.shape() => method.handler.clone(),
        _ => {
            debug!(call_id = %core.id(), method = %core.path(), shape = %core.shape(), "method not found");
            let status = Status::unimplemented(format!("method not found: {}", core.path()));
            core.complete(status).await;
            return;
        }
    };

    let done = core.done().clone();
    let call = ServerCall {
        core: core.clone(),
        inbound,
    };

    let outcome = tokio::select! {
        biased;
        _ = done.cancelled() => {
            debug!(call_id = %core.id(), method = %core.path(), "call terminated while its handler was running");
            return;
        }
        outcome = AssertUnwindSafe(handler(call)).catch_unwind() => outcome,
    };

    let status = match outcome {
        Ok(Ok(())) => Status::ok(),
        Ok(Err(status)) => {
            debug!(
                call_id = %core.id(),
                method = %core.path(),
                code = %status.code(),
                message = status.message(),
                "handler returned an error"
            );
            status
        }
        Err(_) => {
            error!(call_id = %core.id(), method = %core.path(), "handler panicked");
            Status::internal("handler panicked")
        }
    };
    core.complete(status).await;
}

/// Serving end of one connection.
#[derive(Debug, Clone)]
pub struct ServerConnection {
    connection: Arc<Connection>,
}

impl ServerConnection {
    /// Serves calls opened by the peer on `io` with the handlers of
    /// `registry`. Must be called from within a tokio runtime.
    pub fn accept<IO>(io: IO, registry: Arc<ServiceRegistry>, config: SessionConfig) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = Connection::start(io, Role::Server, Some(registry), config);
        Self { connection }
    }

    pub fn live_calls(&self) -> usize {
        self.connection.coordinator().len()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.connection.closed().cancelled().await
    }

    /// Cancels every live call with `Unavailable` and closes the
    /// connection once the cancellations are flushed.
    pub fn shutdown(&self) {
        let cancelled = self
            .connection
            .coordinator()
            .abort_all(Status::unavailable("server shutting down"));
        info!(role = %self.connection.role(), cancelled, "shutting down connection");
        self.connection.close();
    }
}
