// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! RPC session core.
//!
//! Multiplexes calls of four shapes (unary, server streaming, client
//! streaming, bidirectional streaming) over one ordered byte connection,
//! with per-call flow control, deadlines, cancellation and a single
//! terminal [`Status`] per call observed by both ends.

mod call;
mod channel;
mod client;
pub mod codec;
mod connection;
mod context;
mod coordinator;
mod deadline;
mod error;
pub mod frame;
mod method;
mod server;
mod status;

pub mod config;

pub use call::{CallId, Role};
pub use channel::{CallControl, MessageReceiver, MessageSender, RequestStream, ResponseSink};
pub use client::{
    BidiStreamCall, CallOptions, Client, ClientStreamCall, ServerStreamCall, UnaryCall,
};
pub use codec::{Codec, Decoder, Encoder};
pub use config::{MAX_TIMEOUT, SessionConfig};
pub use context::CallContext;
pub use error::RpcError;
pub use frame::{Frame, FrameCodec, FrameKind};
pub use method::{MethodDescriptor, Shape};
pub use server::{ServerConnection, ServiceRegistry};
pub use status::{Code, Status};
