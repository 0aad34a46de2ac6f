// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Cardinality of a call: how many envelopes each direction may carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, bincode::Encode, bincode::Decode,
)]
pub enum Shape {
    /// one request, one response
    Unary,
    /// one request, any number of responses
    ServerStream,
    /// any number of requests, one response
    ClientStream,
    /// any number of requests and responses, directions closed independently
    BidiStream,
}

impl Shape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Unary => "unary",
            Shape::ServerStream => "server-stream",
            Shape::ClientStream => "client-stream",
            Shape::BidiStream => "bidi-stream",
        }
    }

    /// True when the client may send more than one request.
    pub fn client_streaming(&self) -> bool {
        matches!(self, Shape::ClientStream | Shape::BidiStream)
    }

    /// True when the server may send more than one response.
    pub fn server_streaming(&self) -> bool {
        matches!(self, Shape::ServerStream | Shape::BidiStream)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method exposed by a service. Declared once, as a constant, and shared
/// by the server registration and the client stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    service: &'static str,
    method: &'static str,
    shape: Shape,
}

impl MethodDescriptor {
    pub const fn new(service: &'static str, method: &'static str, shape: Shape) -> Self {
        Self {
            service,
            method,
            shape,
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Routing key carried in the call-open frame: `service/method`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.service, self.method)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.service, self.method, self.shape)
    }
}
