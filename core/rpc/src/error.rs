// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures outside the lifetime of a single call.
///
/// Everything that happens to a call is reported as a [`crate::Status`];
/// this type covers the connection itself and service registration.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame encode error: {0}")]
    FrameEncode(String),

    #[error("frame decode error: {0}")]
    FrameDecode(String),

    #[error("method {0} registered twice")]
    DuplicateMethod(String),

    #[error("method {path} is declared {declared}, handler is {registered}")]
    ShapeMismatch {
        path: String,
        declared: crate::Shape,
        registered: crate::Shape,
    },
}
