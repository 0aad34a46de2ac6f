// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Wire format.
//!
//! The connection carries length-delimited frames (4-byte big-endian length
//! prefix). Each frame body is the bincode encoding of a [`Frame`]: the call
//! it belongs to plus one [`FrameKind`].

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{Code, RpcError, Shape};

/// Upper bound of a `Message` frame body besides its payload: call id,
/// kind tag, sequence number and payload length, all varints.
pub(crate) const MESSAGE_FRAME_OVERHEAD: usize = 32;

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct Frame {
    pub call_id: u64,
    pub kind: FrameKind,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub enum FrameKind {
    /// Opens a call. `timeout_ms` is the time left when the frame was sent,
    /// `window` the number of envelopes the client accepts before it
    /// returns credit. The server answers with a `Credit` frame carrying
    /// its own window.
    Open {
        method: String,
        shape: Shape,
        timeout_ms: Option<u64>,
        window: u32,
        metadata: HashMap<String, String>,
    },
    /// One message envelope. `seq` starts at 0 in each direction.
    Message { seq: u64, payload: Vec<u8> },
    /// End of stream for the sender's direction; `seq` is the next sequence
    /// number the sender would have used.
    HalfClose { seq: u64 },
    /// Normal terminal status, server to client.
    Status { code: i32, message: String },
    /// Forced termination, either direction.
    Cancel { code: i32, message: String },
    /// Returns send credits to the peer.
    Credit { credits: u32 },
}

impl Frame {
    pub fn open(
        call_id: u64,
        method: impl Into<String>,
        shape: Shape,
        timeout_ms: Option<u64>,
        window: u32,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            call_id,
            kind: FrameKind::Open {
                method: method.into(),
                shape,
                timeout_ms,
                window,
                metadata,
            },
        }
    }

    pub fn message(call_id: u64, seq: u64, payload: Vec<u8>) -> Self {
        Self {
            call_id,
            kind: FrameKind::Message { seq, payload },
        }
    }

    pub fn half_close(call_id: u64, seq: u64) -> Self {
        Self {
            call_id,
            kind: FrameKind::HalfClose { seq },
        }
    }

    pub fn status(call_id: u64, code: Code, message: impl Into<String>) -> Self {
        Self {
            call_id,
            kind: FrameKind::Status {
                code: code.as_i32(),
                message: message.into(),
            },
        }
    }

    pub fn cancel(call_id: u64, code: Code, message: impl Into<String>) -> Self {
        Self {
            call_id,
            kind: FrameKind::Cancel {
                code: code.as_i32(),
                message: message.into(),
            },
        }
    }

    pub fn credit(call_id: u64, credits: u32) -> Self {
        Self {
            call_id,
            kind: FrameKind::Credit { credits },
        }
    }

    /// Short name of the frame kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FrameKind::Open { .. } => "open",
            FrameKind::Message { .. } => "message",
            FrameKind::HalfClose { .. } => "half-close",
            FrameKind::Status { .. } => "status",
            FrameKind::Cancel { .. } => "cancel",
            FrameKind::Credit { .. } => "credit",
        }
    }
}

/// Length-delimited bincode codec for [`Frame`]s.
#[derive(Debug)]
pub struct FrameCodec {
    framing: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            framing: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_size)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, RpcError> {
        let Some(body) = self.framing.decode(src)? else {
            return Ok(None);
        };
        let (frame, _len): (Frame, usize) =
            bincode::decode_from_slice(&body, bincode::config::standard())
                .map_err(|e| RpcError::FrameDecode(e.to_string()))?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = RpcError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), RpcError> {
        let body = bincode::encode_to_vec(&frame, bincode::config::standard())
            .map_err(|e| RpcError::FrameEncode(e.to_string()))?;
        self.framing.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}
