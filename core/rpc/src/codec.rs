// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Codec traits for call payloads.
//!
//! Message types are usually bincode-derived structs; [`bincode_codec!`]
//! implements both traits for them. Encoding failures are reported as
//! `Internal`, decoding failures as `InvalidArgument`.

use crate::Status;

#[doc(hidden)]
pub use bincode;

/// Trait for encoding messages to bytes
pub trait Encoder {
    fn encode(&self) -> Result<Vec<u8>, Status>;
}

/// Trait for decoding messages from bytes
pub trait Decoder: Sized {
    fn decode(buf: &[u8]) -> Result<Self, Status>;
}

/// Combined codec trait for types that can be both encoded and decoded
pub trait Codec: Encoder + Decoder {}

impl<T: Encoder + Decoder> Codec for T {}

impl Encoder for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>, Status> {
        Ok(self.clone())
    }
}

impl Decoder for Vec<u8> {
    fn decode(buf: &[u8]) -> Result<Self, Status> {
        Ok(buf.to_vec())
    }
}

/// Implements [`Encoder`] and [`Decoder`] with the bincode standard
/// configuration for each listed type.
#[macro_export]
macro_rules! bincode_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Encoder for $ty {
                fn encode(&self) -> Result<Vec<u8>, $crate::Status> {
                    $crate::codec::bincode::encode_to_vec(
                        self,
                        $crate::codec::bincode::config::standard(),
                    )
                    .map_err(|e| $crate::Status::internal(format!("encoding error: {}", e)))
                }
            }

            impl $crate::Decoder for $ty {
                fn decode(buf: &[u8]) -> Result<Self, $crate::Status> {
                    let (decoded, _len): (Self, usize) = $crate::codec::bincode::decode_from_slice(
                        buf,
                        $crate::codec::bincode::config::standard(),
                    )
                    .map_err(|e| $crate::Status::invalid_argument(format!("decoding error: {}", e)))?;
                    Ok(decoded)
                }
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Code;

    #[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
    struct Point {
        x: i32,
        label: String,
    }

    crate::bincode_codec!(Point);

    #[test]
    fn test_bincode_codec() {
        let point = Point {
            x: -7,
            label: "origin".to_string(),
        };
        let bytes = point.encode().unwrap();
        assert_eq!(Point::decode(&bytes).unwrap(), point);
    }

    #[test]
    fn test_decode_garbage_is_invalid_argument() {
        let err = Point::decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_raw_bytes_pass_through() {
        let raw = vec![1u8, 2, 3];
        assert_eq!(raw.encode().unwrap(), raw);
        assert_eq!(Vec::<u8>::decode(&raw).unwrap(), raw);
    }
}
