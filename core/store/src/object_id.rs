// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! 12-byte document identifiers.
//!
//! Layout: 4-byte big-endian seconds since the epoch, 5 bytes chosen
//! randomly once per process, 3-byte big-endian counter. Ids created by one
//! process sort in creation order; the text form is 24 lowercase hex digits.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;

use crate::StoreError;

const COUNTER_MASK: u32 = 0x00ff_ffff;

lazy_static! {
    static ref PROCESS_UNIQUE: [u8; 5] = rand::random();
    static ref COUNTER: AtomicU32 = AtomicU32::new(rand::random::<u32>() & COUNTER_MASK);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Creation time, in seconds since the epoch.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| StoreError::InvalidId {
            id: s.to_string(),
            reason: reason.to_string(),
        };

        if s.len() != 24 {
            return Err(invalid("expected 24 hex digits"));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid("not a hex string"));
        }

        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|_| invalid("not a hex string"))?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let id = ObjectId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 24);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(text.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_known_value() {
        let id: ObjectId = "5f2b3c4d5e6f708192a3b4c5".parse().unwrap();
        assert_eq!(id.timestamp(), 0x5f2b3c4d);
        assert_eq!(id.bytes()[11], 0xc5);
        assert_eq!(id.to_hex(), "5f2b3c4d5e6f708192a3b4c5");
        // upper case input is accepted, output is lower case
        let upper: ObjectId = "5F2B3C4D5E6F708192A3B4C5".parse().unwrap();
        assert_eq!(upper, id);
    }

    #[test]
    fn test_malformed_ids() {
        for input in [
            "",
            "abc",
            "5f2b3c4d5e6f708192a3b4c",
            "zz2b3c4d5e6f708192a3b4c5",
            "+f2b3c4d5e6f708192a3b4c5",
            "5f2b3c4d5e6f708192a3b4ĉ",
        ] {
            let err = input.parse::<ObjectId>().unwrap_err();
            assert!(matches!(err, StoreError::InvalidId { .. }), "{input}");
        }
    }

    #[test]
    fn test_ids_are_ordered() {
        let first = ObjectId::new();
        let second = ObjectId::new();
        assert!(first < second);
        assert!(first.timestamp() > 0);
    }
}
