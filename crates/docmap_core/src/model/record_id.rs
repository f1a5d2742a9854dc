//! Record identity type.
//!
//! # Responsibility
//! - Generate globally unique 12-byte identifiers compatible with the
//!   backing store's native id format.
//! - Parse and render the 24-hex-character textual form.
//!
//! # Invariants
//! - Byte layout: 4-byte big-endian unix seconds, 5 process-unique random
//!   bytes, 3-byte big-endian counter.
//! - Ids generated in one process never repeat until the counter wraps
//!   within the same second.

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const RECORD_ID_BYTES: usize = 12;
const RECORD_ID_HEX_LEN: usize = RECORD_ID_BYTES * 2;
const COUNTER_MASK: u32 = 0x00ff_ffff;

static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(|| {
    let bytes = *Uuid::new_v4().as_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
});

static COUNTER: Lazy<AtomicU32> = Lazy::new(|| {
    let bytes = *Uuid::new_v4().as_bytes();
    AtomicU32::new(u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]))
});

/// Globally unique identity of one record within its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId([u8; RECORD_ID_BYTES]);

impl RecordId {
    /// Generates a fresh id stamped with the current time.
    pub fn new() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or_default();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0_u8; RECORD_ID_BYTES];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(PROCESS_UNIQUE.as_slice());
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; RECORD_ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; RECORD_ID_BYTES] {
        self.0
    }

    /// Unix seconds encoded in the leading four bytes.
    pub fn timestamp_secs(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Parses the 24-character hex form (case-insensitive).
    pub fn parse_str(value: &str) -> Result<Self, RecordIdParseError> {
        let trimmed = value.trim();
        if trimmed.len() != RECORD_ID_HEX_LEN {
            return Err(RecordIdParseError::InvalidLength(trimmed.len()));
        }

        let mut bytes = [0_u8; RECORD_ID_BYTES];
        for (index, chunk) in trimmed.as_bytes().chunks(2).enumerate() {
            let high = hex_digit(chunk[0]);
            let low = hex_digit(chunk[1]);
            match (high, low) {
                (Some(high), Some(low)) => bytes[index] = (high << 4) | low,
                _ => return Err(RecordIdParseError::InvalidHex(trimmed.to_string())),
            }
        }

        Ok(Self(bytes))
    }

    /// Renders the 24-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(RECORD_ID_HEX_LEN);
        for byte in self.0 {
            out.push(DIGITS[usize::from(byte >> 4)] as char);
            out.push(DIGITS[usize::from(byte & 0x0f)] as char);
        }
        out
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for RecordId {
    type Err = RecordIdParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse_str(value)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse_str(&text).map_err(serde::de::Error::custom)
    }
}

/// Textual record id could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIdParseError {
    InvalidLength(usize),
    InvalidHex(String),
}

impl Display for RecordIdParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLength(len) => write!(
                f,
                "record id must be {RECORD_ID_HEX_LEN} hex characters, got {len}"
            ),
            Self::InvalidHex(value) => write!(f, "record id `{value}` is not valid hex"),
        }
    }
}

impl Error for RecordIdParseError {}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordId, RecordIdParseError};
    use std::collections::HashSet;

    #[test]
    fn hex_form_parses_back_to_same_id() {
        let id = RecordId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(RecordId::parse_str(&hex).expect("own hex should parse"), id);
        assert_eq!(
            RecordId::parse_str(&hex.to_uppercase()).expect("upper-case hex should parse"),
            id
        );
    }

    #[test]
    fn consecutive_ids_are_unique() {
        let ids: HashSet<RecordId> = (0..1_000).map(|_| RecordId::new()).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            RecordId::parse_str("abc"),
            Err(RecordIdParseError::InvalidLength(3))
        );
        assert!(matches!(
            RecordId::parse_str("zz0000000000000000000000"),
            Err(RecordIdParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn timestamp_is_recent() {
        let id = RecordId::parse_str("5aa9399f229cbe35cc9174ca").expect("fixture id");
        assert_eq!(id.timestamp_secs(), 0x5aa9_399f);
        assert!(RecordId::new().timestamp_secs() > 0x5aa9_399f);
    }
}
