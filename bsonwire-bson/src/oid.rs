//! 12-byte ObjectId values and the process-wide generator behind them.
//!
//! Layout (big-endian fields):
//!
//! ```text
//! +-----------+------------+---------+-----------+
//! | seconds   | machine id | pid     | counter   |
//! | 4 bytes   | 3 bytes    | 2 bytes | 3 bytes   |
//! +-----------+------------+---------+-----------+
//! ```

use crate::error::BsonError;
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

/// Number of bytes in an ObjectId.
pub const OBJECT_ID_LEN: usize = 12;

const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// Process-global state used to mint ObjectIds.
///
/// The machine id is drawn once per process; the counter increases by one
/// per generated id and wraps modulo 2^24.
struct OidGenerator {
    machine_id: [u8; 3],
    process_id: u16,
    counter: AtomicU32,
}

impl OidGenerator {
    fn global() -> &'static OidGenerator {
        static GENERATOR: OnceLock<OidGenerator> = OnceLock::new();
        GENERATOR.get_or_init(|| {
            let mut rng = rand::rng();
            OidGenerator {
                machine_id: rng.random(),
                process_id: (std::process::id() & 0xFFFF) as u16,
                counter: AtomicU32::new(rng.random::<u32>() & COUNTER_MASK),
            }
        })
    }

    fn next_counter(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::SeqCst) & COUNTER_MASK
    }
}

/// A 12-byte BSON ObjectId.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Generates a new id from the current time and the global counter.
    pub fn new() -> Self {
        Self::generate_at(Utc::now().timestamp() as u32)
    }

    fn generate_at(seconds: u32) -> Self {
        let generator = OidGenerator::global();
        let counter = generator.next_counter();

        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..7].copy_from_slice(&generator.machine_id);
        bytes[7..9].copy_from_slice(&generator.process_id.to_be_bytes());
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Builds an id whose timestamp is `seconds` and whose remaining bytes
    /// are zero. Useful as a range boundary in time-based queries.
    pub fn from_time(seconds: u32) -> Self {
        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; OBJECT_ID_LEN] {
        self.0
    }

    /// Parses a 24-digit hexadecimal string.
    pub fn parse_str(hex_str: &str) -> Result<Self, BsonError> {
        if hex_str.len() != OBJECT_ID_LEN * 2 {
            return Err(BsonError::InvalidObjectId(format!(
                "expected {} hex digits, got {}",
                OBJECT_ID_LEN * 2,
                hex_str.len()
            )));
        }
        let mut bytes = [0u8; OBJECT_ID_LEN];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|e| BsonError::InvalidObjectId(format!("{hex_str}: {e}")))?;
        Ok(Self(bytes))
    }

    /// Lowercase 24-digit hexadecimal form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Seconds since the Unix epoch embedded in the id.
    pub fn seconds(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds() as i64, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn counter(&self) -> u32 {
        u32::from_be_bytes([0, self.0[9], self.0[10], self.0[11]])
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = BsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId(\"{}\")", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(ObjectId::parse_str(&hex).unwrap(), id);
        assert_eq!(hex.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_invalid_hex() {
        assert!(matches!(
            ObjectId::parse_str("zz"),
            Err(BsonError::InvalidObjectId(_))
        ));
        assert!(matches!(
            ObjectId::parse_str("zzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(BsonError::InvalidObjectId(_))
        ));
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let id = ObjectId::parse_str("507F1F77BCF86CD799439011").unwrap();
        assert_eq!(id.to_hex(), "507f1f77bcf86cd799439011");
    }

    #[test]
    fn test_counter_increments() {
        let a = ObjectId::generate_at(1_000);
        let b = ObjectId::generate_at(1_000);
        assert_ne!(a, b);
        // Other tests may mint ids concurrently, so only require forward progress.
        let step = b.counter().wrapping_sub(a.counter()) & COUNTER_MASK;
        assert!(step >= 1 && step < 10_000);
        // Same process: machine and pid bytes agree.
        assert_eq!(a.bytes()[4..9], b.bytes()[4..9]);
    }

    #[test]
    fn test_timestamp() {
        let id = ObjectId::from_time(1_700_000_000);
        assert_eq!(id.seconds(), 1_700_000_000);
        assert_eq!(id.timestamp().timestamp(), 1_700_000_000);
        assert_eq!(id.bytes()[4..], [0u8; 8]);
    }

    #[test]
    fn test_generated_time_is_current() {
        let before = Utc::now().timestamp() as u32;
        let id = ObjectId::new();
        let after = Utc::now().timestamp() as u32;
        assert!(id.seconds() >= before && id.seconds() <= after);
    }
}
