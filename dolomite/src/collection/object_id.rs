use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use once_cell::sync::Lazy;
use rand::RngCore;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// 5 random bytes generated once per process, as the spec for the id format
// requires: 4-byte timestamp, 5-byte process random, 3-byte counter.
static PROCESS_RANDOM: Lazy<[u8; 5]> = Lazy::new(|| {
    let mut bytes = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
});

static COUNTER: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(rand::thread_rng().next_u32()));

/// A unique 12-byte document identifier.
///
/// Generated ids are composed of a big-endian second-precision timestamp,
/// a per-process random value, and a monotonically increasing counter, so
/// ids generated within one process are unique and roughly time-ordered.
///
/// # Examples
///
/// ```rust,ignore
/// use dolomite::collection::ObjectId;
///
/// let id = ObjectId::new();
/// let parsed = ObjectId::parse_str(&id.to_hex()).unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize, serde::Serialize)]
pub struct ObjectId {
    bytes: [u8; 12],
}

impl ObjectId {
    /// Generates a new unique id.
    pub fn new() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_else(|err| {
                log::warn!("System clock is before the epoch: {}. Using 0.", err);
                0
            });
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_RANDOM);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        ObjectId { bytes }
    }

    /// Creates an id from raw bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId { bytes }
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.bytes
    }

    /// Returns the embedded timestamp in seconds since the epoch.
    pub fn timestamp(&self) -> u32 {
        let mut seconds = [0u8; 4];
        seconds.copy_from_slice(&self.bytes[..4]);
        u32::from_be_bytes(seconds)
    }

    /// Returns the 24-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(24);
        for byte in &self.bytes {
            hex.push_str(&format!("{:02x}", byte));
        }
        hex
    }

    /// Parses a 24-character hex string.
    pub fn parse_str(input: &str) -> DolomiteResult<Self> {
        if input.len() != 24 {
            log::error!("Invalid ObjectId string '{}'", input);
            return Err(DolomiteError::new(
                &format!(
                    "Invalid ObjectId string '{}': length must be 24 characters",
                    input
                ),
                ErrorKind::BadValue,
            ));
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in input.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| {
                DolomiteError::new(
                    &format!("Invalid ObjectId string '{}'", input),
                    ErrorKind::BadValue,
                )
            })?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| {
                DolomiteError::new(
                    &format!("Invalid ObjectId string '{}'", input),
                    ErrorKind::BadValue,
                )
            })?;
        }
        Ok(ObjectId { bytes })
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::new()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId(\"{}\")", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_round_trip() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        let parsed = ObjectId::parse_str(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_invalid_input() {
        assert!(ObjectId::parse_str("abc").is_err());
        assert!(ObjectId::parse_str("zzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_timestamp_is_monotonic() {
        let id = ObjectId::new();
        assert!(id.timestamp() > 0);
    }

    #[test]
    fn test_ids_sort_by_generation_time() {
        let first = ObjectId::new();
        let second = ObjectId::new();
        // same timestamp second, ordering falls to the counter bytes
        assert!(first < second);
    }
}
