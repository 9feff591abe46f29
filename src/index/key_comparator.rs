use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::common::{BasaltError, Result};

/// Total order over fixed-size serialized keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Human-readable form of a key, used in tree dumps.
    fn format(&self, key: &[u8]) -> String {
        key.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Orders keys by a little-endian `i32` stored in their first four bytes.
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if a.len() < 4 || b.len() < 4 {
            return a.len().cmp(&b.len());
        }

        let a_val = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
        let b_val = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);

        a_val.cmp(&b_val)
    }

    fn format(&self, key: &[u8]) -> String {
        if key.len() < 4 {
            return String::from("?");
        }
        i32::from_le_bytes([key[0], key[1], key[2], key[3]]).to_string()
    }
}

/// Orders keys lexicographically by their raw bytes.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Key layout for one index: the fixed key width plus the order over keys.
#[derive(Clone)]
pub struct KeyManager {
    key_size: usize,
    comparator: Arc<dyn KeyComparator>,
}

impl KeyManager {
    pub fn new(key_size: usize, comparator: Arc<dyn KeyComparator>) -> Self {
        assert!(key_size > 0, "key size must be positive");
        Self {
            key_size,
            comparator,
        }
    }

    /// Keys holding a single `i32`, padded to `key_size` bytes.
    pub fn integer(key_size: usize) -> Self {
        assert!(key_size >= 4, "integer keys need at least 4 bytes");
        Self::new(key_size, Arc::new(IntegerComparator))
    }

    /// Keys compared byte by byte.
    pub fn bytewise(key_size: usize) -> Self {
        Self::new(key_size, Arc::new(BytewiseComparator))
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.comparator.compare(a, b)
    }

    pub fn format(&self, key: &[u8]) -> String {
        self.comparator.format(key)
    }

    /// Serializes an integer key.
    pub fn encode_i32(&self, value: i32) -> Vec<u8> {
        let mut key = vec![0u8; self.key_size];
        key[..4].copy_from_slice(&value.to_le_bytes());
        key
    }

    /// Pads `bytes` with zeros to the key width.
    pub fn encode_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() > self.key_size {
            return Err(BasaltError::KeyLengthMismatch {
                expected: self.key_size,
                actual: bytes.len(),
            });
        }
        let mut key = vec![0u8; self.key_size];
        key[..bytes.len()].copy_from_slice(bytes);
        Ok(key)
    }

    /// Reads back an integer key written by `encode_i32`.
    pub fn decode_i32(&self, key: &[u8]) -> i32 {
        i32::from_le_bytes([key[0], key[1], key[2], key[3]])
    }

    pub(crate) fn check(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(BasaltError::KeyLengthMismatch {
                expected: self.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("key_size", &self.key_size)
            .finish()
    }
}
