//! Explicit serializer value.
//!
//! Every piece of code that hashes or persists consensus data takes a
//! `&Codec`. Field order is fixed by the type definitions (SBOR encodes
//! struct fields positionally), so no runtime type registration exists.

use crate::hash::Hash;
use sbor::{BasicDecode, BasicEncode};
use thiserror::Error;

/// Default decode limit. Persisted records and commit blobs are far smaller.
pub const DEFAULT_MAX_DECODE_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("payload of {len} bytes exceeds decode limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("no decoder for evidence kind {0:?}")]
    UnknownEvidenceKind(String),
}

/// SBOR basic codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    max_decode_len: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    pub const fn new() -> Self {
        Self {
            max_decode_len: DEFAULT_MAX_DECODE_LEN,
        }
    }

    pub const fn with_max_decode_len(max_decode_len: usize) -> Self {
        Self { max_decode_len }
    }

    pub fn max_decode_len(&self) -> usize {
        self.max_decode_len
    }

    pub fn encode<T: BasicEncode + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        sbor::basic_encode(value).map_err(|e| CodecError::Encode(format!("{:?}", e)))
    }

    pub fn decode<T: BasicDecode>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        if bytes.len() > self.max_decode_len {
            return Err(CodecError::TooLarge {
                len: bytes.len(),
                max: self.max_decode_len,
            });
        }
        sbor::basic_decode(bytes).map_err(|e| CodecError::Decode(format!("{:?}", e)))
    }

    /// Encode a consensus value for hashing.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails. Consensus types are plain data well under the
    /// SBOR depth limit, so a failure here is a bug rather than bad input.
    pub fn encode_for_hash<T: BasicEncode + ?Sized>(&self, value: &T) -> Vec<u8> {
        self.encode(value)
            .expect("consensus value encoding must succeed - this is a bug if it fails")
    }

    /// blake3 of the value's encoding.
    pub fn hash<T: BasicEncode + ?Sized>(&self, value: &T) -> Hash {
        Hash::from_bytes(&self.encode_for_hash(value))
    }
}
