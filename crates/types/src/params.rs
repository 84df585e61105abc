//! Consensus parameters and their application-driven updates.

use crate::codec::Codec;
use crate::Hash;
use sbor::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard upper bound on `block_size.max_bytes`.
pub const MAX_BLOCK_SIZE_BYTES: u64 = 104_857_600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("block_size.max_bytes must be in 1..={max}, got {got}")]
    BlockMaxBytes { got: u64, max: u64 },

    #[error("{field} must be -1 (unlimited) or non-negative, got {got}")]
    MaxGas { field: &'static str, got: i64 },

    #[error("tx_size.max_bytes must be positive")]
    TxMaxBytes,

    #[error("block_gossip.block_part_size_bytes must be positive")]
    BlockPartSize,

    #[error("evidence.max_age must be positive")]
    EvidenceMaxAge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct BlockSizeParams {
    pub max_bytes: u64,
    /// -1 means unlimited.
    pub max_gas: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct TxSizeParams {
    pub max_bytes: u64,
    /// -1 means unlimited.
    pub max_gas: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct BlockGossipParams {
    pub block_part_size_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct EvidenceParams {
    /// Maximum age of evidence, in blocks.
    pub max_age: u64,
}

/// Limits that every replica must agree on. Changed only through
/// [`ConsensusParams::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block_size: BlockSizeParams,
    pub tx_size: TxSizeParams,
    pub block_gossip: BlockGossipParams,
    pub evidence: EvidenceParams,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            block_size: BlockSizeParams {
                max_bytes: 22_020_096,
                max_gas: -1,
            },
            tx_size: TxSizeParams {
                max_bytes: 10_240,
                max_gas: -1,
            },
            block_gossip: BlockGossipParams {
                block_part_size_bytes: 65_536,
            },
            evidence: EvidenceParams { max_age: 100_000 },
        }
    }
}

/// Partial update returned by the application at end of block. Absent
/// sections leave the current value untouched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor, Serialize, Deserialize,
)]
pub struct ConsensusParamsDiff {
    pub block_size: Option<BlockSizeParams>,
    pub tx_size: Option<TxSizeParams>,
    pub block_gossip: Option<BlockGossipParams>,
    pub evidence: Option<EvidenceParams>,
}

impl ConsensusParamsDiff {
    pub fn is_empty(&self) -> bool {
        self.block_size.is_none()
            && self.tx_size.is_none()
            && self.block_gossip.is_none()
            && self.evidence.is_none()
    }
}

impl ConsensusParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.block_size.max_bytes == 0 || self.block_size.max_bytes > MAX_BLOCK_SIZE_BYTES {
            return Err(ParamsError::BlockMaxBytes {
                got: self.block_size.max_bytes,
                max: MAX_BLOCK_SIZE_BYTES,
            });
        }
        if self.block_size.max_gas < -1 {
            return Err(ParamsError::MaxGas {
                field: "block_size.max_gas",
                got: self.block_size.max_gas,
            });
        }
        if self.tx_size.max_bytes == 0 {
            return Err(ParamsError::TxMaxBytes);
        }
        if self.tx_size.max_gas < -1 {
            return Err(ParamsError::MaxGas {
                field: "tx_size.max_gas",
                got: self.tx_size.max_gas,
            });
        }
        if self.block_gossip.block_part_size_bytes == 0 {
            return Err(ParamsError::BlockPartSize);
        }
        if self.evidence.max_age == 0 {
            return Err(ParamsError::EvidenceMaxAge);
        }
        Ok(())
    }

    pub fn hash(&self, codec: &Codec) -> Hash {
        codec.hash(self)
    }

    /// New params with `diff` applied. `self` is unchanged. The result is not
    /// validated; callers validate before adopting it.
    pub fn update(&self, diff: &ConsensusParamsDiff) -> ConsensusParams {
        let mut next = *self;
        if let Some(block_size) = diff.block_size {
            next.block_size = block_size;
        }
        if let Some(tx_size) = diff.tx_size {
            next.tx_size = tx_size;
        }
        if let Some(block_gossip) = diff.block_gossip {
            next.block_gossip = block_gossip;
        }
        if let Some(evidence) = diff.evidence {
            next.evidence = evidence;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConsensusParams::default().validate().is_ok());
    }

    #[test]
    fn test_update_only_touches_present_sections() {
        let params = ConsensusParams::default();
        let diff = ConsensusParamsDiff {
            evidence: Some(EvidenceParams { max_age: 7 }),
            ..Default::default()
        };
        let next = params.update(&diff);

        assert_eq!(next.evidence.max_age, 7);
        assert_eq!(next.block_size, params.block_size);
        assert_eq!(next.tx_size, params.tx_size);
        // Input untouched
        assert_eq!(params.evidence.max_age, 100_000);
    }

    #[test]
    fn test_empty_diff_is_identity() {
        let params = ConsensusParams::default();
        assert!(ConsensusParamsDiff::default().is_empty());
        assert_eq!(params.update(&ConsensusParamsDiff::default()), params);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut params = ConsensusParams::default();
        params.block_size.max_bytes = MAX_BLOCK_SIZE_BYTES + 1;
        assert!(matches!(
            params.validate(),
            Err(ParamsError::BlockMaxBytes { .. })
        ));

        let mut params = ConsensusParams::default();
        params.block_size.max_gas = -2;
        assert!(matches!(params.validate(), Err(ParamsError::MaxGas { .. })));

        let mut params = ConsensusParams::default();
        params.evidence.max_age = 0;
        assert_eq!(params.validate(), Err(ParamsError::EvidenceMaxAge));
    }

    #[test]
    fn test_hash_changes_with_params() {
        let codec = Codec::new();
        let a = ConsensusParams::default();
        let mut b = a;
        b.block_gossip.block_part_size_bytes = 1024;
        assert_ne!(a.hash(&codec), b.hash(&codec));
    }
}
