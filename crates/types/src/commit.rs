//! Commit: the precommits that finalized a block.

use crate::codec::Codec;
use crate::merkle::merkle_root;
use crate::{BitArray, BlockHeight, BlockId, Hash, Round, Vote, VoteType};
use sbor::prelude::*;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("commit cannot be for a nil block")]
    NilBlock,

    #[error("commit has no precommits")]
    NoPrecommits,

    #[error("slot {index} holds a {actual}, expected a precommit")]
    NotPrecommit { index: usize, actual: VoteType },

    #[error("slot {index} has height {actual}, commit height is {expected}")]
    MixedHeights {
        index: usize,
        expected: BlockHeight,
        actual: BlockHeight,
    },

    #[error("slot {index} has round {actual}, commit round is {expected}")]
    MixedRounds {
        index: usize,
        expected: Round,
        actual: Round,
    },
}

/// A block id plus one precommit slot per validator (None where the
/// validator's precommit for this block was not collected).
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Commit {
    pub block_id: BlockId,
    pub precommits: Vec<Option<Vote>>,
}

impl Commit {
    pub fn new(block_id: BlockId, precommits: Vec<Option<Vote>>) -> Self {
        Self {
            block_id,
            precommits,
        }
    }

    /// The commit carried by the first block of a chain.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn first_precommit(&self) -> Option<&Vote> {
        self.precommits.iter().flatten().next()
    }

    /// Height of the precommits, or 0 for an empty commit.
    pub fn height(&self) -> BlockHeight {
        self.first_precommit()
            .map(|v| v.height)
            .unwrap_or(BlockHeight::GENESIS)
    }

    /// Round of the precommits, or 0 for an empty commit.
    pub fn round(&self) -> Round {
        self.first_precommit().map(|v| v.round).unwrap_or(0)
    }

    /// Number of slots (the width of the signing validator set).
    pub fn size(&self) -> usize {
        self.precommits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precommits.is_empty()
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Vote> {
        self.precommits.get(index).and_then(Option::as_ref)
    }

    pub fn bit_array(&self) -> BitArray {
        let mut bits = BitArray::new(self.precommits.len());
        for (i, slot) in self.precommits.iter().enumerate() {
            if slot.is_some() {
                bits.set(i, true);
            }
        }
        bits
    }

    /// Context-free consistency: a non-nil block and precommits that all share
    /// one height and round. Signatures are checked by the validator set.
    pub fn validate_basic(&self) -> Result<(), CommitError> {
        if self.block_id.is_zero() {
            return Err(CommitError::NilBlock);
        }
        let Some(first) = self.first_precommit() else {
            return Err(CommitError::NoPrecommits);
        };
        let (height, round) = (first.height, first.round);

        for (index, slot) in self.precommits.iter().enumerate() {
            let Some(vote) = slot else {
                continue;
            };
            if vote.vote_type != VoteType::Precommit {
                return Err(CommitError::NotPrecommit {
                    index,
                    actual: vote.vote_type,
                });
            }
            if vote.height != height {
                return Err(CommitError::MixedHeights {
                    index,
                    expected: height,
                    actual: vote.height,
                });
            }
            if vote.round != round {
                return Err(CommitError::MixedRounds {
                    index,
                    expected: round,
                    actual: vote.round,
                });
            }
        }
        Ok(())
    }

    /// Merkle root over the encoded slots, empty slots included.
    pub fn hash(&self, codec: &Codec) -> Hash {
        let leaves: Vec<Vec<u8>> = self
            .precommits
            .iter()
            .map(|slot| codec.encode_for_hash(slot))
            .collect();
        merkle_root(&leaves)
    }
}
