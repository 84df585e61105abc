//! Consensus votes.

use crate::signing::vote_message;
use crate::{Address, BlockHeight, BlockId, KeyPair, PublicKey, Round, Signature};
use sbor::prelude::*;
use std::fmt;
use thiserror::Error;

/// Vote step. Closed set: a vote is either a prevote or a precommit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
pub enum VoteType {
    Prevote,
    Precommit,
}

impl VoteType {
    /// Stable byte tag used in sign bytes.
    pub fn as_byte(self) -> u8 {
        match self {
            VoteType::Prevote => 0x01,
            VoteType::Precommit => 0x02,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteType::Prevote => write!(f, "Prevote"),
            VoteType::Precommit => write!(f, "Precommit"),
        }
    }
}

/// Errors from verifying a single vote.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("vote address {vote} does not match public key address {key}")]
    InvalidValidatorAddress { vote: Address, key: Address },

    #[error("invalid vote signature")]
    InvalidSignature,
}

/// A signed prevote or precommit from one validator.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: BlockHeight,
    pub round: Round,
    /// Milliseconds since epoch, supplied by the signer.
    pub timestamp: u64,
    /// Block voted for; the zero id is a nil vote.
    pub block_id: BlockId,
    pub validator_address: Address,
    /// Position of the validator in the address-sorted set. Signed so that
    /// malformed negative indices from the wire can be represented and rejected.
    pub validator_index: i32,
    pub signature: Signature,
}

impl Vote {
    /// Create an unsigned vote.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vote_type: VoteType,
        height: BlockHeight,
        round: Round,
        block_id: BlockId,
        timestamp: u64,
        validator_address: Address,
        validator_index: i32,
    ) -> Self {
        Self {
            vote_type,
            height,
            round,
            timestamp,
            block_id,
            validator_address,
            validator_index,
            signature: Signature::zero(),
        }
    }

    /// Bytes the validator signs for this vote on `chain_id`.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        vote_message(
            chain_id,
            self.vote_type,
            self.height,
            self.round,
            &self.block_id,
            self.timestamp,
        )
    }

    /// Sign with `key`, replacing any existing signature.
    pub fn signed(mut self, chain_id: &str, key: &KeyPair) -> Self {
        self.signature = key.sign(&self.sign_bytes(chain_id));
        self
    }

    /// Check that `public_key` owns this vote's address and signed it.
    pub fn verify(&self, chain_id: &str, public_key: &PublicKey) -> Result<(), VoteError> {
        let key_address = public_key.address();
        if key_address != self.validator_address {
            return Err(VoteError::InvalidValidatorAddress {
                vote: self.validator_address,
                key: key_address,
            });
        }
        if !public_key.verify(&self.sign_bytes(chain_id), &self.signature) {
            return Err(VoteError::InvalidSignature);
        }
        Ok(())
    }

    /// True if this is a vote for nil.
    pub fn is_nil(&self) -> bool {
        self.block_id.is_zero()
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vote{{{}:{} {}/{}/{} {} {:?} @ {}}}",
            self.validator_index,
            &self.validator_address.to_hex()[..12],
            self.height,
            self.round,
            self.vote_type,
            self.block_id,
            self.signature,
            self.timestamp
        )
    }
}
