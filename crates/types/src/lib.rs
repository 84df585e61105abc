//! Core types for the Meridian consensus core.
//!
//! This crate provides the foundational types used by every other crate in
//! the workspace:
//!
//! - **Primitives**: Hash, Address, keys and signatures, heights
//! - **Encoding**: the explicit [`Codec`] value and merkle hashing
//! - **Consensus types**: Validator, ValidatorSet, Vote, Commit, Block
//! - **Chain state**: ConsensusParams, State, GenesisDoc
//! - **Evidence**: the open [`Evidence`] trait and duplicate-vote evidence
//! - **Application data**: requests and responses exchanged at block hooks
//!
//! It does not depend on any other workspace crate.

mod bit_array;
mod codec;
mod crypto;
mod hash;
mod identifiers;
mod merkle;
mod signing;

// Consensus types
mod abci;
mod block;
mod commit;
mod evidence;
mod genesis;
mod params;
mod state;
mod validator;
mod vote;

pub use bit_array::BitArray;
pub use codec::{Codec, CodecError, DEFAULT_MAX_DECODE_LEN};
pub use crypto::{Address, KeyPair, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use identifiers::{BlockHeight, Round, VotePower};
pub use merkle::merkle_root;
pub use signing::{vote_message, DOMAIN_VOTE};

pub use abci::{
    AbciResponses, AbsentValidator, ByzantineValidator, CommitInfo, RequestBeginBlock,
    ResponseBeginBlock, ResponseCommit, ResponseDeliverTx, ResponseEndBlock, RewardAllocation,
    Tag, TxResult, ValidatorUpdate, CODE_OK,
};
pub use block::{
    Block, BlockId, BlockStructureError, Data, EvidenceData, Header, PartSetHeader, Transaction,
    Version, BLOCK_PROTOCOL,
};
pub use commit::{Commit, CommitError};
pub use evidence::{
    decode_evidence, DuplicateVoteEvidence, Evidence, EvidenceDecodeFn, EvidenceDecoders,
    EvidenceEnvelope, EvidenceError, DUPLICATE_VOTE_KIND,
};
pub use genesis::{GenesisDoc, GenesisError, GenesisValidator, MAX_CHAIN_ID_LEN};
pub use params::{
    BlockGossipParams, BlockSizeParams, ConsensusParams, ConsensusParamsDiff, EvidenceParams,
    ParamsError, TxSizeParams, MAX_BLOCK_SIZE_BYTES,
};
pub use state::State;
pub use validator::{Validator, ValidatorSet, ValidatorSetError};
pub use vote::{Vote, VoteError, VoteType};

#[cfg(any(test, feature = "test-utils"))]
pub use evidence::MockEvidence;

/// Deterministic fixtures shared by the workspace's tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    pub const TEST_CHAIN_ID: &str = "meridian-test";

    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed([seed; 32])
    }

    /// Validator set with one validator per entry of `powers`, and the
    /// signing keys reordered so that `keys[i]` belongs to set index `i`.
    pub fn test_validator_set(powers: &[i64]) -> (ValidatorSet, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..powers.len())
            .map(|i| test_keypair(i as u8 + 1))
            .collect();
        let validators = keys
            .iter()
            .zip(powers)
            .map(|(k, p)| Validator::new(k.public_key(), *p))
            .collect();
        let set = ValidatorSet::new(validators).expect("valid test validator set");

        let ordered = set
            .iter()
            .map(|v| {
                keys.iter()
                    .find(|k| k.address() == v.address)
                    .cloned()
                    .expect("key for every validator")
            })
            .collect();
        (set, ordered)
    }

    pub fn test_block_id(tag: &str) -> BlockId {
        BlockId::new(
            Hash::from_bytes(tag.as_bytes()),
            1,
            Hash::from_parts(&[b"parts/".as_slice(), tag.as_bytes()]),
        )
    }

    /// Vote signed for [`TEST_CHAIN_ID`] by `key` at set index `index`.
    pub fn signed_vote(
        key: &KeyPair,
        index: usize,
        vote_type: VoteType,
        height: BlockHeight,
        round: Round,
        block_id: BlockId,
    ) -> Vote {
        Vote::new(
            vote_type,
            height,
            round,
            block_id,
            1_000 + index as u64,
            key.address(),
            index as i32,
        )
        .signed(TEST_CHAIN_ID, key)
    }

    /// Commit for `block_id` with precommits from the set indices in
    /// `signers`; every other slot is empty.
    pub fn make_commit(
        keys: &[KeyPair],
        height: BlockHeight,
        round: Round,
        block_id: BlockId,
        signers: &[usize],
    ) -> Commit {
        let precommits = (0..keys.len())
            .map(|i| {
                signers.contains(&i).then(|| {
                    signed_vote(&keys[i], i, VoteType::Precommit, height, round, block_id)
                })
            })
            .collect();
        Commit::new(block_id, precommits)
    }
}
