//! Chain state after the last committed block.

use crate::block::BLOCK_PROTOCOL;
use crate::codec::Codec;
use crate::evidence::Evidence;
use crate::{
    Address, Block, BlockHeight, BlockId, Commit, ConsensusParams, GenesisDoc, GenesisError,
    Hash, Header, RewardAllocation, Transaction, ValidatorSet, Version,
};
use sbor::prelude::*;
use std::sync::Arc;

/// Snapshot of the chain at `last_block_height`.
///
/// A `State` is a value: the executor derives the next one from a borrowed
/// previous one and never mutates the input. Clones are fully independent.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct State {
    pub version: Version,
    pub chain_id: String,

    pub last_block_height: BlockHeight,
    pub last_block_total_tx: u64,
    pub last_block_id: BlockId,
    /// Milliseconds since epoch.
    pub last_block_time: u64,

    /// Validators for the next block (`last_block_height + 1`).
    pub validators: ValidatorSet,
    /// Validators that signed `last_block_id`.
    pub last_validators: ValidatorSet,
    /// Height at which `validators` first took effect.
    pub last_height_validators_changed: BlockHeight,

    pub consensus_params: ConsensusParams,
    pub last_height_consensus_params_changed: BlockHeight,

    /// Merkle root of the last block's transaction results.
    pub last_results_hash: Hash,
    /// Application state root after the last block.
    pub app_hash: Hash,

    /// Fee collected by the application in the last block.
    pub last_fee: u64,
    /// Rewards the application allocated in the last block.
    pub last_rewards: Vec<RewardAllocation>,
}

impl State {
    /// Initial state described by a genesis document.
    pub fn from_genesis(genesis: &GenesisDoc) -> Result<State, GenesisError> {
        let mut genesis = genesis.clone();
        genesis.validate_and_complete()?;
        let validators = genesis.validator_set()?;
        let consensus_params = genesis.consensus_params.unwrap_or_default();

        Ok(State {
            version: Version {
                block: BLOCK_PROTOCOL,
                app: 0,
            },
            chain_id: genesis.chain_id,
            last_block_height: BlockHeight::GENESIS,
            last_block_total_tx: 0,
            last_block_id: BlockId::default(),
            last_block_time: genesis.genesis_time,
            validators,
            last_validators: ValidatorSet::empty(),
            last_height_validators_changed: BlockHeight(1),
            consensus_params,
            last_height_consensus_params_changed: BlockHeight(1),
            last_results_hash: Hash::ZERO,
            app_hash: genesis.app_hash,
            last_fee: 0,
            last_rewards: Vec::new(),
        })
    }

    /// True for the placeholder returned when nothing is persisted.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Canonical encoding, used for persistence and equality across replicas.
    pub fn bytes(&self, codec: &Codec) -> Vec<u8> {
        codec.encode_for_hash(self)
    }

    /// Build the block for `height` proposed on top of this state.
    #[allow(clippy::too_many_arguments)]
    pub fn make_block(
        &self,
        height: BlockHeight,
        time: u64,
        txs: Vec<Transaction>,
        last_commit: Commit,
        evidence: Vec<Arc<dyn Evidence>>,
        proposer_address: Address,
        codec: &Codec,
    ) -> Block {
        let header = Header {
            version: self.version,
            chain_id: self.chain_id.clone(),
            height,
            time,
            num_txs: 0,
            total_txs: self.last_block_total_tx.saturating_add(txs.len() as u64),
            last_block_id: self.last_block_id,
            validators_hash: self.validators.hash(codec),
            consensus_hash: self.consensus_params.hash(codec),
            app_hash: self.app_hash,
            last_results_hash: self.last_results_hash,
            proposer_address,
            ..Default::default()
        };
        Block::new(header, txs, evidence, last_commit, codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GenesisValidator, KeyPair};

    fn genesis() -> GenesisDoc {
        GenesisDoc {
            genesis_time: 42,
            chain_id: "state-test".to_string(),
            consensus_params: None,
            validators: (1..=3)
                .map(|i| GenesisValidator {
                    public_key: KeyPair::from_seed([i; 32]).public_key(),
                    power: 10,
                    name: String::new(),
                    reward_address: None,
                })
                .collect(),
            app_hash: Hash::from_bytes(b"app"),
        }
    }

    #[test]
    fn test_from_genesis() {
        let state = State::from_genesis(&genesis()).unwrap();
        assert!(!state.is_empty());
        assert_eq!(state.last_block_height, BlockHeight::GENESIS);
        assert_eq!(state.last_block_time, 42);
        assert_eq!(state.validators.size(), 3);
        assert!(state.last_validators.is_empty());
        assert_eq!(state.last_height_validators_changed, BlockHeight(1));
        assert_eq!(state.app_hash, Hash::from_bytes(b"app"));
    }

    #[test]
    fn test_bytes_roundtrip_through_codec() {
        let codec = Codec::new();
        let state = State::from_genesis(&genesis()).unwrap();
        let decoded: State = codec.decode(&state.bytes(&codec)).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_make_block_fills_header_from_state() {
        let codec = Codec::new();
        let state = State::from_genesis(&genesis()).unwrap();
        let proposer = state.validators.get_proposer().unwrap().address;
        let block = state.make_block(
            BlockHeight(1),
            100,
            vec![Transaction::new(b"tx".to_vec())],
            Commit::empty(),
            vec![],
            proposer,
            &codec,
        );

        assert_eq!(block.header.chain_id, "state-test");
        assert_eq!(block.header.total_txs, 1);
        assert_eq!(block.header.validators_hash, state.validators.hash(&codec));
        assert_eq!(block.header.app_hash, state.app_hash);
        assert!(block.validate_basic(&codec).is_ok());
    }
}
