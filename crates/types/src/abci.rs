//! Data exchanged with the application at each block hook.

use crate::codec::Codec;
use crate::merkle::merkle_root;
use crate::{
    Address, BlockHeight, ConsensusParamsDiff, Hash, Header, PublicKey, Transaction,
};
use sbor::prelude::*;

/// Response code meaning success. Anything else is a failure.
pub const CODE_OK: u32 = 0;

/// A validator that failed to sign the previous block.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct AbsentValidator {
    pub index: u32,
    pub address: Address,
    pub voting_power: i64,
}

/// A validator named by evidence in the block.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ByzantineValidator {
    pub kind: String,
    pub address: Address,
    pub height: BlockHeight,
    /// Time of the block carrying the evidence (ms).
    pub time: u64,
    /// Total voting power of the validator set at `height`.
    pub total_voting_power: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct RequestBeginBlock {
    pub hash: Hash,
    pub header: Header,
    pub absent_validators: Vec<AbsentValidator>,
    pub byzantine_validators: Vec<ByzantineValidator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ResponseBeginBlock {
    pub code: u32,
    pub log: String,
}

impl ResponseBeginBlock {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Key/value tag attached to a transaction result for indexing.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Tag {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ResponseDeliverTx {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub tags: Vec<Tag>,
    pub fee: u64,
}

impl ResponseDeliverTx {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Validator change requested by the application. Power 0 removes.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor, serde::Serialize, serde::Deserialize)]
pub struct ValidatorUpdate {
    pub public_key: PublicKey,
    pub power: i64,
    pub reward_address: Option<Address>,
    pub name: Option<String>,
}

impl ValidatorUpdate {
    pub fn new(public_key: PublicKey, power: i64) -> Self {
        Self {
            public_key,
            power,
            reward_address: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ResponseEndBlock {
    pub validator_updates: Vec<ValidatorUpdate>,
    pub consensus_param_updates: Option<ConsensusParamsDiff>,
    /// New application protocol version, if it changed.
    pub app_version: Option<u64>,
    /// Block reward the application minted at this height.
    pub reward: Option<u64>,
}

/// Opaque commit blob returned by the application.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ResponseCommit {
    pub data: Vec<u8>,
}

/// Reward paid to one address.
#[derive(
    Debug, Clone, PartialEq, Eq, BasicSbor, serde::Serialize, serde::Deserialize,
)]
pub struct RewardAllocation {
    pub address: Address,
    pub amount: u64,
}

/// Decoded form of [`ResponseCommit::data`].
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct CommitInfo {
    pub app_hash: Hash,
    /// Per-transaction result hashes. When non-empty, their merkle root
    /// replaces the locally computed results hash.
    pub results_hashes: Vec<Hash>,
    pub fee: u64,
    pub rewards: Vec<RewardAllocation>,
}

impl CommitInfo {
    pub fn results_hash(&self) -> Option<Hash> {
        if self.results_hashes.is_empty() {
            None
        } else {
            Some(merkle_root(&self.results_hashes))
        }
    }
}

/// Raw application responses for one height, persisted before the
/// application commits.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct AbciResponses {
    pub deliver_tx: Vec<ResponseDeliverTx>,
    pub end_block: ResponseEndBlock,
}

impl AbciResponses {
    pub fn new(num_txs: usize) -> Self {
        Self {
            deliver_tx: Vec::with_capacity(num_txs),
            end_block: ResponseEndBlock::default(),
        }
    }

    /// Merkle root over the deterministic part of each tx result
    /// (code and data).
    pub fn results_hash(&self, codec: &Codec) -> Hash {
        let leaves: Vec<Vec<u8>> = self
            .deliver_tx
            .iter()
            .map(|r| codec.encode_for_hash(&(r.code, r.data.clone())))
            .collect();
        merkle_root(&leaves)
    }

    pub fn failed_txs(&self) -> usize {
        self.deliver_tx.iter().filter(|r| !r.is_ok()).count()
    }
}

/// Indexed result of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TxResult {
    pub height: BlockHeight,
    pub index: u32,
    pub tx: Transaction,
    pub result: ResponseDeliverTx,
}
