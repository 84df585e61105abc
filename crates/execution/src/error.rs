use crate::collaborators::{ApplicationError, MempoolError};
use meridian_storage::StoreError;
use meridian_types::{
    Address, BlockHeight, BlockId, BlockStructureError, CodecError, EvidenceError, Hash,
    ParamsError, ValidatorSetError, Version,
};
use thiserror::Error;

/// A block that does not fit on top of the current state.
#[derive(Debug, Error)]
pub enum BlockValidationError {
    /// The block is inconsistent with its own header.
    #[error(transparent)]
    Structure(#[from] BlockStructureError),

    #[error("wrong block version: expected {expected:?}, got {actual:?}")]
    WrongVersion { expected: Version, actual: Version },

    #[error("wrong chain id: expected {expected}, got {actual}")]
    WrongChainId { expected: String, actual: String },

    #[error("wrong height: expected {expected}, got {actual}")]
    WrongHeight {
        expected: BlockHeight,
        actual: BlockHeight,
    },

    #[error("wrong last block id: expected {expected}, got {actual}")]
    WrongLastBlockId { expected: BlockId, actual: BlockId },

    #[error("wrong total txs: expected {expected}, got {actual}")]
    WrongTotalTxs { expected: u64, actual: u64 },

    /// A header hash that must match the state does not.
    #[error("wrong {field}: expected {expected}, got {actual}")]
    WrongStateHash {
        field: &'static str,
        expected: Hash,
        actual: Hash,
    },

    #[error("proposer {0} is not in the validator set")]
    UnknownProposer(Address),

    #[error("block at height 1 must not carry precommits")]
    GenesisCommitNotEmpty,

    #[error("last commit has {actual} precommits, last validator set has {expected}")]
    WrongLastCommitSize { expected: usize, actual: usize },

    #[error("invalid last commit: {0}")]
    LastCommit(#[source] ValidatorSetError),

    #[error("invalid evidence #{index}: {source}")]
    Evidence {
        index: usize,
        #[source]
        source: EvidenceVerificationError,
    },
}

/// Why a piece of evidence cannot be included.
#[derive(Debug, Error)]
pub enum EvidenceVerificationError {
    #[error("evidence from height {height} is older than max age {max_age} at height {current}")]
    TooOld {
        height: BlockHeight,
        current: BlockHeight,
        max_age: u64,
    },

    #[error("address {address} was not a validator at height {height}")]
    NotValidator {
        address: Address,
        height: BlockHeight,
    },

    #[error("cannot load validators: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Invalid(#[from] EvidenceError),
}

/// Errors that halt processing of a height.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] BlockValidationError),

    #[error("application error: {0}")]
    Application(#[from] ApplicationError),

    #[error("application rejected begin_block (code {code}): {log}")]
    BeginBlockRejected { code: u32, log: String },

    #[error("cannot decode application commit response: {0}")]
    InvalidCommitResponse(#[source] CodecError),

    #[error("invalid validator update: {0}")]
    ValidatorUpdate(String),

    #[error("invalid consensus params update: {0}")]
    InvalidConsensusParams(#[from] ParamsError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("mempool error: {0}")]
    Mempool(#[from] MempoolError),
}

impl ExecutorError {
    /// True when the block itself was at fault rather than the node.
    pub fn is_invalid_block(&self) -> bool {
        matches!(self, ExecutorError::InvalidBlock(_))
    }
}
