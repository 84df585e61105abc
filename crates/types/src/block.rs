//! Blocks, headers and block identifiers.

use crate::codec::{Codec, CodecError};
use crate::evidence::{Evidence, EvidenceDecoders, EvidenceEnvelope};
use crate::merkle::merkle_root;
use crate::{Address, BlockHeight, Commit, Hash};
use sbor::prelude::*;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Header of the part set a block was split into for gossip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BasicSbor)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

impl PartSetHeader {
    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash.is_zero()
    }
}

/// Identifies a block: its header hash plus the part set header.
///
/// The zero id (`BlockId::default()`) stands for "no block" and is what nil
/// votes carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BasicSbor)]
pub struct BlockId {
    pub hash: Hash,
    pub parts: PartSetHeader,
}

impl BlockId {
    pub fn new(hash: Hash, parts_total: u32, parts_hash: Hash) -> Self {
        Self {
            hash,
            parts: PartSetHeader {
                total: parts_total,
                hash: parts_hash,
            },
        }
    }

    pub fn is_zero(&self) -> bool {
        self.hash.is_zero() && self.parts.is_zero()
    }

    /// Stable map key for tallying votes by block.
    pub fn key(&self) -> (Hash, u32, Hash) {
        (self.hash, self.parts.total, self.parts.hash)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.hash, self.parts.total, self.parts.hash)
    }
}

/// Protocol versions carried in every header.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor, serde::Serialize, serde::Deserialize,
)]
pub struct Version {
    pub block: u64,
    pub app: u64,
}

/// Block protocol version produced by this crate.
pub const BLOCK_PROTOCOL: u64 = 1;

/// An opaque application transaction.
#[derive(Clone, PartialEq, Eq, Hash, BasicSbor)]
#[sbor(transparent)]
pub struct Transaction(pub Vec<u8>);

impl Transaction {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key for the transaction result index.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.0)
    }
}

impl AsRef<[u8]> for Transaction {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tx({}, {} bytes)", self.hash(), self.0.len())
    }
}

/// Transactions of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Data {
    pub txs: Vec<Transaction>,
}

impl Data {
    /// Merkle root of the raw transaction bytes.
    pub fn hash(&self) -> Hash {
        merkle_root(&self.txs)
    }
}

/// Evidence included in a block.
#[derive(Clone, Default)]
pub struct EvidenceData {
    pub evidence: Vec<Arc<dyn Evidence>>,
}

impl EvidenceData {
    pub fn new(evidence: Vec<Arc<dyn Evidence>>) -> Self {
        Self { evidence }
    }

    /// Merkle root of the evidence hashes.
    pub fn hash(&self, codec: &Codec) -> Hash {
        let hashes: Vec<Hash> = self.evidence.iter().map(|ev| ev.hash(codec)).collect();
        merkle_root(&hashes)
    }

    pub fn len(&self) -> usize {
        self.evidence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Evidence>> {
        self.evidence.iter()
    }

    pub fn to_envelopes(&self, codec: &Codec) -> Result<Vec<EvidenceEnvelope>, CodecError> {
        self.evidence
            .iter()
            .map(|ev| EvidenceEnvelope::wrap(ev.as_ref(), codec))
            .collect()
    }

    pub fn from_envelopes(
        envelopes: &[EvidenceEnvelope],
        codec: &Codec,
        decoders: &EvidenceDecoders,
    ) -> Result<Self, CodecError> {
        let evidence = envelopes
            .iter()
            .map(|envelope| decoders.decode(codec, envelope))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { evidence })
    }
}

impl fmt::Debug for EvidenceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.evidence.iter().map(|ev| ev.to_string()))
            .finish()
    }
}

impl PartialEq for EvidenceData {
    fn eq(&self, other: &Self) -> bool {
        self.evidence.len() == other.evidence.len()
            && self
                .evidence
                .iter()
                .zip(&other.evidence)
                .all(|(a, b)| a.equal(b.as_ref()))
    }
}

impl Eq for EvidenceData {}

/// Block header. Its hash identifies the block.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Header {
    pub version: Version,
    pub chain_id: String,
    pub height: BlockHeight,
    /// Milliseconds since epoch.
    pub time: u64,
    pub num_txs: u64,
    pub total_txs: u64,

    // Previous block
    pub last_block_id: BlockId,
    pub last_commit_hash: Hash,

    // Contents
    pub data_hash: Hash,

    // Application and consensus state at the start of this height
    pub validators_hash: Hash,
    pub consensus_hash: Hash,
    pub app_hash: Hash,
    pub last_results_hash: Hash,

    pub evidence_hash: Hash,
    pub proposer_address: Address,
}

impl Header {
    pub fn hash(&self, codec: &Codec) -> Hash {
        codec.hash(self)
    }
}

/// Structural inconsistencies between a block and its own header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockStructureError {
    #[error("wrong num_txs: header says {header}, block has {actual}")]
    WrongNumTxs { header: u64, actual: u64 },

    #[error("wrong last_commit_hash: expected {expected}, got {actual}")]
    WrongLastCommitHash { expected: Hash, actual: Hash },

    #[error("wrong data_hash: expected {expected}, got {actual}")]
    WrongDataHash { expected: Hash, actual: Hash },

    #[error("wrong evidence_hash: expected {expected}, got {actual}")]
    WrongEvidenceHash { expected: Hash, actual: Hash },

    #[error("invalid last commit: {0}")]
    InvalidLastCommit(String),

    #[error("invalid evidence: {0}")]
    InvalidEvidence(String),
}

/// Encoded form of [`Block`]; evidence travels as tagged envelopes.
#[derive(BasicSbor)]
struct BlockRecord {
    header: Header,
    data: Data,
    evidence: Vec<EvidenceEnvelope>,
    last_commit: Commit,
}

/// A full block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub data: Data,
    pub evidence: EvidenceData,
    /// Precommits for the previous block. Empty at height 1.
    pub last_commit: Commit,
}

impl Block {
    /// Build a block, filling in the header's content-derived fields
    /// (`num_txs`, `data_hash`, `last_commit_hash`, `evidence_hash`).
    pub fn new(
        mut header: Header,
        txs: Vec<Transaction>,
        evidence: Vec<Arc<dyn Evidence>>,
        last_commit: Commit,
        codec: &Codec,
    ) -> Self {
        let data = Data { txs };
        let evidence = EvidenceData::new(evidence);
        header.num_txs = data.txs.len() as u64;
        header.data_hash = data.hash();
        header.last_commit_hash = last_commit.hash(codec);
        header.evidence_hash = evidence.hash(codec);
        Self {
            header,
            data,
            evidence,
            last_commit,
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    pub fn hash(&self, codec: &Codec) -> Hash {
        self.header.hash(codec)
    }

    pub fn encode(&self, codec: &Codec) -> Result<Vec<u8>, CodecError> {
        let record = BlockRecord {
            header: self.header.clone(),
            data: self.data.clone(),
            evidence: self.evidence.to_envelopes(codec)?,
            last_commit: self.last_commit.clone(),
        };
        codec.encode(&record)
    }

    /// Decode a block. Evidence of a kind missing from `decoders` fails the
    /// whole block.
    pub fn decode(
        bytes: &[u8],
        codec: &Codec,
        decoders: &EvidenceDecoders,
    ) -> Result<Self, CodecError> {
        let record: BlockRecord = codec.decode(bytes)?;
        Ok(Self {
            evidence: EvidenceData::from_envelopes(&record.evidence, codec, decoders)?,
            header: record.header,
            data: record.data,
            last_commit: record.last_commit,
        })
    }

    /// Check that the block is consistent with its own header.
    ///
    /// Contextual checks against chain state live in the executor.
    pub fn validate_basic(&self, codec: &Codec) -> Result<(), BlockStructureError> {
        let actual_txs = self.data.txs.len() as u64;
        if self.header.num_txs != actual_txs {
            return Err(BlockStructureError::WrongNumTxs {
                header: self.header.num_txs,
                actual: actual_txs,
            });
        }

        let commit_hash = self.last_commit.hash(codec);
        if self.header.last_commit_hash != commit_hash {
            return Err(BlockStructureError::WrongLastCommitHash {
                expected: commit_hash,
                actual: self.header.last_commit_hash,
            });
        }
        if self.header.height != BlockHeight(1) {
            self.last_commit
                .validate_basic()
                .map_err(|e| BlockStructureError::InvalidLastCommit(e.to_string()))?;
        }

        let data_hash = self.data.hash();
        if self.header.data_hash != data_hash {
            return Err(BlockStructureError::WrongDataHash {
                expected: data_hash,
                actual: self.header.data_hash,
            });
        }

        let evidence_hash = self.evidence.hash(codec);
        if self.header.evidence_hash != evidence_hash {
            return Err(BlockStructureError::WrongEvidenceHash {
                expected: evidence_hash,
                actual: self.header.evidence_hash,
            });
        }
        for ev in self.evidence.iter() {
            ev.validate_basic()
                .map_err(|e| BlockStructureError::InvalidEvidence(e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::DUPLICATE_VOTE_KIND;
    use crate::{DuplicateVoteEvidence, KeyPair, Vote, VoteType};

    fn header(height: u64) -> Header {
        Header {
            chain_id: "test-chain".to_string(),
            height: BlockHeight(height),
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_block_id() {
        assert!(BlockId::default().is_zero());
        assert!(!BlockId::new(Hash::from_bytes(b"x"), 1, Hash::ZERO).is_zero());
    }

    #[test]
    fn test_new_block_validates() {
        let codec = Codec::new();
        let block = Block::new(
            header(1),
            vec![Transaction::new(b"a".to_vec()), Transaction::new(b"b".to_vec())],
            vec![],
            Commit::empty(),
            &codec,
        );
        assert_eq!(block.header.num_txs, 2);
        assert!(block.validate_basic(&codec).is_ok());
    }

    #[test]
    fn test_tampered_txs_rejected() {
        let codec = Codec::new();
        let mut block = Block::new(
            header(1),
            vec![Transaction::new(b"a".to_vec())],
            vec![],
            Commit::empty(),
            &codec,
        );
        block.data.txs[0] = Transaction::new(b"evil".to_vec());
        assert!(matches!(
            block.validate_basic(&codec),
            Err(BlockStructureError::WrongDataHash { .. })
        ));

        block.data.txs.push(Transaction::new(b"c".to_vec()));
        assert!(matches!(
            block.validate_basic(&codec),
            Err(BlockStructureError::WrongNumTxs { header: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_header_hash_covers_every_field() {
        let codec = Codec::new();
        let a = header(5);
        let mut b = a.clone();
        b.proposer_address = Address::from_raw([1; 20]);
        assert_ne!(a.hash(&codec), b.hash(&codec));
    }

    #[test]
    fn test_block_with_evidence_roundtrips() {
        let codec = Codec::new();
        let key = KeyPair::from_seed([4u8; 32]);
        let vote = |tag: &[u8]| {
            Vote::new(
                VoteType::Prevote,
                BlockHeight(2),
                0,
                BlockId::new(Hash::from_bytes(tag), 1, Hash::from_bytes(b"parts")),
                0,
                key.address(),
                7,
            )
            .signed("test-chain", &key)
        };
        let evidence: Arc<dyn Evidence> = Arc::new(DuplicateVoteEvidence::new(
            key.public_key(),
            vote(b"a"),
            vote(b"b"),
        ));
        let block = Block::new(
            header(3),
            vec![Transaction::new(b"tx".to_vec())],
            vec![evidence],
            Commit::empty(),
            &codec,
        );

        let bytes = block.encode(&codec).unwrap();
        let decoded = Block::decode(&bytes, &codec, &EvidenceDecoders::default()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(&codec), block.hash(&codec));
        assert!(decoded.validate_basic(&codec).is_ok());

        assert!(matches!(
            Block::decode(&bytes, &codec, &EvidenceDecoders::empty()),
            Err(CodecError::UnknownEvidenceKind(kind)) if kind == DUPLICATE_VOTE_KIND
        ));
    }
}
