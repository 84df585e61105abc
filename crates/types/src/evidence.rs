//! Evidence of validator misbehavior.
//!
//! Evidence kinds are an open set: each kind implements [`Evidence`] and
//! blocks carry them as trait objects. The executor checks the offender's
//! membership and the evidence age; the evidence itself checks only what it
//! can prove from its own contents plus the offender's public key.

use crate::codec::{Codec, CodecError};
use crate::{Address, BlockHeight, Hash, PublicKey, Vote, VoteError, VoteType};
use sbor::prelude::*;
use sbor::BasicDecode;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Kind tag of [`DuplicateVoteEvidence`].
pub const DUPLICATE_VOTE_KIND: &str = "duplicate_vote";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    #[error(
        "votes are not for the same slot: {height_a}/{round_a}/{type_a} vs {height_b}/{round_b}/{type_b}"
    )]
    DifferentSlot {
        height_a: BlockHeight,
        round_a: u32,
        type_a: VoteType,
        height_b: BlockHeight,
        round_b: u32,
        type_b: VoteType,
    },

    #[error("votes are from different validator addresses: {a} vs {b}")]
    AddressMismatch { a: Address, b: Address },

    #[error("votes are from different validator indices: {a} vs {b}")]
    IndexMismatch { a: i32, b: i32 },

    #[error("votes are for the same block id, no conflict")]
    SameBlockId,

    #[error("public key address {key} does not match evidence address {evidence}")]
    PublicKeyMismatch { key: Address, evidence: Address },

    #[error("{which} failed verification: {source}")]
    InvalidVote {
        which: &'static str,
        #[source]
        source: VoteError,
    },

    #[error("malformed evidence: {0}")]
    Malformed(String),
}

/// Proof that a validator misbehaved.
pub trait Evidence: Send + Sync + fmt::Debug + fmt::Display {
    /// Height the misbehavior happened at.
    fn height(&self) -> BlockHeight;

    /// Address of the offending validator.
    fn address(&self) -> Address;

    fn hash(&self, codec: &Codec) -> Hash;

    /// Check the evidence against the offender's public key.
    fn verify(&self, chain_id: &str, public_key: &PublicKey) -> Result<(), EvidenceError>;

    fn equal(&self, other: &dyn Evidence) -> bool;

    /// Context-free sanity checks.
    fn validate_basic(&self) -> Result<(), EvidenceError>;

    /// Short name of the evidence kind. Tags the wire envelope, so it must be
    /// unique per type and stable across releases.
    fn kind(&self) -> &'static str;

    /// Encoding of the evidence body, without the kind tag.
    fn encode_payload(&self, codec: &Codec) -> Result<Vec<u8>, CodecError>;

    fn as_any(&self) -> &dyn Any;
}

// ═══════════════════════════════════════════════════════════════════════════
// Wire encoding
// ═══════════════════════════════════════════════════════════════════════════

/// One piece of evidence on the wire: its kind tag plus the kind's own
/// encoding.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct EvidenceEnvelope {
    pub kind: String,
    pub payload: Vec<u8>,
}

impl EvidenceEnvelope {
    pub fn wrap(evidence: &dyn Evidence, codec: &Codec) -> Result<Self, CodecError> {
        Ok(Self {
            kind: evidence.kind().to_string(),
            payload: evidence.encode_payload(codec)?,
        })
    }
}

/// Decodes one evidence payload into a trait object.
pub type EvidenceDecodeFn = fn(&Codec, &[u8]) -> Result<Arc<dyn Evidence>, CodecError>;

/// Decoder for any evidence type that is itself SBOR-decodable.
pub fn decode_evidence<E>(codec: &Codec, payload: &[u8]) -> Result<Arc<dyn Evidence>, CodecError>
where
    E: Evidence + BasicDecode + 'static,
{
    Ok(Arc::new(codec.decode::<E>(payload)?))
}

/// Table of the evidence kinds a node can decode, keyed by [`Evidence::kind`].
///
/// Passed explicitly alongside the [`Codec`]; there is no process-wide
/// registration. `Default` knows [`DuplicateVoteEvidence`].
#[derive(Clone)]
pub struct EvidenceDecoders {
    decoders: BTreeMap<&'static str, EvidenceDecodeFn>,
}

impl EvidenceDecoders {
    /// A table that decodes nothing.
    pub fn empty() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
    }

    /// Add or replace the decoder for `kind`.
    pub fn with(mut self, kind: &'static str, decode: EvidenceDecodeFn) -> Self {
        self.decoders.insert(kind, decode);
        self
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn decode(
        &self,
        codec: &Codec,
        envelope: &EvidenceEnvelope,
    ) -> Result<Arc<dyn Evidence>, CodecError> {
        let decode = self
            .decoders
            .get(envelope.kind.as_str())
            .ok_or_else(|| CodecError::UnknownEvidenceKind(envelope.kind.clone()))?;
        let evidence = decode(codec, &envelope.payload)?;
        if evidence.kind() != envelope.kind {
            return Err(CodecError::Decode(format!(
                "decoder for {} produced {} evidence",
                envelope.kind,
                evidence.kind()
            )));
        }
        Ok(evidence)
    }
}

impl Default for EvidenceDecoders {
    fn default() -> Self {
        Self::empty().with(
            DUPLICATE_VOTE_KIND,
            decode_evidence::<DuplicateVoteEvidence>,
        )
    }
}

impl fmt::Debug for EvidenceDecoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

/// Two conflicting votes signed by one validator for the same height, round
/// and step.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct DuplicateVoteEvidence {
    pub public_key: PublicKey,
    pub vote_a: Vote,
    pub vote_b: Vote,
}

impl DuplicateVoteEvidence {
    /// Votes are stored ordered by block id, so a pair reported in either
    /// order is the same evidence.
    pub fn new(public_key: PublicKey, vote1: Vote, vote2: Vote) -> Self {
        let (vote_a, vote_b) = if vote1.block_id.key() <= vote2.block_id.key() {
            (vote1, vote2)
        } else {
            (vote2, vote1)
        };
        Self {
            public_key,
            vote_a,
            vote_b,
        }
    }
}

impl Evidence for DuplicateVoteEvidence {
    fn height(&self) -> BlockHeight {
        self.vote_a.height
    }

    fn address(&self) -> Address {
        self.public_key.address()
    }

    fn hash(&self, codec: &Codec) -> Hash {
        codec.hash(self)
    }

    fn verify(&self, chain_id: &str, public_key: &PublicKey) -> Result<(), EvidenceError> {
        let (a, b) = (&self.vote_a, &self.vote_b);

        if a.height != b.height || a.round != b.round || a.vote_type != b.vote_type {
            return Err(EvidenceError::DifferentSlot {
                height_a: a.height,
                round_a: a.round,
                type_a: a.vote_type,
                height_b: b.height,
                round_b: b.round,
                type_b: b.vote_type,
            });
        }
        if a.validator_address != b.validator_address {
            return Err(EvidenceError::AddressMismatch {
                a: a.validator_address,
                b: b.validator_address,
            });
        }
        if a.validator_index != b.validator_index {
            return Err(EvidenceError::IndexMismatch {
                a: a.validator_index,
                b: b.validator_index,
            });
        }
        if a.block_id == b.block_id {
            return Err(EvidenceError::SameBlockId);
        }

        let key_address = public_key.address();
        if key_address != a.validator_address {
            return Err(EvidenceError::PublicKeyMismatch {
                key: key_address,
                evidence: a.validator_address,
            });
        }

        // Both signatures, or a single real vote could frame the validator.
        a.verify(chain_id, public_key)
            .map_err(|source| EvidenceError::InvalidVote {
                which: "vote_a",
                source,
            })?;
        b.verify(chain_id, public_key)
            .map_err(|source| EvidenceError::InvalidVote {
                which: "vote_b",
                source,
            })?;
        Ok(())
    }

    fn equal(&self, other: &dyn Evidence) -> bool {
        other
            .as_any()
            .downcast_ref::<DuplicateVoteEvidence>()
            .is_some_and(|o| o == self)
    }

    fn validate_basic(&self) -> Result<(), EvidenceError> {
        for (which, vote) in [("vote_a", &self.vote_a), ("vote_b", &self.vote_b)] {
            if vote.validator_index < 0 {
                return Err(EvidenceError::Malformed(format!(
                    "{which} has negative validator index {}",
                    vote.validator_index
                )));
            }
            if vote.signature.is_empty() {
                return Err(EvidenceError::Malformed(format!("{which} is unsigned")));
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        DUPLICATE_VOTE_KIND
    }

    fn encode_payload(&self, codec: &Codec) -> Result<Vec<u8>, CodecError> {
        codec.encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for DuplicateVoteEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DuplicateVoteEvidence{{{} {} vs {}}}",
            self.public_key.address(),
            self.vote_a,
            self.vote_b
        )
    }
}

/// Evidence with a fixed verification outcome.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct MockEvidence {
    pub height: BlockHeight,
    pub address: Address,
    pub valid: bool,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockEvidence {
    pub fn new(height: BlockHeight, address: Address) -> Self {
        Self {
            height,
            address,
            valid: true,
        }
    }

    pub fn invalid(height: BlockHeight, address: Address) -> Self {
        Self {
            height,
            address,
            valid: false,
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Evidence for MockEvidence {
    fn height(&self) -> BlockHeight {
        self.height
    }

    fn address(&self) -> Address {
        self.address
    }

    fn hash(&self, codec: &Codec) -> Hash {
        codec.hash(self)
    }

    fn verify(&self, _chain_id: &str, _public_key: &PublicKey) -> Result<(), EvidenceError> {
        if self.valid {
            Ok(())
        } else {
            Err(EvidenceError::Malformed("mock evidence marked invalid".into()))
        }
    }

    fn equal(&self, other: &dyn Evidence) -> bool {
        other
            .as_any()
            .downcast_ref::<MockEvidence>()
            .is_some_and(|o| o == self)
    }

    fn validate_basic(&self) -> Result<(), EvidenceError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "mock"
    }

    fn encode_payload(&self, codec: &Codec) -> Result<Vec<u8>, CodecError> {
        codec.encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl fmt::Display for MockEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MockEvidence{{{} @ {}}}", self.address, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockId, KeyPair};

    const CHAIN: &str = "evidence-chain";

    fn block_id(tag: &[u8]) -> BlockId {
        BlockId::new(Hash::from_bytes(tag), 1, Hash::from_bytes(b"parts"))
    }

    fn vote(key: &KeyPair, round: u32, block: BlockId) -> Vote {
        Vote::new(
            VoteType::Precommit,
            BlockHeight(5),
            round,
            block,
            0,
            key.address(),
            2,
        )
        .signed(CHAIN, key)
    }

    #[test]
    fn test_valid_duplicate_vote() {
        let key = KeyPair::from_seed([9u8; 32]);
        let ev = DuplicateVoteEvidence::new(
            key.public_key(),
            vote(&key, 0, block_id(b"a")),
            vote(&key, 0, block_id(b"b")),
        );
        assert!(ev.validate_basic().is_ok());
        assert!(ev.verify(CHAIN, &key.public_key()).is_ok());
        assert_eq!(ev.address(), key.address());
        assert_eq!(ev.height(), BlockHeight(5));
    }

    #[test]
    fn test_rejects_same_block_id() {
        let key = KeyPair::from_seed([9u8; 32]);
        let ev = DuplicateVoteEvidence::new(
            key.public_key(),
            vote(&key, 0, block_id(b"a")),
            vote(&key, 0, block_id(b"a")),
        );
        assert_eq!(
            ev.verify(CHAIN, &key.public_key()),
            Err(EvidenceError::SameBlockId)
        );
    }

    #[test]
    fn test_rejects_different_round() {
        let key = KeyPair::from_seed([9u8; 32]);
        let ev = DuplicateVoteEvidence::new(
            key.public_key(),
            vote(&key, 0, block_id(b"a")),
            vote(&key, 1, block_id(b"b")),
        );
        assert!(matches!(
            ev.verify(CHAIN, &key.public_key()),
            Err(EvidenceError::DifferentSlot { .. })
        ));
    }

    #[test]
    fn test_rejects_forged_second_vote() {
        let key = KeyPair::from_seed([9u8; 32]);
        let forger = KeyPair::from_seed([10u8; 32]);
        let real = vote(&key, 0, block_id(b"a"));
        // Claims to be from `key` but signed by someone else.
        let mut forged = Vote::new(
            VoteType::Precommit,
            BlockHeight(5),
            0,
            block_id(b"b"),
            0,
            key.address(),
            2,
        );
        forged.signature = forger.sign(&forged.sign_bytes(CHAIN));

        let ev = DuplicateVoteEvidence::new(key.public_key(), real, forged);
        assert!(matches!(
            ev.verify(CHAIN, &key.public_key()),
            Err(EvidenceError::InvalidVote {
                source: VoteError::InvalidSignature,
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_wrong_public_key() {
        let key = KeyPair::from_seed([9u8; 32]);
        let other = KeyPair::from_seed([10u8; 32]);
        let ev = DuplicateVoteEvidence::new(
            key.public_key(),
            vote(&key, 0, block_id(b"a")),
            vote(&key, 0, block_id(b"b")),
        );
        assert!(matches!(
            ev.verify(CHAIN, &other.public_key()),
            Err(EvidenceError::PublicKeyMismatch { .. })
        ));
    }

    #[test]
    fn test_order_independent_identity() {
        let codec = Codec::new();
        let key = KeyPair::from_seed([9u8; 32]);
        let a = vote(&key, 0, block_id(b"a"));
        let b = vote(&key, 0, block_id(b"b"));
        let ev1 = DuplicateVoteEvidence::new(key.public_key(), a.clone(), b.clone());
        let ev2 = DuplicateVoteEvidence::new(key.public_key(), b, a);
        assert!(ev1.equal(&ev2));
        assert_eq!(ev1.hash(&codec), ev2.hash(&codec));

        let mock = MockEvidence::new(BlockHeight(5), key.address());
        assert!(!ev1.equal(&mock));
    }

    #[test]
    fn test_envelope_roundtrip_through_decoders() {
        let codec = Codec::new();
        let key = KeyPair::from_seed([9u8; 32]);
        let ev = DuplicateVoteEvidence::new(
            key.public_key(),
            vote(&key, 0, block_id(b"a")),
            vote(&key, 0, block_id(b"b")),
        );

        let envelope = EvidenceEnvelope::wrap(&ev, &codec).unwrap();
        assert_eq!(envelope.kind, DUPLICATE_VOTE_KIND);

        let decoded = EvidenceDecoders::default().decode(&codec, &envelope).unwrap();
        assert!(decoded.equal(&ev));
        assert_eq!(decoded.hash(&codec), ev.hash(&codec));
        assert!(decoded.verify(CHAIN, &key.public_key()).is_ok());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let codec = Codec::new();
        let mock = MockEvidence::new(BlockHeight(3), KeyPair::from_seed([1u8; 32]).address());
        let envelope = EvidenceEnvelope::wrap(&mock, &codec).unwrap();

        let defaults = EvidenceDecoders::default();
        assert!(!defaults.knows("mock"));
        assert_eq!(
            defaults.decode(&codec, &envelope).unwrap_err(),
            CodecError::UnknownEvidenceKind("mock".to_string())
        );

        let extended = defaults.with("mock", decode_evidence::<MockEvidence>);
        assert!(extended.decode(&codec, &envelope).unwrap().equal(&mock));
    }

    #[test]
    fn test_mislabelled_envelope_is_rejected() {
        let codec = Codec::new();
        let mock = MockEvidence::new(BlockHeight(3), KeyPair::from_seed([1u8; 32]).address());
        let envelope = EvidenceEnvelope {
            kind: DUPLICATE_VOTE_KIND.to_string(),
            payload: mock.encode_payload(&codec).unwrap(),
        };
        assert!(matches!(
            EvidenceDecoders::default().decode(&codec, &envelope),
            Err(CodecError::Decode(_))
        ));
    }
}
