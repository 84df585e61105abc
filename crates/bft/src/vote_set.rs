//! Vote aggregation for a single (height, round, vote type).
//!
//! A `VoteSet` keeps two views of the votes it has accepted:
//!
//! - the canonical slot per validator (`votes`), which is what gets gossiped
//!   and what `sum` tallies, and
//! - one bucket per candidate block (`votes_by_block`), each with its own
//!   tally.
//!
//! The first block whose bucket tally exceeds two thirds of the total power
//! becomes `maj23` and stays so for the lifetime of the set. Once that
//! happens, the bucket's votes are copied into the canonical slots.
//!
//! A validator that votes for two different blocks is an equivocator. The
//! second vote is reported back to the caller together with the first, so the
//! caller can turn the pair into evidence. It is only tallied if a peer has
//! claimed a two-thirds majority for its block (otherwise an attacker could
//! make us track arbitrarily many blocks).

use meridian_types::{
    Address, BitArray, BlockHeight, BlockId, Commit, DuplicateVoteEvidence, PublicKey, Round,
    ValidatorSet, Vote, VotePower, VoteType,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

/// Identifier of the peer that relayed a majority claim.
pub type PeerId = String;

/// Reasons a vote or peer claim is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteSetError {
    #[error("invalid validator index {index} (set size {size})")]
    InvalidValidatorIndex { index: i32, size: usize },

    #[error("invalid validator address {address} for index {index}")]
    InvalidValidatorAddress { index: i32, address: Address },

    #[error(
        "unexpected step: expected {expected_height}/{expected_round}/{expected_type}, got {height}/{round}/{vote_type}"
    )]
    UnexpectedStep {
        expected_height: BlockHeight,
        expected_round: Round,
        expected_type: VoteType,
        height: BlockHeight,
        round: Round,
        vote_type: VoteType,
    },

    #[error("invalid signature from validator {index}")]
    InvalidSignature { index: i32 },

    #[error("validator {index} signed the same vote twice with different signatures")]
    NonDeterministicSignature { index: i32 },

    #[error("peer {peer} claimed maj23 for {claimed}, but already claimed {existing}")]
    ConflictingPeerClaim {
        peer: PeerId,
        existing: BlockId,
        claimed: BlockId,
    },

    #[error("cannot make a commit from {0} votes")]
    NotPrecommit(VoteType),

    #[error("cannot make a commit without a two-thirds majority")]
    NoMajority,
}

/// Two conflicting votes from one validator, as seen by a `VoteSet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equivocation {
    pub public_key: PublicKey,
    /// The vote we already held for this validator.
    pub existing: Vote,
    /// The vote that conflicts with it.
    pub incoming: Vote,
}

impl From<Equivocation> for DuplicateVoteEvidence {
    fn from(eq: Equivocation) -> Self {
        DuplicateVoteEvidence::new(eq.public_key, eq.existing, eq.incoming)
    }
}

/// Result of a successfully validated vote.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddVoteOutcome {
    /// Whether the vote was stored (false for duplicates and untracked
    /// conflicting votes).
    pub added: bool,
    /// Set when the vote conflicts with an earlier vote from the same validator.
    pub conflict: Option<Equivocation>,
}

/// Votes for one candidate block.
#[derive(Debug)]
struct BlockVotes {
    /// A peer claimed this block has a two-thirds majority.
    peer_maj23: bool,
    bit_array: BitArray,
    votes: Vec<Option<Vote>>,
    sum: i64,
}

impl BlockVotes {
    fn new(peer_maj23: bool, size: usize) -> Self {
        Self {
            peer_maj23,
            bit_array: BitArray::new(size),
            votes: vec![None; size],
            sum: 0,
        }
    }

    fn add_verified_vote(&mut self, vote: Vote, index: usize, voting_power: i64) {
        if self.votes[index].is_none() {
            self.bit_array.set(index, true);
            self.votes[index] = Some(vote);
            self.sum = self.sum.saturating_add(voting_power);
        }
    }

    fn get_by_index(&self, index: usize) -> Option<&Vote> {
        self.votes.get(index).and_then(Option::as_ref)
    }
}

#[derive(Debug)]
struct Inner {
    votes_bit_array: BitArray,
    /// Canonical vote per validator.
    votes: Vec<Option<Vote>>,
    /// Power of all canonical votes, whatever block they are for.
    sum: i64,
    maj23: Option<BlockId>,
    votes_by_block: HashMap<BlockId, BlockVotes>,
    peer_maj23s: HashMap<PeerId, BlockId>,
}

/// Thread-safe vote aggregation for one (height, round, vote type).
///
/// Every public method takes the internal lock for its whole duration. The
/// lock is not reentrant.
#[derive(Debug)]
pub struct VoteSet {
    chain_id: String,
    height: BlockHeight,
    round: Round,
    vote_type: VoteType,
    validators: ValidatorSet,
    inner: Mutex<Inner>,
}

impl VoteSet {
    pub fn new(
        chain_id: impl Into<String>,
        height: BlockHeight,
        round: Round,
        vote_type: VoteType,
        validators: ValidatorSet,
    ) -> Self {
        let size = validators.size();
        Self {
            chain_id: chain_id.into(),
            height,
            round,
            vote_type,
            validators,
            inner: Mutex::new(Inner {
                votes_bit_array: BitArray::new(size),
                votes: vec![None; size],
                sum: 0,
                maj23: None,
                votes_by_block: HashMap::new(),
                peer_maj23s: HashMap::new(),
            }),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn vote_type(&self) -> VoteType {
        self.vote_type
    }

    /// Number of validator slots.
    pub fn size(&self) -> usize {
        self.validators.size()
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Validate and record a vote.
    ///
    /// Malformed, mis-addressed or badly signed votes are errors. A byte-identical
    /// duplicate is `Ok` with `added == false`. A vote conflicting with an earlier
    /// vote from the same validator is `Ok` with `conflict` set; whether it was
    /// also tallied is reported in `added`.
    #[instrument(skip(self, vote), fields(
        height = vote.height.0,
        round = vote.round,
        vote_type = %vote.vote_type,
        index = vote.validator_index
    ))]
    pub fn add_vote(&self, vote: Vote) -> Result<AddVoteOutcome, VoteSetError> {
        let raw_index = vote.validator_index;
        if raw_index < 0 {
            return Err(VoteSetError::InvalidValidatorIndex {
                index: raw_index,
                size: self.size(),
            });
        }
        if vote.validator_address.is_empty() {
            return Err(VoteSetError::InvalidValidatorAddress {
                index: raw_index,
                address: vote.validator_address,
            });
        }
        if vote.height != self.height || vote.round != self.round || vote.vote_type != self.vote_type
        {
            return Err(VoteSetError::UnexpectedStep {
                expected_height: self.height,
                expected_round: self.round,
                expected_type: self.vote_type,
                height: vote.height,
                round: vote.round,
                vote_type: vote.vote_type,
            });
        }

        let index = raw_index as usize;
        let Some(validator) = self.validators.validators().get(index) else {
            return Err(VoteSetError::InvalidValidatorIndex {
                index: raw_index,
                size: self.size(),
            });
        };
        // Anti-impersonation: the index must belong to the claimed address.
        if validator.address != vote.validator_address {
            return Err(VoteSetError::InvalidValidatorAddress {
                index: raw_index,
                address: vote.validator_address,
            });
        }

        let mut inner = self.inner.lock();

        if let Some(existing) = inner.get_vote(index, &vote.block_id) {
            if existing.signature == vote.signature {
                trace!("Duplicate vote ignored");
                return Ok(AddVoteOutcome::default());
            }
            warn!(
                validator = %vote.validator_address,
                "Same vote seen with a different signature"
            );
            return Err(VoteSetError::NonDeterministicSignature { index: raw_index });
        }

        if vote.verify(&self.chain_id, &validator.public_key).is_err() {
            warn!(validator = %vote.validator_address, "Invalid vote signature");
            return Err(VoteSetError::InvalidSignature { index: raw_index });
        }

        let public_key = validator.public_key;
        let voting_power = validator.voting_power;
        let total_power = self.validators.total_voting_power();
        let (added, conflicting) =
            inner.add_verified_vote(vote.clone(), index, voting_power, total_power);

        let conflict = conflicting.map(|existing| {
            warn!(
                validator = %vote.validator_address,
                existing_block = %existing.block_id,
                incoming_block = %vote.block_id,
                tallied = added,
                "Conflicting vote from validator"
            );
            Equivocation {
                public_key,
                existing,
                incoming: vote.clone(),
            }
        });

        if added {
            debug!(
                block_id = %vote.block_id,
                voting_power,
                sum = inner.sum,
                total_power,
                "Vote added"
            );
        }

        Ok(AddVoteOutcome { added, conflict })
    }

    /// Record a peer's claim that `block_id` has a two-thirds majority.
    ///
    /// Claims are not verified; they only make us track votes for that block
    /// even when they conflict with votes we already hold.
    pub fn set_peer_maj23(&self, peer: &str, block_id: BlockId) -> Result<(), VoteSetError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.peer_maj23s.get(peer) {
            if *existing == block_id {
                return Ok(());
            }
            return Err(VoteSetError::ConflictingPeerClaim {
                peer: peer.to_string(),
                existing: *existing,
                claimed: block_id,
            });
        }
        inner.peer_maj23s.insert(peer.to_string(), block_id);

        let size = self.size();
        inner
            .votes_by_block
            .entry(block_id)
            .and_modify(|bv| bv.peer_maj23 = true)
            .or_insert_with(|| BlockVotes::new(true, size));

        debug!(peer, block_id = %block_id, "Peer claimed two-thirds majority");
        Ok(())
    }

    /// Which validators we hold a canonical vote from.
    pub fn bit_array(&self) -> BitArray {
        self.inner.lock().votes_bit_array.clone()
    }

    /// Which validators voted for `block_id`, if we track that block.
    pub fn bit_array_by_block_id(&self, block_id: &BlockId) -> Option<BitArray> {
        self.inner
            .lock()
            .votes_by_block
            .get(block_id)
            .map(|bv| bv.bit_array.clone())
    }

    pub fn get_by_index(&self, index: usize) -> Option<Vote> {
        self.inner.lock().votes.get(index).cloned().flatten()
    }

    pub fn get_by_address(&self, address: &Address) -> Option<Vote> {
        let (index, _) = self.validators.get_by_address(address)?;
        self.get_by_index(index)
    }

    /// Power of all canonical votes.
    pub fn sum(&self) -> i64 {
        self.inner.lock().sum
    }

    pub fn has_two_thirds_majority(&self) -> bool {
        self.inner.lock().maj23.is_some()
    }

    /// The block that reached a two-thirds majority, if any.
    pub fn two_thirds_majority(&self) -> Option<BlockId> {
        self.inner.lock().maj23
    }

    pub fn is_commit(&self) -> bool {
        self.vote_type == VoteType::Precommit && self.has_two_thirds_majority()
    }

    /// More than two thirds of the power has voted, for any mix of blocks.
    pub fn has_two_thirds_any(&self) -> bool {
        let sum = self.inner.lock().sum;
        VotePower::has_quorum(sum, self.validators.total_voting_power())
    }

    pub fn has_all(&self) -> bool {
        self.inner.lock().sum == self.validators.total_voting_power()
    }

    /// Build the commit for the majority block.
    ///
    /// Slots hold the precommits for that block; every other slot is empty.
    pub fn make_commit(&self) -> Result<Commit, VoteSetError> {
        if self.vote_type != VoteType::Precommit {
            return Err(VoteSetError::NotPrecommit(self.vote_type));
        }
        let inner = self.inner.lock();
        let Some(maj23) = inner.maj23 else {
            return Err(VoteSetError::NoMajority);
        };
        let precommits = inner
            .votes_by_block
            .get(&maj23)
            .map(|bv| bv.votes.clone())
            .unwrap_or_else(|| vec![None; self.size()]);
        Ok(Commit::new(maj23, precommits))
    }
}

impl Inner {
    /// Vote from `index` for `block_id`, from the canonical slot or the block's bucket.
    fn get_vote(&self, index: usize, block_id: &BlockId) -> Option<&Vote> {
        if let Some(vote) = self.votes.get(index).and_then(Option::as_ref) {
            if vote.block_id == *block_id {
                return Some(vote);
            }
        }
        self.votes_by_block
            .get(block_id)
            .and_then(|bv| bv.get_by_index(index))
    }

    /// Record a verified vote not already held for this block. Returns
    /// whether it was tallied and the earlier vote it conflicts with, if any.
    fn add_verified_vote(
        &mut self,
        vote: Vote,
        index: usize,
        voting_power: i64,
        total_power: i64,
    ) -> (bool, Option<Vote>) {
        let block_id = vote.block_id;
        let mut conflicting = None;

        if let Some(existing) = self.votes[index].clone() {
            conflicting = Some(existing);
            // Only a vote for the majority block may replace the canonical one.
            if self.maj23 == Some(block_id) {
                self.votes[index] = Some(vote.clone());
                self.votes_bit_array.set(index, true);
            }
        } else {
            self.votes[index] = Some(vote.clone());
            self.votes_bit_array.set(index, true);
            self.sum = self.sum.saturating_add(voting_power);
        }

        if conflicting.is_some() {
            match self.votes_by_block.get(&block_id) {
                // Conflict, and no peer vouches for this block.
                Some(bucket) if !bucket.peer_maj23 => return (false, conflicting),
                // Not tracking this block; don't start for a conflicting vote.
                None => return (false, conflicting),
                Some(_) => {}
            }
        }

        let size = self.votes.len();
        let bucket = self
            .votes_by_block
            .entry(block_id)
            .or_insert_with(|| BlockVotes::new(false, size));

        let quorum = VotePower::quorum_threshold(total_power);
        let orig_sum = bucket.sum;
        bucket.add_verified_vote(vote, index, voting_power);
        let new_sum = bucket.sum;

        if orig_sum < quorum && quorum <= new_sum && self.maj23.is_none() {
            // First block to reach quorum; sticky from here on.
            self.maj23 = Some(block_id);
            let maj23_votes: Vec<(usize, Vote)> = bucket
                .votes
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.clone().map(|v| (i, v)))
                .collect();
            for (i, v) in maj23_votes {
                self.votes[i] = Some(v);
                self.votes_bit_array.set(i, true);
            }
            info!(
                block_id = %block_id,
                power = new_sum,
                total_power,
                "Two-thirds majority reached"
            );
        }

        (true, conflicting)
    }
}
