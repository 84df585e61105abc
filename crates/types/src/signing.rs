//! Domain-separated signing messages.
//!
//! Sign bytes use a fixed big-endian layout rather than the codec so that a
//! signature never depends on codec configuration.

use crate::{BlockHeight, BlockId, Round, VoteType};

/// Domain tag for consensus votes.
pub const DOMAIN_VOTE: &[u8] = b"meridian/vote/v1";

/// Bytes a validator signs for a vote.
///
/// Layout: domain tag, chain id (u32 length prefix), vote type, height,
/// round, block hash, part-set total, part-set hash, timestamp.
pub fn vote_message(
    chain_id: &str,
    vote_type: VoteType,
    height: BlockHeight,
    round: Round,
    block_id: &BlockId,
    timestamp: u64,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_VOTE.len() + chain_id.len() + 128);
    msg.extend_from_slice(DOMAIN_VOTE);
    msg.extend_from_slice(&(chain_id.len() as u32).to_be_bytes());
    msg.extend_from_slice(chain_id.as_bytes());
    msg.push(vote_type.as_byte());
    msg.extend_from_slice(&height.0.to_be_bytes());
    msg.extend_from_slice(&round.to_be_bytes());
    msg.extend_from_slice(block_id.hash.as_bytes());
    msg.extend_from_slice(&block_id.parts.total.to_be_bytes());
    msg.extend_from_slice(block_id.parts.hash.as_bytes());
    msg.extend_from_slice(&timestamp.to_be_bytes());
    msg
}
