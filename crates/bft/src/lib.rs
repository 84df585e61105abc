//! Vote aggregation for BFT consensus.
//!
//! This crate turns individually signed votes into quorum decisions:
//!
//! - `VoteSet` collects prevotes or precommits for one (height, round),
//!   tallies voting power per candidate block, and detects when a block has
//!   more than two thirds of the total power (`maj23`).
//! - A precommit `VoteSet` with a majority produces the `Commit` that the
//!   next block carries and the executor verifies.
//! - Conflicting votes from one validator are surfaced as an `Equivocation`
//!   alongside the normal result, never as an error, so the caller can hand
//!   them to the evidence pool.
//!
//! # Terminology
//!
//! - **Height**: Position in the chain. One block is committed per height.
//!
//! - **Round**: Attempt number within a height. Each round has its own
//!   prevote and precommit `VoteSet`.
//!
//! - **Quorum**: Strictly more than two thirds of the total voting power.
//!
//! The driver that creates vote sets, gossips votes and moves through rounds
//! is outside this crate.

mod vote_set;

pub use vote_set::{AddVoteOutcome, Equivocation, PeerId, VoteSet, VoteSetError};
