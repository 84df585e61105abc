//! Identifier newtypes and voting-power arithmetic.

use sbor::prelude::*;
use std::fmt;

/// Position of a block in the chain. Height 0 is "before the first block".
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    BasicSbor,
    serde::Serialize,
    serde::Deserialize,
)]
#[sbor(transparent)]
#[serde(transparent)]
pub struct BlockHeight(pub u64);

impl BlockHeight {
    pub const GENESIS: Self = BlockHeight(0);

    pub fn next(self) -> Self {
        BlockHeight(self.0 + 1)
    }

    /// Previous height, or None at genesis.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(BlockHeight)
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consensus round within a height.
pub type Round = u32;

/// Voting power arithmetic.
///
/// Voting power and proposer priority are `i64` and every operation on them
/// clamps at the `i64` bounds. All replicas must agree bit-for-bit, so
/// wrapping or panicking on overflow is never acceptable.
pub struct VotePower;

impl VotePower {
    /// ⌊2·total/3⌋, computed without intermediate overflow.
    pub fn two_thirds(total: i64) -> i64 {
        (i128::from(total) * 2 / 3) as i64
    }

    /// True iff `power` is strictly greater than two thirds of `total`.
    pub fn has_quorum(power: i64, total: i64) -> bool {
        power > Self::two_thirds(total)
    }

    /// Smallest power that satisfies [`VotePower::has_quorum`].
    pub fn quorum_threshold(total: i64) -> i64 {
        Self::two_thirds(total).saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_is_strict() {
        // 2/3 of 30 is exactly 20: 20 is not enough, 21 is.
        assert!(!VotePower::has_quorum(20, 30));
        assert!(VotePower::has_quorum(21, 30));
        assert_eq!(VotePower::quorum_threshold(30), 21);
    }

    #[test]
    fn test_quorum_floor() {
        // 2*40/3 = 26.67 -> 26
        assert_eq!(VotePower::two_thirds(40), 26);
        assert!(VotePower::has_quorum(27, 40));
        assert!(!VotePower::has_quorum(26, 40));
    }

    #[test]
    fn test_two_thirds_does_not_overflow() {
        let t = VotePower::two_thirds(i64::MAX);
        assert!(t > 0);
        assert_eq!(VotePower::quorum_threshold(i64::MAX), t + 1);
    }

    #[test]
    fn test_height_prev_next() {
        assert_eq!(BlockHeight(4).next(), BlockHeight(5));
        assert_eq!(BlockHeight(4).prev(), Some(BlockHeight(3)));
        assert_eq!(BlockHeight::GENESIS.prev(), None);
    }
}
