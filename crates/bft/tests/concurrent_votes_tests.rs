//! VoteSet used from several threads at once, as a gossip layer would.

use meridian_bft::VoteSet;
use meridian_types::test_utils::{signed_vote, test_block_id, test_validator_set, TEST_CHAIN_ID};
use meridian_types::{BlockHeight, VoteType};
use std::sync::Arc;
use std::thread;

#[test]
fn test_parallel_delivery_reaches_same_commit() {
    let powers = vec![10; 16];
    let (set, keys) = test_validator_set(&powers);
    let height = BlockHeight(3);
    let block = test_block_id("B1");
    let vote_set = Arc::new(VoteSet::new(
        TEST_CHAIN_ID,
        height,
        0,
        VoteType::Precommit,
        set,
    ));

    let votes: Vec<_> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| signed_vote(k, i, VoteType::Precommit, height, 0, block))
        .collect();

    // Every vote is delivered twice, from four threads.
    thread::scope(|s| {
        for chunk in 0..4 {
            let vote_set = Arc::clone(&vote_set);
            let votes = &votes;
            s.spawn(move || {
                for vote in votes.iter().skip(chunk % 2).step_by(2) {
                    vote_set.add_vote(vote.clone()).unwrap();
                }
            });
        }
    });

    assert!(vote_set.has_all());
    assert_eq!(vote_set.sum(), 160);
    assert_eq!(vote_set.two_thirds_majority(), Some(block));

    let commit = vote_set.make_commit().unwrap();
    assert!(commit.precommits.iter().all(Option::is_some));
    assert!(vote_set
        .validators()
        .verify_commit(TEST_CHAIN_ID, &block, height, &commit)
        .is_ok());
}

#[test]
fn test_conflicts_are_reported_once_per_delivery() {
    let (set, keys) = test_validator_set(&[10, 10, 10, 10]);
    let height = BlockHeight(3);
    let vote_set = VoteSet::new(TEST_CHAIN_ID, height, 0, VoteType::Prevote, set);

    let a = signed_vote(&keys[2], 2, VoteType::Prevote, height, 0, test_block_id("A"));
    let b = signed_vote(&keys[2], 2, VoteType::Prevote, height, 0, test_block_id("B"));

    assert!(vote_set.add_vote(a).unwrap().conflict.is_none());
    for _ in 0..3 {
        let outcome = vote_set.add_vote(b.clone()).unwrap();
        assert!(outcome.conflict.is_some());
        assert!(!outcome.added);
    }
    assert_eq!(vote_set.sum(), 10);
}
