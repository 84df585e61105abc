//! Simple binary merkle tree over byte slices.
//!
//! Leaves and inner nodes are domain separated (`0x00` / `0x01` prefix) and
//! the tree splits at the largest power of two strictly below the leaf
//! count. The root of an empty list is `Hash::ZERO`.

use crate::hash::Hash;

const LEAF_PREFIX: &[u8] = &[0x00];
const INNER_PREFIX: &[u8] = &[0x01];

/// Merkle root of a list of byte strings.
pub fn merkle_root<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    match items.len() {
        0 => Hash::ZERO,
        1 => leaf_hash(items[0].as_ref()),
        n => {
            let k = split_point(n);
            let left = merkle_root(&items[..k]);
            let right = merkle_root(&items[k..]);
            inner_hash(&left, &right)
        }
    }
}

fn leaf_hash(leaf: &[u8]) -> Hash {
    Hash::from_parts(&[LEAF_PREFIX, leaf])
}

fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    Hash::from_parts(&[INNER_PREFIX, left.as_bytes(), right.as_bytes()])
}

/// Largest power of two strictly less than `n` (n >= 2).
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        let empty: [&[u8]; 0] = [];
        assert_eq!(merkle_root(&empty), Hash::ZERO);
    }

    #[test]
    fn test_split_point() {
        assert_eq!(split_point(2), 1);
        assert_eq!(split_point(3), 2);
        assert_eq!(split_point(4), 2);
        assert_eq!(split_point(5), 4);
        assert_eq!(split_point(9), 8);
    }

    #[test]
    fn test_order_matters() {
        let a = merkle_root(&[b"a".as_slice(), b"b".as_slice()]);
        let b = merkle_root(&[b"b".as_slice(), b"a".as_slice()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_single_leaf_is_not_raw_hash() {
        // Leaf prefix keeps a one-leaf tree distinct from a plain hash.
        assert_ne!(merkle_root(&[b"x"]), Hash::from_bytes(b"x"));
    }
}
