//! Hashing for content-addressed identifiers
//!
//! This module provides:
//! - SHA-256 hashing of raw bytes and of length-delimited byte sequences
//! - Hashing of any serializable object through its canonical bincode bytes
//! - Merkle roots over leaf hashes

use crate::types::Hash;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a sequence of byte strings, each prefixed with its length
///
/// Length prefixes keep `["ab", "c"]` and `["a", "bc"]` apart.
pub fn hash_all(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

/// Hash the canonical (bincode) encoding of an object
pub fn hash_object<T: Serialize + ?Sized>(object: &T) -> Hash {
    let bytes = bincode::serialize(object).expect("Serialization should not fail");
    Hash(hash_bytes(&bytes))
}

/// Create a Merkle root from leaf hashes
///
/// If a level has odd length, the last hash is duplicated.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut current_level: Vec<[u8; 32]> = leaves.to_vec();

    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                let mut hasher = Sha256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();
    }

    current_level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes() {
        let hash1 = hash_bytes(b"test data");
        let hash2 = hash_bytes(b"test data");
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash_bytes(b"different data"));
    }

    #[test]
    fn test_hash_all_is_length_delimited() {
        let a = hash_all(&[b"ab", b"c"]);
        let b = hash_all(&[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_object_deterministic() {
        let value = (42u64, vec![1u8, 2, 3]);
        assert_eq!(hash_object(&value), hash_object(&value.clone()));
    }

    #[test]
    fn test_merkle_root_empty() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn test_merkle_root_single() {
        let hash = [1u8; 32];
        assert_eq!(merkle_root(&[hash]), hash);
    }

    #[test]
    fn test_merkle_root_two() {
        let hash1 = [1u8; 32];
        let hash2 = [2u8; 32];

        let mut hasher = Sha256::new();
        hasher.update(hash1);
        hasher.update(hash2);
        let expected: [u8; 32] = hasher.finalize().into();

        assert_eq!(merkle_root(&[hash1, hash2]), expected);
    }

    #[test]
    fn test_merkle_root_odd_duplicates_last() {
        let hash1 = [1u8; 32];
        let hash2 = [2u8; 32];
        let hash3 = [3u8; 32];
        assert_eq!(
            merkle_root(&[hash1, hash2, hash3]),
            merkle_root(&[hash1, hash2, hash3, hash3])
        );
    }
}
