//! Digest primitives shared by the block model and the weave engine.
//!
//! Every consensus digest is SHA-256. Nothing here holds state.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of bytes in a weave digest.
pub const HASH_LEN: usize = 32;

/// A SHA-256 digest.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Number of leading zero bits, used as the proof-of-work score.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut bits = 0;
        for byte in self.0 {
            if byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros();
                break;
            }
        }
        bits
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

/// Digest an arbitrary byte string.
pub fn hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finish(hasher)
}

/// Proof-of-work commitment: `H(nonce ++ prev_hash ++ committed_txs)`.
pub fn block_hash(prev_hash: &Hash, committed_txs: &Hash, nonce: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(prev_hash.0);
    hasher.update(committed_txs.0);
    finish(hasher)
}

fn finish(hasher: Sha256) -> Hash {
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&hasher.finalize());
    Hash(out)
}

/// Interprets `hash` as a big-endian unsigned integer and reduces it modulo
/// `modulus`. `modulus` must be non-zero.
pub fn decode_unsigned_mod(hash: &Hash, modulus: u64) -> u64 {
    let modulus = u128::from(modulus);
    let rem = hash
        .0
        .iter()
        .fold(0u128, |acc, byte| (acc * 256 + u128::from(*byte)) % modulus);
    rem as u64
}
