use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::blockchain::Block;
use crate::codec::Codec;
use crate::crypto::{self, Hash};
use crate::error::WeaveResult;
use crate::storage::BlockStore;

/// Identifier of a transaction; blocks carry these rather than payloads.
pub type TxId = Hash;

/// Represents a transaction stored in the weave.
///
/// The derived `Ord` is the canonical total order used by [`commit_txs`]:
/// transactions compare by `id` first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Transaction {
    /// Digest of the remaining fields.
    pub id: TxId,
    /// The sender's public key.
    pub owner: Vec<u8>,
    /// The recipient, empty for pure data transactions.
    pub target: Vec<u8>,
    /// The amount to transfer.
    pub quantity: u64,
    /// Arbitrary payload to be stored in the weave.
    pub data: Vec<u8>,
    /// Stored as raw bytes; signature checking belongs to the wallet layer.
    pub signature: Vec<u8>,
}

impl Transaction {
    pub fn new(owner: Vec<u8>, target: Vec<u8>, quantity: u64, data: Vec<u8>) -> Self {
        let id = Self::compute_id(&owner, &target, quantity, &data);
        Self {
            id,
            owner,
            target,
            quantity,
            data,
            signature: Vec::new(),
        }
    }

    /// Length-prefixed fields fed straight into the digest.
    fn compute_id(owner: &[u8], target: &[u8], quantity: u64, data: &[u8]) -> TxId {
        let mut hasher = Sha256::new();
        for field in [owner, target] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        hasher.update(quantity.to_le_bytes());
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);

        let mut id = [0u8; crypto::HASH_LEN];
        id.copy_from_slice(&hasher.finalize());
        Hash(id)
    }
}

/// Derives the committed transaction digest for a set of transactions.
///
/// The input order does not matter: a sorted copy is encoded, concatenated and
/// digested.
pub fn commit_txs<C: Codec>(codec: &C, txs: &[Transaction]) -> WeaveResult<Hash> {
    let mut sorted: Vec<&Transaction> = txs.iter().collect();
    sorted.sort();
    let mut buf = Vec::new();
    for tx in sorted {
        buf.extend_from_slice(&codec.encode_tx(tx)?);
    }
    Ok(crypto::hash(&buf))
}

/// Commits the transactions a block references, resolving them through
/// `store`. Identifiers that no longer resolve are left out of the digest.
pub fn commit_block_txs<C: Codec, S: BlockStore>(
    codec: &C,
    store: &S,
    block: &Block,
) -> WeaveResult<Hash> {
    let resolved = store.resolve_txs(&block.txs)?;
    let available: Vec<Transaction> = resolved.into_iter().flatten().collect();
    if available.len() < block.txs.len() {
        tracing::debug!(
            height = block.height,
            referenced = block.txs.len(),
            available = available.len(),
            "committing block with unavailable transactions"
        );
    }
    commit_txs(codec, &available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use crate::storage::MemoryStore;

    fn sample(n: u64) -> Transaction {
        Transaction::new(b"owner".to_vec(), b"target".to_vec(), n, format!("data-{n}").into_bytes())
    }

    #[test]
    fn test_commit_txs_order_insensitive() {
        let (t1, t2, t3) = (sample(1), sample(2), sample(3));
        let a = commit_txs(&BincodeCodec, &[t1.clone(), t2.clone(), t3.clone()]).unwrap();
        let b = commit_txs(&BincodeCodec, &[t3, t1, t2]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_commit_txs_empty_is_digest_of_nothing() {
        let commit = commit_txs(&BincodeCodec, &[]).unwrap();
        assert_eq!(commit, crypto::hash(b""));
    }

    #[test]
    fn test_commit_txs_detects_different_sets() {
        let a = commit_txs(&BincodeCodec, &[sample(1), sample(2)]).unwrap();
        let b = commit_txs(&BincodeCodec, &[sample(1), sample(3)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tx_id_covers_payload() {
        assert_ne!(sample(1).id, sample(2).id);
        assert_eq!(sample(1).id, sample(1).id);
    }

    #[test]
    fn test_tx_id_separates_field_boundaries() {
        let a = Transaction::new(b"ab".to_vec(), b"c".to_vec(), 1, Vec::new());
        let b = Transaction::new(b"a".to_vec(), b"bc".to_vec(), 1, Vec::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_commit_block_txs_drops_unavailable() {
        let store = MemoryStore::new();
        let (t1, t2) = (sample(1), sample(2));
        store.put_tx(&t1).unwrap();

        let block = Block {
            txs: vec![t1.id, t2.id],
            ..Block::default()
        };

        let partial = commit_block_txs(&BincodeCodec, &store, &block).unwrap();
        assert_eq!(partial, commit_txs(&BincodeCodec, &[t1.clone()]).unwrap());

        store.put_tx(&t2).unwrap();
        let full = commit_block_txs(&BincodeCodec, &store, &block).unwrap();
        assert_eq!(full, commit_txs(&BincodeCodec, &[t1, t2]).unwrap());
        assert_ne!(partial, full);
    }
}
