//! Block and transaction lookup by hash.
//!
//! The weave engine only reads through [`BlockStore`]; writes are made by the
//! node that owns the store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sled::Db;

use crate::blockchain::Block;
use crate::crypto::Hash;
use crate::error::{WeaveError, WeaveResult};
use crate::tx::{Transaction, TxId};

const BLOCK_PREFIX: &[u8] = b"block/";
const TX_PREFIX: &[u8] = b"tx/";
const LATEST_KEY: &[u8] = b"latest";

pub trait BlockStore {
    fn resolve_block(&self, hash: &Hash) -> WeaveResult<Option<Block>>;

    fn resolve_tx(&self, id: &TxId) -> WeaveResult<Option<Transaction>>;

    /// `None` marks an unavailable transaction; position matches `ids`.
    fn resolve_txs(&self, ids: &[TxId]) -> WeaveResult<Vec<Option<Transaction>>> {
        ids.iter().map(|id| self.resolve_tx(id)).collect()
    }

    /// Stores a sealed block under its independent hash.
    fn put_block(&self, block: &Block) -> WeaveResult<()>;

    fn put_tx(&self, tx: &Transaction) -> WeaveResult<()>;

    fn remove_tx(&self, id: &TxId) -> WeaveResult<()>;

    /// Independent hash of the locally accepted head, if any.
    fn head(&self) -> WeaveResult<Option<Hash>>;

    fn set_head(&self, hash: &Hash) -> WeaveResult<()>;
}

/// In-process store backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<Hash, Block>>,
    txs: RwLock<HashMap<TxId, Transaction>>,
    head: RwLock<Option<Hash>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// Writers only ever insert or remove whole values, so a poisoned lock still
// guards a consistent map.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl BlockStore for MemoryStore {
    fn resolve_block(&self, hash: &Hash) -> WeaveResult<Option<Block>> {
        Ok(read(&self.blocks).get(hash).cloned())
    }

    fn resolve_tx(&self, id: &TxId) -> WeaveResult<Option<Transaction>> {
        Ok(read(&self.txs).get(id).cloned())
    }

    fn put_block(&self, block: &Block) -> WeaveResult<()> {
        let hash = block.sealed_hash()?;
        write(&self.blocks).insert(hash, block.clone());
        Ok(())
    }

    fn put_tx(&self, tx: &Transaction) -> WeaveResult<()> {
        write(&self.txs).insert(tx.id, tx.clone());
        Ok(())
    }

    fn remove_tx(&self, id: &TxId) -> WeaveResult<()> {
        write(&self.txs).remove(id);
        Ok(())
    }

    fn head(&self) -> WeaveResult<Option<Hash>> {
        Ok(*read(&self.head))
    }

    fn set_head(&self, hash: &Hash) -> WeaveResult<()> {
        *write(&self.head) = Some(*hash);
        Ok(())
    }
}

/// On-disk store. Records are JSON values keyed by a type prefix and the
/// record's hash; `latest` points at the head.
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> WeaveResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn key(prefix: &[u8], hash: &Hash) -> Vec<u8> {
        let mut key = prefix.to_vec();
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

impl BlockStore for SledStore {
    fn resolve_block(&self, hash: &Hash) -> WeaveResult<Option<Block>> {
        match self.db.get(Self::key(BLOCK_PREFIX, hash))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn resolve_tx(&self, id: &TxId) -> WeaveResult<Option<Transaction>> {
        match self.db.get(Self::key(TX_PREFIX, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_block(&self, block: &Block) -> WeaveResult<()> {
        let hash = block.sealed_hash()?;
        let val = serde_json::to_vec(block)?;
        self.db.insert(Self::key(BLOCK_PREFIX, &hash), val)?;
        self.db.flush()?;
        Ok(())
    }

    fn put_tx(&self, tx: &Transaction) -> WeaveResult<()> {
        let val = serde_json::to_vec(tx)?;
        self.db.insert(Self::key(TX_PREFIX, &tx.id), val)?;
        self.db.flush()?;
        Ok(())
    }

    fn remove_tx(&self, id: &TxId) -> WeaveResult<()> {
        self.db.remove(Self::key(TX_PREFIX, id))?;
        self.db.flush()?;
        Ok(())
    }

    fn head(&self) -> WeaveResult<Option<Hash>> {
        let Some(bytes) = self.db.get(LATEST_KEY)? else {
            return Ok(None);
        };
        let bytes: [u8; 32] = bytes[..].try_into().map_err(|_| {
            WeaveError::Storage(sled::Error::Unsupported(
                "latest head pointer is not a 32-byte hash".into(),
            ))
        })?;
        Ok(Some(Hash(bytes)))
    }

    fn set_head(&self, hash: &Hash) -> WeaveResult<()> {
        self.db.insert(LATEST_KEY, hash.as_bytes().to_vec())?;
        self.db.flush()?;
        Ok(())
    }
}
