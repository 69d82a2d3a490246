use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::crypto::{self, Hash};
use crate::error::{WeaveError, WeaveResult};
use crate::storage::BlockStore;
use crate::tx::TxId;

/// Who receives the mining reward for a block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub enum RewardAddr {
    #[default]
    Unclaimed,
    Address(Vec<u8>),
}

/// One account in the wallet snapshot carried by each block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WalletEntry {
    pub address: Vec<u8>,
    pub balance: u64,
}

/// Represents a block in the weave.
///
/// A block is a value: once `indep_hash` has been written by [`Block::seal`]
/// nothing else about it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    /// Distance from genesis; genesis is 0.
    pub height: u64,
    /// Proof-of-work commitment over the parent hash, the committed
    /// transactions and the nonce.
    pub hash: Hash,
    /// Digest of the block serialized with this field cleared.
    pub indep_hash: Option<Hash>,
    /// Independent hash of the parent, `None` for genesis.
    pub previous_block: Option<Hash>,
    /// Opaque bytes found by the miner.
    pub nonce: Vec<u8>,
    /// Identifiers of the transactions included in this block.
    pub txs: Vec<TxId>,
    /// Ancestor independent hashes, newest first, excluding this block.
    pub hash_list: Option<Vec<Hash>>,
    /// Account state as of this block.
    pub wallet_list: Vec<WalletEntry>,
    /// Difficulty in force for this block's proof of work.
    pub diff: u32,
    /// Unix timestamp of the most recent difficulty change on this chain.
    pub last_retarget: i64,
    /// Unix timestamp at which the block was created.
    pub timestamp: i64,
    pub reward_addr: RewardAddr,
}

impl Block {
    /// The independent hash, or `Unsealed` if it was never computed.
    pub fn sealed_hash(&self) -> WeaveResult<Hash> {
        self.indep_hash
            .ok_or(WeaveError::Unsealed { height: self.height })
    }

    /// Computes and stores the independent hash. Called exactly once, right
    /// after the block is assembled.
    pub fn seal<C: Codec>(mut self, codec: &C) -> WeaveResult<Self> {
        self.indep_hash = Some(indep_hash(codec, &self)?);
        Ok(self)
    }

    /// Position (from genesis) of the block this one commits to recalling.
    pub fn recall_index(&self) -> WeaveResult<u64> {
        if self.height == 0 {
            return Ok(0);
        }
        Ok(crypto::decode_unsigned_mod(&self.sealed_hash()?, self.height))
    }

    /// Independent hash of the recall block, looked up in this block's own
    /// hash list. `None` for genesis or when the hash list is not
    /// materialized; a list that does not hold `height` ancestors is an
    /// `IncompleteWeave` error.
    pub fn recall_hash(&self) -> WeaveResult<Option<Hash>> {
        if self.height == 0 {
            return Ok(None);
        }
        let Some(list) = self.hash_list.as_ref() else {
            return Ok(None);
        };
        if list.len() as u64 != self.height {
            return Err(WeaveError::IncompleteWeave {
                needed: self.height + 1,
                available: list.len() as u64 + 1,
            });
        }
        let index = self.recall_index()?;
        Ok(list.iter().rev().nth(index as usize).copied())
    }
}

/// Digest of `block` serialized with its `indep_hash` cleared.
///
/// Always recomputed from a fresh copy so whatever the live record currently
/// stores in `indep_hash` has no influence.
pub fn indep_hash<C: Codec>(codec: &C, block: &Block) -> WeaveResult<Hash> {
    let unsealed = Block {
        indep_hash: None,
        ..block.clone()
    };
    Ok(crypto::hash(&codec.serialize_block(&unsealed)?))
}

/// An element of a weave: either a full block or the independent hash of one
/// that must be fetched from storage before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainElement {
    Materialized(Block),
    Reference(Hash),
}

impl ChainElement {
    pub fn resolve<'a, S: BlockStore>(&'a self, store: &S) -> WeaveResult<Cow<'a, Block>> {
        match self {
            Self::Materialized(block) => Ok(Cow::Borrowed(block)),
            Self::Reference(hash) => store
                .resolve_block(hash)?
                .map(Cow::Owned)
                .ok_or(WeaveError::BlockNotFound(*hash)),
        }
    }

    /// The independent hash without touching storage when it is already known.
    pub fn indep_hash(&self) -> WeaveResult<Hash> {
        match self {
            Self::Materialized(block) => block.sealed_hash(),
            Self::Reference(hash) => Ok(*hash),
        }
    }
}

impl From<Block> for ChainElement {
    fn from(block: Block) -> Self {
        Self::Materialized(block)
    }
}

impl From<Hash> for ChainElement {
    fn from(hash: Hash) -> Self {
        Self::Reference(hash)
    }
}
