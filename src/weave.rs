//! The weave engine: chain construction and consensus checks.
//!
//! A [`Weave`] is an immutable value. Every operation here is a pure function
//! of its inputs plus read-only lookups through the [`BlockStore`], except
//! [`WeaveEngine::append`], which awaits the [`Miner`] when no nonce is given.
//! Callers serialize appends against the same head themselves.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::blockchain::{self, Block, ChainElement, RewardAddr, WalletEntry};
use crate::codec::Codec;
use crate::config::WeaveConfig;
use crate::crypto::{self, Hash};
use crate::error::{WeaveError, WeaveResult};
use crate::genesis;
use crate::mining::{Miner, Retarget};
use crate::storage::BlockStore;
use crate::tx::{self, Transaction};

/// A chain of blocks, stored genesis first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Weave {
    elements: Vec<ChainElement>,
}

impl Weave {
    /// `elements` must be ordered from genesis to head.
    pub fn new(elements: Vec<ChainElement>) -> Self {
        Self { elements }
    }

    /// Rebuilds a weave from a head block with a materialized hash list; its
    /// ancestors become references. The list must hold exactly `height`
    /// ancestors.
    pub fn from_head(head: Block) -> WeaveResult<Self> {
        let ancestors = head.hash_list.as_ref().map_or(0, Vec::len) as u64;
        let hash_list = match head.hash_list.as_ref() {
            Some(list) if ancestors == head.height => list,
            _ => {
                return Err(WeaveError::IncompleteWeave {
                    needed: head.height + 1,
                    available: ancestors + 1,
                })
            }
        };
        let mut elements: Vec<ChainElement> = hash_list
            .iter()
            .rev()
            .map(|hash| ChainElement::Reference(*hash))
            .collect();
        elements.push(ChainElement::Materialized(head));
        Ok(Self { elements })
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn head(&self) -> Option<&ChainElement> {
        self.elements.last()
    }

    /// Elements from genesis to head.
    pub fn elements(&self) -> &[ChainElement] {
        &self.elements
    }

    /// Elements from head to genesis.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &ChainElement> {
        self.elements.iter().rev()
    }

    /// Returns a new weave with `element` as its head.
    pub fn with_head(&self, element: ChainElement) -> Self {
        let mut elements = self.elements.clone();
        elements.push(element);
        Self { elements }
    }
}

/// Caller-supplied parts of a new block.
#[derive(Debug, Clone, Default)]
pub struct BlockTemplate {
    /// Skips mining when set.
    pub nonce: Option<Vec<u8>>,
    /// Defaults to the parent's wallet list.
    pub wallet_list: Option<Vec<WalletEntry>>,
    pub reward_addr: RewardAddr,
}

pub struct WeaveEngine<S, C, M, R> {
    store: S,
    codec: C,
    miner: M,
    retarget: R,
}

impl<S, C, M, R> WeaveEngine<S, C, M, R>
where
    S: BlockStore,
    C: Codec,
    M: Miner,
    R: Retarget,
{
    pub fn new(store: S, codec: C, miner: M, retarget: R) -> Self {
        Self {
            store,
            codec,
            miner,
            retarget,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn miner(&self) -> &M {
        &self.miner
    }

    /// A one-block weave holding a fresh genesis block.
    pub fn init(&self, config: &WeaveConfig) -> WeaveResult<Weave> {
        let genesis = genesis::genesis_block(&self.codec, config)?;
        info!(
            hash = %genesis.sealed_hash()?.short(),
            diff = genesis.diff,
            "initialized weave"
        );
        Ok(Weave::new(vec![ChainElement::Materialized(genesis)]))
    }

    /// Builds, seals and returns the weave extended by a block holding
    /// `new_txs`. Awaits the miner unless `template.nonce` is set.
    pub async fn append(
        &self,
        weave: &Weave,
        new_txs: &[Transaction],
        template: BlockTemplate,
    ) -> WeaveResult<Weave> {
        let head = weave.head().ok_or(WeaveError::EmptyWeave)?;
        let parent = head.resolve(&self.store).map_err(|err| match err {
            WeaveError::BlockNotFound(hash) => WeaveError::UnknownAncestor(hash),
            other => other,
        })?;
        let parent_indep = parent.sealed_hash()?;

        let committed = tx::commit_txs(&self.codec, new_txs)?;
        let nonce = match template.nonce {
            Some(nonce) => nonce,
            None => self.miner.mine(parent.hash, parent.diff, committed).await?,
        };

        let timestamp = Utc::now().timestamp();
        let candidate = Block {
            height: parent.height + 1,
            hash: crypto::block_hash(&parent.hash, &committed, &nonce),
            indep_hash: None,
            previous_block: Some(parent_indep),
            nonce,
            txs: new_txs.iter().map(|tx| tx.id).collect(),
            hash_list: Some(self.hash_list_with_head(&parent, weave)?),
            wallet_list: template
                .wallet_list
                .unwrap_or_else(|| parent.wallet_list.clone()),
            diff: parent.diff,
            last_retarget: parent.last_retarget,
            timestamp,
            reward_addr: template.reward_addr,
        };

        let block = self
            .retarget
            .maybe_retarget(candidate, &parent)
            .seal(&self.codec)?;

        info!(
            height = block.height,
            hash = %block.sealed_hash()?.short(),
            parent = %parent_indep.short(),
            txs = block.txs.len(),
            diff = block.diff,
            "appended block"
        );
        Ok(weave.with_head(ChainElement::Materialized(block)))
    }

    /// Independent hashes of the whole weave, newest first, head included.
    pub fn derive_hash_list(&self, weave: &Weave) -> WeaveResult<Vec<Hash>> {
        let head = weave
            .head()
            .ok_or(WeaveError::EmptyWeave)?
            .resolve(&self.store)?;
        self.hash_list_with_head(&head, weave)
    }

    fn hash_list_with_head(&self, head: &Block, weave: &Weave) -> WeaveResult<Vec<Hash>> {
        if let Some(ancestors) = &head.hash_list {
            let mut list = Vec::with_capacity(ancestors.len() + 1);
            list.push(head.sealed_hash()?);
            list.extend_from_slice(ancestors);
            return Ok(list);
        }

        let needed = head.height + 1;
        let available = weave.len() as u64;
        if available < needed {
            return Err(WeaveError::IncompleteWeave { needed, available });
        }
        weave
            .iter_newest_first()
            .take(needed as usize)
            .map(ChainElement::indep_hash)
            .collect()
    }

    /// Walks the weave from head to genesis checking every proof-of-work
    /// link. Invalid chains yield `Ok(false)`; only unresolvable elements
    /// are errors.
    pub fn verify(&self, weave: &Weave) -> WeaveResult<bool> {
        let mut elements = weave.iter_newest_first();
        let Some(head) = elements.next() else {
            warn!("refusing to verify an empty weave");
            return Ok(false);
        };

        let mut block = head.resolve(&self.store)?;
        for element in elements {
            let parent = element.resolve(&self.store)?;
            if !self.verify_link(&block, &parent)? {
                return Ok(false);
            }
            block = parent;
        }

        if block.height != 0 {
            warn!(height = block.height, "weave does not end at genesis");
            return Ok(false);
        }
        Ok(true)
    }

    fn verify_link(&self, block: &Block, parent: &Block) -> WeaveResult<bool> {
        let committed = tx::commit_block_txs(&self.codec, &self.store, block)?;
        let expected = crypto::block_hash(&parent.hash, &committed, &block.nonce);
        if block.hash != expected {
            warn!(
                height = block.height,
                stored = %block.hash.short(),
                expected = %expected.short(),
                "proof-of-work link mismatch"
            );
            return Ok(false);
        }
        debug!(height = block.height, "verified link");
        Ok(true)
    }

    /// Checks that `block` sits at its claimed height in `hash_list`
    /// (newest first, so the position is counted from the tail).
    pub fn verify_position(&self, block: &Block, hash_list: &[Hash]) -> WeaveResult<bool> {
        if block.height == 0 {
            return Ok(hash_list.is_empty());
        }
        let expected = blockchain::indep_hash(&self.codec, block)?;
        Ok(hash_list.iter().rev().nth(block.height as usize) == Some(&expected))
    }

    /// Fetches the block `block` commits to recalling. `None` for genesis or
    /// when `block` carries no hash list.
    pub fn recall_block(&self, block: &Block) -> WeaveResult<Option<Block>> {
        let Some(hash) = block.recall_hash()? else {
            return Ok(None);
        };
        let recalled = self
            .store
            .resolve_block(&hash)?
            .ok_or(WeaveError::BlockNotFound(hash))?;
        Ok(Some(recalled))
    }
}
