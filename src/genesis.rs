use chrono::Utc;
use rand::Rng;

use crate::blockchain::{Block, RewardAddr};
use crate::codec::Codec;
use crate::config::WeaveConfig;
use crate::crypto::Hash;
use crate::error::WeaveResult;

/// Builds the sealed zero-height block.
///
/// Genesis carries no proof of work, so `hash` and `nonce` are random.
pub fn genesis_block<C: Codec>(codec: &C, config: &WeaveConfig) -> WeaveResult<Block> {
    let now = Utc::now().timestamp();
    let mut rng = rand::thread_rng();
    let block = Block {
        height: 0,
        hash: Hash(rng.gen()),
        indep_hash: None,
        previous_block: None,
        nonce: rng.gen::<[u8; 32]>().to_vec(),
        txs: Vec::new(),
        hash_list: Some(Vec::new()),
        wallet_list: config.genesis_wallets.clone(),
        diff: config.default_difficulty,
        last_retarget: now,
        timestamp: now,
        reward_addr: RewardAddr::Unclaimed,
    };
    block.seal(codec)
}
