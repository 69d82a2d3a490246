//! Collaborators invoked while appending a block: the nonce search and the
//! difficulty retarget policy.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use crate::blockchain::Block;
use crate::config::RetargetConfig;
use crate::crypto::{self, Hash};
use crate::error::{WeaveError, WeaveResult};

/// Finds a nonce for a block built on `prev_hash`. May take unbounded time.
pub trait Miner {
    fn mine(
        &self,
        prev_hash: Hash,
        diff: u32,
        committed_txs: Hash,
    ) -> impl Future<Output = WeaveResult<Vec<u8>>> + Send;
}

/// Returns the same nonce every time, without any search.
#[derive(Debug, Clone, Default)]
pub struct FixedNonce(pub Vec<u8>);

impl Miner for FixedNonce {
    async fn mine(&self, _prev_hash: Hash, _diff: u32, _committed_txs: Hash) -> WeaveResult<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Random-nonce search for a block hash with at least `diff` leading zero
/// bits. The search runs on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct HashMiner {
    stop: Arc<AtomicBool>,
}

impl HashMiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts any search in progress and every later one.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

pub fn meets_difficulty(hash: &Hash, diff: u32) -> bool {
    hash.leading_zero_bits() >= diff
}

impl Miner for HashMiner {
    async fn mine(&self, prev_hash: Hash, diff: u32, committed_txs: Hash) -> WeaveResult<Vec<u8>> {
        let stop = Arc::clone(&self.stop);
        debug!(prev = %prev_hash.short(), diff, "starting nonce search");
        let found = tokio::task::spawn_blocking(move || {
            let mut rng = rand::thread_rng();
            let mut attempts: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                attempts += 1;
                let nonce: [u8; 32] = rng.gen();
                let candidate = crypto::block_hash(&prev_hash, &committed_txs, &nonce);
                if meets_difficulty(&candidate, diff) {
                    return Some((nonce.to_vec(), attempts));
                }
            }
            None
        })
        .await
        .map_err(|err| WeaveError::Mining(err.to_string()))?;

        match found {
            Some((nonce, attempts)) => {
                debug!(attempts, diff, "nonce found");
                Ok(nonce)
            }
            None => Err(WeaveError::Mining("search stopped".into())),
        }
    }
}

/// Difficulty policy applied to every freshly built block.
pub trait Retarget {
    /// May rewrite `diff` and `last_retarget` on `candidate`.
    fn maybe_retarget(&self, candidate: Block, parent: &Block) -> Block;
}

/// Never changes difficulty.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDifficulty;

impl Retarget for FixedDifficulty {
    fn maybe_retarget(&self, candidate: Block, _parent: &Block) -> Block {
        candidate
    }
}

/// Every `blocks_per_retarget` heights, compares the time taken since the
/// last retarget with the target and nudges difficulty by one bit.
#[derive(Debug, Clone)]
pub struct IntervalRetarget {
    config: RetargetConfig,
}

impl IntervalRetarget {
    pub fn new(config: RetargetConfig) -> Self {
        Self { config }
    }
}

impl Retarget for IntervalRetarget {
    fn maybe_retarget(&self, mut candidate: Block, parent: &Block) -> Block {
        let every = self.config.blocks_per_retarget.max(1);
        if candidate.height % every != 0 {
            return candidate;
        }

        let elapsed = candidate.timestamp.saturating_sub(parent.last_retarget);
        let target = i64::try_from(every)
            .unwrap_or(i64::MAX)
            .saturating_mul(self.config.target_block_secs);
        let diff = if elapsed < target {
            candidate.diff.saturating_add(1)
        } else if elapsed > target.saturating_mul(2) {
            candidate.diff.saturating_sub(1).max(1)
        } else {
            candidate.diff
        };

        if diff != candidate.diff {
            info!(
                height = candidate.height,
                from = candidate.diff,
                to = diff,
                elapsed,
                target,
                "retargeting difficulty"
            );
        }
        candidate.diff = diff;
        candidate.last_retarget = candidate.timestamp;
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(last_retarget: i64) -> Block {
        Block {
            height: 9,
            diff: 8,
            last_retarget,
            timestamp: last_retarget,
            ..Block::default()
        }
    }

    fn candidate(height: u64, timestamp: i64) -> Block {
        Block {
            height,
            diff: 8,
            last_retarget: 1_000,
            timestamp,
            ..Block::default()
        }
    }

    fn policy() -> IntervalRetarget {
        IntervalRetarget::new(RetargetConfig {
            blocks_per_retarget: 10,
            target_block_secs: 120,
        })
    }

    #[test]
    fn test_no_retarget_between_intervals() {
        let out = policy().maybe_retarget(candidate(7, 1_001), &parent(1_000));
        assert_eq!(out.diff, 8);
        assert_eq!(out.last_retarget, 1_000);
    }

    #[test]
    fn test_fast_blocks_raise_difficulty() {
        let out = policy().maybe_retarget(candidate(10, 1_100), &parent(1_000));
        assert_eq!(out.diff, 9);
        assert_eq!(out.last_retarget, 1_100);
    }

    #[test]
    fn test_slow_blocks_lower_difficulty() {
        let out = policy().maybe_retarget(candidate(20, 1_000 + 3_000), &parent(1_000));
        assert_eq!(out.diff, 7);
        assert_eq!(out.last_retarget, 4_000);
    }

    #[test]
    fn test_on_target_keeps_difficulty_but_resets_clock() {
        let out = policy().maybe_retarget(candidate(10, 1_000 + 1_500), &parent(1_000));
        assert_eq!(out.diff, 8);
        assert_eq!(out.last_retarget, 2_500);
    }

    #[test]
    fn test_extreme_config_saturates() {
        let policy = IntervalRetarget::new(RetargetConfig {
            blocks_per_retarget: u64::MAX,
            target_block_secs: i64::MAX,
        });
        let out = policy.maybe_retarget(candidate(0, i64::MIN), &parent(i64::MAX));
        assert_eq!(out.diff, 9);
        assert_eq!(out.last_retarget, i64::MIN);

        let policy = IntervalRetarget::new(RetargetConfig {
            blocks_per_retarget: 1,
            target_block_secs: i64::MIN,
        });
        let out = policy.maybe_retarget(candidate(5, i64::MAX), &parent(i64::MIN));
        assert_eq!(out.diff, 7);
    }

    #[test]
    fn test_fixed_difficulty_is_identity() {
        let c = candidate(10, 1_100);
        assert_eq!(FixedDifficulty.maybe_retarget(c.clone(), &parent(1_000)), c);
    }

    #[tokio::test]
    async fn test_hash_miner_meets_difficulty() {
        let prev = crypto::hash(b"prev");
        let txs = crypto::hash(b"txs");
        let nonce = HashMiner::new().mine(prev, 6, txs).await.unwrap();
        assert!(meets_difficulty(&crypto::block_hash(&prev, &txs, &nonce), 6));
    }

    #[tokio::test]
    async fn test_stopped_hash_miner_fails() {
        let miner = HashMiner::new();
        miner.stop();
        let err = miner
            .mine(crypto::hash(b"p"), 255, crypto::hash(b"t"))
            .await
            .unwrap_err();
        assert!(matches!(err, WeaveError::Mining(_)));
    }

    #[tokio::test]
    async fn test_fixed_nonce() {
        let nonce = FixedNonce(b"abc".to_vec())
            .mine(Hash::default(), 100, Hash::default())
            .await
            .unwrap();
        assert_eq!(nonce, b"abc".to_vec());
    }
}
