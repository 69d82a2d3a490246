//! A proof-of-access block weave.
//!
//! Each block chains to its parent through a proof-of-work hash and commits
//! to a pseudo-randomly chosen earlier block (its recall block) through its
//! independent hash. This crate builds blocks, derives hash lists and recall
//! positions, and verifies candidate chains. Mining, storage, retargeting and
//! peer access are collaborators behind traits.

pub mod blockchain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod genesis;
pub mod mining;
pub mod poller;
pub mod storage;
pub mod tx;
pub mod weave;

pub use blockchain::{indep_hash, Block, ChainElement, RewardAddr, WalletEntry};
pub use codec::{BincodeCodec, Codec};
pub use config::{NodeConfig, RetargetConfig, WeaveConfig, DEFAULT_DIFFICULTY};
pub use crypto::{block_hash, Hash};
pub use error::{WeaveError, WeaveResult};
pub use mining::{FixedDifficulty, FixedNonce, HashMiner, IntervalRetarget, Miner, Retarget};
pub use poller::{PeerClient, PeerSet, Poller, PollerHandle, RemoteUpdate};
pub use storage::{BlockStore, MemoryStore, SledStore};
pub use tx::{commit_block_txs, commit_txs, Transaction, TxId};
pub use weave::{BlockTemplate, Weave, WeaveEngine};
