use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::blockchain::WalletEntry;
use crate::error::WeaveResult;

/// Difficulty of the genesis block unless configured otherwise.
pub const DEFAULT_DIFFICULTY: u32 = 8;

/// Genesis parameters passed to [`crate::weave::WeaveEngine::init`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeaveConfig {
    #[serde(default = "default_difficulty")]
    pub default_difficulty: u32,
    #[serde(default)]
    pub genesis_wallets: Vec<WalletEntry>,
}

fn default_difficulty() -> u32 {
    DEFAULT_DIFFICULTY
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            default_difficulty: default_difficulty(),
            genesis_wallets: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetargetConfig {
    pub blocks_per_retarget: u64,
    pub target_block_secs: i64,
}

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            blocks_per_retarget: 10,
            target_block_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub weave: WeaveConfig,
    pub retarget: RetargetConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chain_db"),
            poll_interval_ms: 1_000,
            weave: WeaveConfig::default(),
            retarget: RetargetConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Layers built-in defaults, an optional config file, then `WEAVE__*`
    /// environment variables (e.g. `WEAVE__WEAVE__DEFAULT_DIFFICULTY=12`).
    pub fn load(path: Option<&Path>) -> WeaveResult<Self> {
        let defaults = Config::try_from(&NodeConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("WEAVE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
