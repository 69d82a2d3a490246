use thiserror::Error;

use crate::crypto::Hash;

#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("unknown ancestor {0}")]
    UnknownAncestor(Hash),
    #[error("block {0} not found")]
    BlockNotFound(Hash),
    #[error("weave is empty")]
    EmptyWeave,
    #[error("incomplete weave: need {needed} elements, have {available}")]
    IncompleteWeave { needed: u64, available: u64 },
    #[error("block at height {height} has no independent hash")]
    Unsealed { height: u64 },
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("mining failed: {0}")]
    Mining(String),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type WeaveResult<T> = Result<T, WeaveError>;
