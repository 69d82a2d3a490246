//! Canonical byte encodings used for hashing.
//!
//! The engine only requires that an encoding be deterministic. `BincodeCodec`
//! is the default: fixed-width little-endian integers, length-prefixed
//! sequences, fields in declaration order.

use crate::blockchain::Block;
use crate::error::WeaveResult;
use crate::tx::Transaction;

/// Deterministic encoder for the records that feed consensus digests.
pub trait Codec {
    fn encode_tx(&self, tx: &Transaction) -> WeaveResult<Vec<u8>>;

    /// Only used to compute independent hashes.
    fn serialize_block(&self, block: &Block) -> WeaveResult<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode_tx(&self, tx: &Transaction) -> WeaveResult<Vec<u8>> {
        Ok(bincode::serialize(tx)?)
    }

    fn serialize_block(&self, block: &Block) -> WeaveResult<Vec<u8>> {
        Ok(bincode::serialize(block)?)
    }
}
