//! Core data model: the chain-agnostic records the pipeline moves around.
//!
//! These are intentionally decoupled from `web3`'s wire types: a
//! [`ChainSource`](crate::chain_source::ChainSource) implementation is
//! responsible for converting whatever the RPC client hands back into these.

use web3::types::{H160, H256};

/// Hash of the empty/absent block, used as the "no superseded block" sentinel.
pub fn zero_hash() -> H256 {
    H256::zero()
}

/// A block header, identified by its hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub hash: H256,
    pub parent_hash: H256,
    pub number: u64,
}

/// A single log emitted by a transaction within a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log {
    pub block_hash: H256,
    pub tx_hash: H256,
    pub log_index: u64,
    pub tx_index: u64,
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub removed: bool,
}

impl Log {
    /// Canonical identity: unique for a log on a given canonical chain.
    pub fn canonical_id(&self) -> (H256, u64) {
        (self.block_hash, self.log_index)
    }

    /// Deterministic byte encoding of the whole record, used as the dedup
    /// filter's fingerprint. Not meant to be parsed back; only compared.
    pub fn fingerprint(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 32 + 8 + 20 + self.topics.len() * 32 + self.data.len() + 1);
        buf.extend_from_slice(self.block_hash.as_bytes());
        buf.extend_from_slice(self.tx_hash.as_bytes());
        buf.extend_from_slice(&self.log_index.to_be_bytes());
        buf.extend_from_slice(self.address.as_bytes());
        for topic in &self.topics {
            buf.extend_from_slice(topic.as_bytes());
        }
        buf.extend_from_slice(&self.data);
        buf.push(u8::from(self.removed));
        buf
    }
}

/// A block along with the logs it produced, ready for dispatch.
///
/// `reorged_block_hash` is the zero hash for a forward-live block, and the
/// hash of the block this one supersedes at the same height during reorg
/// replay (see [`crate::block_keeper::BlockKeeper::compute_reorg_chain`]).
#[derive(Clone, Debug)]
pub struct NewBlock {
    pub header: BlockHeader,
    pub logs: Vec<Log>,
    pub reorged_block_hash: H256,
}

impl NewBlock {
    pub fn is_reorg_replay(&self) -> bool {
        self.reorged_block_hash != zero_hash()
    }
}

/// Key identifying a subscription: a contract address and an event topic hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionKey {
    pub address: H160,
    pub topic0: H256,
}

impl SubscriptionKey {
    pub fn new(address: H160, topic0: H256) -> Self {
        Self { address, topic0 }
    }

    pub fn of_log(log: &Log) -> Option<Self> {
        log.topics.first().map(|topic0| Self::new(log.address, *topic0))
    }
}
