//! Owns the current head, the ring buffer, and the block-number → hash map
//! (C4): resolves or initializes the head on construction, then serves
//! reorg-ancestor-chain computation against the trait-based
//! `ChainSource`/`HeadStore` collaborators.

use std::collections::HashMap;

use futures::future::try_join_all;
use tracing::{info, warn};
use web3::types::H256;

use crate::{
    chain_source::ChainSource,
    error::BlockKeeperError,
    head_store::HeadStore,
    ring_buffer::RingBuffer,
    types::{zero_hash, BlockHeader},
};

/// Default ring buffer capacity: two epochs of blocks (§3).
pub const DEFAULT_RING_CAPACITY: usize = 64;
/// Batch size for the ring-buffer backfill on construction (§4.4).
const BACKFILL_BATCH_SIZE: u64 = 10;

pub struct BlockKeeper<'a> {
    source: &'a dyn ChainSource,
    head_store: &'a dyn HeadStore,
    prefix: String,
    head: Option<BlockHeader>,
    ring: RingBuffer,
    by_number: HashMap<u64, H256>,
}

impl<'a> BlockKeeper<'a> {
    /// Runs the full construction protocol from §4.4: resolve or initialize
    /// the head, then backfill the ring buffer so it ends full at `head`.
    pub async fn bootstrap(
        source: &'a dyn ChainSource,
        head_store: &'a dyn HeadStore,
        prefix: impl Into<String>,
        ring_capacity: usize,
    ) -> Result<BlockKeeper<'a>, BlockKeeperError> {
        let prefix = prefix.into();
        let mut ring = RingBuffer::new(ring_capacity);
        let mut by_number = HashMap::new();

        let head = match head_store.get_head(&prefix).await? {
            Some(hash) => source.header_by_hash(hash).await?,
            None => {
                let tip_number = source.latest_block_number().await?;
                let tip = source.header_by_number(tip_number).await?;
                head_store.set_head(&prefix, tip.hash).await?;
                tip
            }
        };

        if ring_capacity > 0 && head.number > 0 {
            let from = head.number.saturating_sub(ring_capacity as u64 - 1);
            let to = head.number.saturating_sub(1);
            let mut number = from;
            while number <= to {
                let batch_end = (number + BACKFILL_BATCH_SIZE - 1).min(to);
                let fetches = (number..=batch_end).map(|n| source.header_by_number(n));
                let headers = try_join_all(fetches).await?;
                for header in headers {
                    ring.enqueue(header.hash);
                    by_number.insert(header.number, header.hash);
                }
                number = batch_end + 1;
            }
        }
        ring.enqueue(head.hash);
        by_number.insert(head.number, head.hash);

        info!(number = head.number, hash = ?head.hash, ring_size = ring.len(), "block keeper bootstrapped");

        Ok(Self { source, head_store, prefix, head: Some(head), ring, by_number })
    }

    pub fn head(&self) -> Option<&BlockHeader> {
        self.head.as_ref()
    }

    pub fn contains(&self, header: &BlockHeader) -> bool {
        self.ring.contains(&header.hash)
    }

    /// Replaces the current head, updates the ring and the by-number map,
    /// and persists the new head. A store write failure is logged but does
    /// not roll back the in-memory change (§4.4: best effort).
    pub async fn set_head(&mut self, header: BlockHeader, superseded_hash: H256) {
        if superseded_hash != zero_hash() {
            self.ring.remove_and_enqueue(header.hash, superseded_hash);
        } else {
            self.ring.enqueue(header.hash);
        }
        self.by_number.insert(header.number, header.hash);

        if let Err(err) = self.head_store.set_head(&self.prefix, header.hash).await {
            warn!(?err, number = header.number, "failed to persist head, keeping in-memory change");
        }
        self.head = Some(header);
    }

    /// Walks ancestors of `new_header` back to the ring, returning the
    /// ancestor chain (ascending by block number) and the per-slot
    /// superseded hashes (§4.4).
    pub async fn compute_reorg_chain(
        &self,
        new_header: &BlockHeader,
    ) -> Result<(Vec<BlockHeader>, Vec<H256>), BlockKeeperError> {
        let Some(head) = &self.head else {
            return Ok((Vec::new(), Vec::new()));
        };
        if new_header.parent_hash == zero_hash() || new_header.parent_hash == head.hash {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut headers = Vec::new();
        let mut superseded = Vec::new();
        let mut parent = new_header.parent_hash;

        loop {
            if self.ring.contains(&parent) {
                break;
            }
            if headers.len() >= self.ring.capacity() {
                return Err(BlockKeeperError::ReorgOverflow { capacity: self.ring.capacity() });
            }
            let block = self.source.header_by_hash(parent).await?;
            let superseded_hash = self.by_number.get(&block.number).copied().unwrap_or_else(zero_hash);
            parent = block.parent_hash;
            headers.push(block);
            superseded.push(superseded_hash);
        }

        let mut paired: Vec<_> = headers.into_iter().zip(superseded).collect();
        paired.sort_by_key(|(header, _)| header.number);
        let (headers, superseded) = paired.into_iter().unzip();
        Ok((headers, superseded))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::*;
    use crate::{head_store::MemoryHeadStore, testutil::{hash_of, FakeChainSource}};

    #[tokio::test]
    #[traced_test]
    async fn cold_start_initializes_head_store_and_fills_ring() {
        let source = FakeChainSource::linear(1000);
        let store = MemoryHeadStore::new();
        let keeper = BlockKeeper::bootstrap(&source, &store, "net:l1", 64).await.unwrap();

        assert_eq!(keeper.head().unwrap().number, 1000);
        assert_eq!(store.get_head("net:l1").await.unwrap(), Some(hash_of(1000)));
        assert!(logs_contain("block keeper bootstrapped"));
        assert!(keeper.contains(&BlockHeader { hash: hash_of(1000), parent_hash: hash_of(999), number: 1000 }));
        assert!(keeper.contains(&BlockHeader { hash: hash_of(937), parent_hash: hash_of(936), number: 937 }));
        assert!(!keeper.contains(&BlockHeader { hash: hash_of(936), parent_hash: hash_of(935), number: 936 }));
    }

    #[tokio::test]
    async fn warm_start_resolves_persisted_head() {
        let source = FakeChainSource::linear(1000);
        let store = MemoryHeadStore::new();
        store.set_head("net:l1", hash_of(995)).await.unwrap();

        let keeper = BlockKeeper::bootstrap(&source, &store, "net:l1", 64).await.unwrap();
        assert_eq!(keeper.head().unwrap().number, 995);
    }

    #[tokio::test]
    async fn no_reorg_when_parent_matches_head() {
        let source = FakeChainSource::linear(10);
        let store = MemoryHeadStore::new();
        store.set_head("net:l1", hash_of(5)).await.unwrap();
        let keeper = BlockKeeper::bootstrap(&source, &store, "net:l1", 8).await.unwrap();

        let new_header = BlockHeader { hash: hash_of(6), parent_hash: hash_of(5), number: 6 };
        let (reorg, superseded) = keeper.compute_reorg_chain(&new_header).await.unwrap();
        assert!(reorg.is_empty());
        assert!(superseded.is_empty());
    }

    #[tokio::test]
    async fn reorg_depth_two_returns_ascending_ancestor_chain() {
        let source = FakeChainSource::linear(1000);
        // Replace 1001 with a sibling sharing parent 1000.
        let h1001a = hash_of(1001);
        let h1001b = {
            let mut b = [0u8; 32];
            b[0] = 0xFF;
            b[24..].copy_from_slice(&1001u64.to_be_bytes());
            H256::from(b)
        };
        source.insert(BlockHeader { hash: h1001a, parent_hash: hash_of(1000), number: 1001 });

        let store = MemoryHeadStore::new();
        store.set_head("net:l1", h1001a).await.unwrap();
        let mut keeper = BlockKeeper::bootstrap(&source, &store, "net:l1", 64).await.unwrap();
        assert_eq!(keeper.head().unwrap().hash, h1001a);

        source.insert(BlockHeader { hash: h1001b, parent_hash: hash_of(1000), number: 1001 });
        let h1002 = {
            let mut b = [0u8; 32];
            b[0] = 0xFF;
            b[24..].copy_from_slice(&1002u64.to_be_bytes());
            H256::from(b)
        };
        let new_head = BlockHeader { hash: h1002, parent_hash: h1001b, number: 1002 };

        let (reorg, superseded) = keeper.compute_reorg_chain(&new_head).await.unwrap();
        assert_eq!(reorg.len(), 1);
        assert_eq!(reorg[0].hash, h1001b);
        assert_eq!(superseded, vec![h1001a]);

        keeper.set_head(reorg[0].clone(), superseded[0]).await;
        keeper.set_head(new_head.clone(), zero_hash()).await;

        assert!(!keeper.contains(&BlockHeader { hash: h1001a, parent_hash: hash_of(1000), number: 1001 }));
        assert!(keeper.contains(&BlockHeader { hash: h1001b, parent_hash: hash_of(1000), number: 1001 }));
        assert_eq!(store.get_head("net:l1").await.unwrap(), Some(h1002));
    }

    #[tokio::test]
    async fn reorg_walk_beyond_ring_capacity_is_fatal() {
        let source = FakeChainSource::linear(100);
        let store = MemoryHeadStore::new();
        store.set_head("net:l1", hash_of(50)).await.unwrap();
        let keeper = BlockKeeper::bootstrap(&source, &store, "net:l1", 4).await.unwrap();

        // A rogue branch of 20 blocks whose ancestry never meets the tiny
        // ring (it shares no hash with the linear chain at all).
        fn rogue_hash(n: u64) -> H256 {
            let mut bytes = [0xEE; 32];
            bytes[24..].copy_from_slice(&n.to_be_bytes());
            H256::from(bytes)
        }
        for n in 1..=20u64 {
            source.insert(BlockHeader { hash: rogue_hash(n), parent_hash: rogue_hash(n - 1), number: n });
        }
        let new_head = BlockHeader { hash: rogue_hash(21), parent_hash: rogue_hash(20), number: 21 };

        let result = keeper.compute_reorg_chain(&new_head).await;
        assert!(matches!(result, Err(BlockKeeperError::ReorgOverflow { .. })));
    }
}
