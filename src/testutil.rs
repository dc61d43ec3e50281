//! In-process fakes for `ChainSource`, used across unit and integration
//! tests instead of driving live RPC.
#![cfg(test)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use web3::types::H256;

use crate::{
    chain_source::{ChainSource, NewHeadSubscription},
    error::ChainSourceError,
    subscription::Subscription,
    types::{BlockHeader, Log, SubscriptionKey},
};

pub fn hash_of(n: u64) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    H256::from(bytes)
}

/// A linear chain `0..=tip`, plus whatever forked headers tests `insert`.
/// Per-block logs can be attached with `set_logs`.
pub struct FakeChainSource {
    headers_by_number: Mutex<HashMap<u64, BlockHeader>>,
    headers_by_hash: Mutex<HashMap<H256, BlockHeader>>,
    logs: Mutex<HashMap<H256, Vec<Log>>>,
    tip: Mutex<u64>,
    logs_for_block_calls: AtomicUsize,
}

impl FakeChainSource {
    pub fn linear(tip: u64) -> Self {
        let mut by_number = HashMap::new();
        let mut by_hash = HashMap::new();
        for n in 0..=tip {
            let header = BlockHeader { hash: hash_of(n), parent_hash: hash_of(n.wrapping_sub(1)), number: n };
            by_number.insert(n, header.clone());
            by_hash.insert(header.hash, header);
        }
        Self {
            headers_by_number: Mutex::new(by_number),
            headers_by_hash: Mutex::new(by_hash),
            logs: Mutex::new(HashMap::new()),
            tip: Mutex::new(tip),
            logs_for_block_calls: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, header: BlockHeader) {
        self.headers_by_number.lock().unwrap().insert(header.number, header.clone());
        self.headers_by_hash.lock().unwrap().insert(header.hash, header);
    }

    pub fn set_logs(&self, hash: H256, logs: Vec<Log>) {
        self.logs.lock().unwrap().insert(hash, logs);
    }

    pub fn set_tip(&self, tip: u64) {
        *self.tip.lock().unwrap() = tip;
    }

    pub fn logs_for_block_call_count(&self) -> usize {
        self.logs_for_block_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSource for FakeChainSource {
    async fn latest_block_number(&self) -> Result<u64, ChainSourceError> {
        Ok(*self.tip.lock().unwrap())
    }

    async fn header_by_number(&self, number: u64) -> Result<BlockHeader, ChainSourceError> {
        self.headers_by_number
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or(ChainSourceError::NotFound(hash_of(number)))
    }

    async fn header_by_hash(&self, hash: H256) -> Result<BlockHeader, ChainSourceError> {
        self.headers_by_hash.lock().unwrap().get(&hash).cloned().ok_or(ChainSourceError::NotFound(hash))
    }

    async fn logs_for_block(&self, hash: H256) -> Result<Vec<Log>, ChainSourceError> {
        self.logs_for_block_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.logs.lock().unwrap().get(&hash).cloned().unwrap_or_default())
    }

    async fn subscribe_new_heads(&self) -> Result<NewHeadSubscription, ChainSourceError> {
        unimplemented!("live subscription is exercised via handle_new_block directly in tests")
    }
}

/// A subscription that records every log it's invoked with, for assertions.
pub struct RecordingSubscription {
    pub key: SubscriptionKey,
    pub received: Arc<Mutex<Vec<Log>>>,
}

impl RecordingSubscription {
    pub fn new(key: SubscriptionKey) -> (Box<dyn Subscription>, Arc<Mutex<Vec<Log>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        (Box::new(Self { key, received: received.clone() }), received)
    }
}

impl Subscription for RecordingSubscription {
    fn key(&self) -> SubscriptionKey {
        self.key
    }

    fn callback(&self, log: &Log) {
        self.received.lock().unwrap().push(log.clone());
    }
}
