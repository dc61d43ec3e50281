//! Durable "last processed head" persistence (C2).
//!
//! Treated by the rest of the pipeline purely through the [`HeadStore`]
//! trait; §4.2/§6 name it an external collaborator, so the two concrete
//! implementations here are conveniences rather than the contract itself.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use web3::types::H256;

use crate::error::HeadStoreError;

const HEAD_KEY_SUFFIX: &str = "syncBlockMetadata";

#[async_trait]
pub trait HeadStore: Send + Sync {
    /// Returns `None` if this store has never had a head set for `prefix`.
    async fn get_head(&self, prefix: &str) -> Result<Option<H256>, HeadStoreError>;

    /// Durable before returning.
    async fn set_head(&self, prefix: &str, hash: H256) -> Result<(), HeadStoreError>;
}

fn key_for(prefix: &str) -> String {
    format!("{prefix}:{HEAD_KEY_SUFFIX}")
}

/// In-memory store, used in tests and as a fallback when no embedded
/// database is configured.
#[derive(Default)]
pub struct MemoryHeadStore {
    heads: Mutex<HashMap<String, H256>>,
}

impl MemoryHeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeadStore for MemoryHeadStore {
    async fn get_head(&self, prefix: &str) -> Result<Option<H256>, HeadStoreError> {
        Ok(self.heads.lock().unwrap().get(&key_for(prefix)).copied())
    }

    async fn set_head(&self, prefix: &str, hash: H256) -> Result<(), HeadStoreError> {
        self.heads.lock().unwrap().insert(key_for(prefix), hash);
        Ok(())
    }
}

/// Embedded-database backed store, keyed by `<prefix>:syncBlockMetadata`,
/// storing the hex-encoded 32-byte hash as the value (per §6's persisted
/// state layout).
pub struct SledHeadStore {
    db: sled::Db,
}

impl SledHeadStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, HeadStoreError> {
        Ok(Self { db: sled::open(path)? })
    }
}

#[async_trait]
impl HeadStore for SledHeadStore {
    async fn get_head(&self, prefix: &str) -> Result<Option<H256>, HeadStoreError> {
        let key = key_for(prefix);
        let Some(value) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let decoded = hex::decode(value.as_ref())?;
        Ok(Some(H256::from_slice(&decoded)))
    }

    async fn set_head(&self, prefix: &str, hash: H256) -> Result<(), HeadStoreError> {
        let key = key_for(prefix);
        self.db.insert(key.as_bytes(), hex::encode(hash.as_bytes()).as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}
