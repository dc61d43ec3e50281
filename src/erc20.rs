//! ERC-20 metadata lookup: symbol/decimals for a token address, consumed by
//! subscription callbacks when formatting a notification. Declared as a
//! narrow external-collaborator trait, not implemented against a live chain.

use async_trait::async_trait;
use thiserror::Error;
use web3::types::H160;

#[derive(Error, Debug)]
pub enum Erc20MetadataError {
    #[error("metadata lookup error: {0}")]
    Lookup(String),
}

#[derive(Clone, Debug)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

#[async_trait]
pub trait Erc20Metadata: Send + Sync {
    async fn metadata(&self, token: H160) -> Result<TokenMetadata, Erc20MetadataError>;
}
