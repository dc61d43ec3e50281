//! Layered error types, one enum per component, wired together with
//! `thiserror`'s `#[from]` to thread `web3::Error` and friends up through a
//! small set of component-scoped `Error` enums.

use thiserror::Error;
use web3::types::H256;

#[derive(Error, Debug)]
pub enum ChainSourceError {
    #[error("transport error")]
    Transport(#[from] web3::Error),
    #[error("request timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error("block {0:?} not found")]
    NotFound(H256),
    #[error("header is missing its hash or number")]
    IncompleteHeader,
    #[error("new-head subscription stream ended")]
    EndOfStream,
}

#[derive(Error, Debug)]
pub enum HeadStoreError {
    #[error("head store I/O error")]
    Io(#[from] sled::Error),
    #[error("stored head hash is not valid hex")]
    InvalidEncoding(#[from] hex::FromHexError),
}

#[derive(Error, Debug)]
pub enum BlockKeeperError {
    #[error(transparent)]
    ChainSource(#[from] ChainSourceError),
    #[error(transparent)]
    HeadStore(#[from] HeadStoreError),
    #[error("chain gap exceeds ring buffer capacity of {capacity} during reorg walk")]
    ReorgOverflow { capacity: usize },
    #[error("head store has no persisted head and the chain tip could not be resolved")]
    NoTip,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    ChainSource(#[from] ChainSourceError),
    #[error(transparent)]
    BlockKeeper(#[from] BlockKeeperError),
    #[error(transparent)]
    HeadStore(#[from] HeadStoreError),
}
