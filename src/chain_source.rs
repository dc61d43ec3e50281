//! Thin facade over the JSON-RPC endpoint pair (C1): HTTP for request/response
//! calls, WebSocket for the new-head subscription stream, behind a trait so
//! the Event Service can be driven against a fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::{future::try_join_all, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use url::Url;
use web3::{
    api::{EthSubscribe, Namespace},
    transports::{Http, WebSocket},
    types::{Block, BlockId, BlockNumber, FilterBuilder, H256},
    Web3,
};

use crate::{
    error::ChainSourceError,
    statistics,
    types::{BlockHeader, Log, NewBlock},
};

/// Timeout on any single non-streaming RPC call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Retries for `logs_for_block` on transient transport errors.
const LOGS_RETRIES: usize = 3;
/// Fixed back-off between `logs_for_block` retries.
const LOGS_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Bound on the channel feeding translated new heads to subscribers.
const NEW_HEAD_CHANNEL_CAPACITY: usize = 64;

/// A live new-heads subscription: a stream of headers plus a one-shot signal
/// for fatal termination. The background forwarder task is the subscription's
/// single producer and closes both on exit.
pub struct NewHeadSubscription {
    pub headers: mpsc::Receiver<BlockHeader>,
    pub terminated: oneshot::Receiver<ChainSourceError>,
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, ChainSourceError>;

    async fn header_by_number(&self, number: u64) -> Result<BlockHeader, ChainSourceError>;

    async fn header_by_hash(&self, hash: H256) -> Result<BlockHeader, ChainSourceError>;

    /// Ordered by `(tx_index, log_index)`. Retries up to 3x with fixed
    /// back-off on transient transport errors.
    async fn logs_for_block(&self, hash: H256) -> Result<Vec<Log>, ChainSourceError>;

    async fn subscribe_new_heads(&self) -> Result<NewHeadSubscription, ChainSourceError>;

    /// Fetches headers (and optionally logs) for `from..=to` in parallel.
    /// Atomic: any sub-fetch failing fails the whole batch.
    async fn fetch_blocks(&self, from: u64, to: u64, with_logs: bool) -> Result<Vec<NewBlock>, ChainSourceError> {
        let fetches = (from..=to).map(|number| async move {
            let header = self.header_by_number(number).await?;
            let logs = if with_logs {
                self.logs_for_block(header.hash).await?
            } else {
                Vec::new()
            };
            Ok::<_, ChainSourceError>(NewBlock {
                header,
                logs,
                reorged_block_hash: crate::types::zero_hash(),
            })
        });
        try_join_all(fetches).await
    }
}

pub struct Web3ChainSource {
    http: Web3<Http>,
    ws: Web3<WebSocket>,
}

impl Web3ChainSource {
    pub async fn connect(http_url: &Url, ws_url: &Url) -> Result<Self, ChainSourceError> {
        let http_transport = Http::new(http_url.as_str())?;
        let ws_transport = WebSocket::new(ws_url.as_str()).await?;
        let source = Self {
            http: Web3::new(http_transport),
            ws: Web3::new(ws_transport),
        };
        // Round-trip a cheap call to fail fast on a bad endpoint.
        let _ = source.http.eth().chain_id().await?;
        Ok(source)
    }

    fn block_to_header(block: Block<H256>) -> Result<BlockHeader, ChainSourceError> {
        let hash = block.hash.ok_or(ChainSourceError::IncompleteHeader)?;
        let number = block.number.ok_or(ChainSourceError::IncompleteHeader)?;
        Ok(BlockHeader {
            hash,
            parent_hash: block.parent_hash,
            number: number.as_u64(),
        })
    }

    fn web3_log_to_log(log: web3::types::Log) -> Option<Log> {
        Some(Log {
            block_hash: log.block_hash?,
            tx_hash: log.transaction_hash?,
            log_index: log.log_index?.as_u64(),
            tx_index: log.transaction_index?.as_u64(),
            address: log.address,
            topics: log.topics,
            data: log.data.0,
            removed: log.removed.unwrap_or(false),
        })
    }
}

#[async_trait]
impl ChainSource for Web3ChainSource {
    async fn latest_block_number(&self) -> Result<u64, ChainSourceError> {
        let number = tokio::time::timeout(REQUEST_TIMEOUT, self.http.eth().block_number()).await??;
        Ok(number.as_u64())
    }

    async fn header_by_number(&self, number: u64) -> Result<BlockHeader, ChainSourceError> {
        let timer = statistics::BLOCK_HEADER_LATENCY.start_timer();
        let block_id = BlockId::Number(BlockNumber::Number(number.into()));
        let block = tokio::time::timeout(REQUEST_TIMEOUT, self.http.eth().block(block_id))
            .await??
            .ok_or(ChainSourceError::IncompleteHeader)?;
        timer.observe_duration();
        Self::block_to_header(block)
    }

    async fn header_by_hash(&self, hash: H256) -> Result<BlockHeader, ChainSourceError> {
        let timer = statistics::BLOCK_HEADER_LATENCY.start_timer();
        let block = tokio::time::timeout(REQUEST_TIMEOUT, self.http.eth().block(BlockId::Hash(hash)))
            .await??
            .ok_or(ChainSourceError::NotFound(hash))?;
        timer.observe_duration();
        Self::block_to_header(block)
    }

    async fn logs_for_block(&self, hash: H256) -> Result<Vec<Log>, ChainSourceError> {
        let filter = FilterBuilder::default().block_hash(hash).build();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match tokio::time::timeout(REQUEST_TIMEOUT, self.http.eth().logs(filter.clone())).await {
                Ok(Ok(mut logs)) => {
                    logs.sort_by_key(|l| (l.transaction_index, l.log_index));
                    return Ok(logs.into_iter().filter_map(Self::web3_log_to_log).collect());
                }
                Ok(Err(err)) if attempt < LOGS_RETRIES => {
                    warn!(?err, attempt, "logs_for_block transient failure, retrying");
                    tokio::time::sleep(LOGS_RETRY_DELAY).await;
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(elapsed) if attempt < LOGS_RETRIES => {
                    warn!(?elapsed, attempt, "logs_for_block timed out, retrying");
                    tokio::time::sleep(LOGS_RETRY_DELAY).await;
                }
                Err(elapsed) => return Err(elapsed.into()),
            }
        }
    }

    async fn subscribe_new_heads(&self) -> Result<NewHeadSubscription, ChainSourceError> {
        let sub = EthSubscribe::new(self.ws.transport().clone())
            .subscribe_new_heads()
            .await?;

        let (header_tx, header_rx) = mpsc::channel(NEW_HEAD_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut sub = sub;
            loop {
                match sub.next().await {
                    Some(Ok(header)) => {
                        let Some(hash) = header.hash else { continue };
                        let Some(number) = header.number else { continue };
                        let translated = BlockHeader {
                            hash,
                            parent_hash: header.parent_hash,
                            number: number.as_u64(),
                        };
                        debug!(?hash, ?number, "new head received");
                        if header_tx.send(translated).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        error!(?err, "new-head subscription stream error");
                        let _ = err_tx.send(err.into());
                        return;
                    }
                    None => {
                        let _ = err_tx.send(ChainSourceError::EndOfStream);
                        return;
                    }
                }
            }
        });

        Ok(NewHeadSubscription { headers: header_rx, terminated: err_rx })
    }
}
