//! The orchestrator (C7): startup backfill, live subscription with
//! auto-resubscribe, reorg resolution, and log dispatch.
//!
//! The phase split (backfill producer/consumer, then live subscription) and
//! the "dispatch first, then persist" ordering mandated by §9 are built on
//! tokio tasks and an mpsc channel.

use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoffBuilder};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    block_keeper::BlockKeeper,
    chain_source::ChainSource,
    dedup::DedupFilter,
    error::PipelineError,
    head_store::HeadStore,
    statistics,
    subscription::SubscriptionTable,
    types::{zero_hash, NewBlock},
};

/// Blocks per backfill batch (§4.7 Phase A).
const BACKFILL_BATCH_SIZE: u64 = 10;
/// Back-off growth factor on a lost live subscription (§6).
const DEFAULT_RESUBSCRIBE_FACTOR: u32 = 10;
const RESUBSCRIBE_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX_INTERVAL: Duration = Duration::from_secs(300);

pub struct EventServiceConfig {
    pub ring_capacity: usize,
    pub dedup_max_items: usize,
    pub dedup_false_positive_rate: f64,
    pub resubscribe_factor: u32,
}

impl Default for EventServiceConfig {
    fn default() -> Self {
        Self {
            ring_capacity: crate::block_keeper::DEFAULT_RING_CAPACITY,
            dedup_max_items: crate::dedup::DEFAULT_MAX_ITEMS,
            dedup_false_positive_rate: crate::dedup::DEFAULT_FALSE_POSITIVE_RATE,
            resubscribe_factor: DEFAULT_RESUBSCRIBE_FACTOR,
        }
    }
}

pub struct EventService<'a> {
    name: String,
    source: &'a dyn ChainSource,
    keeper: BlockKeeper<'a>,
    subscriptions: SubscriptionTable,
    dedup: DedupFilter,
    config: EventServiceConfig,
}

impl<'a> EventService<'a> {
    pub async fn make(
        name: impl Into<String>,
        source: &'a dyn ChainSource,
        head_store: &'a dyn HeadStore,
        head_store_prefix: impl Into<String>,
        subscriptions: SubscriptionTable,
        config: EventServiceConfig,
    ) -> Result<EventService<'a>, PipelineError> {
        let keeper = BlockKeeper::bootstrap(source, head_store, head_store_prefix, config.ring_capacity).await?;
        let dedup = DedupFilter::new(config.dedup_max_items, config.dedup_false_positive_rate);
        Ok(Self { name: name.into(), source, keeper, subscriptions, dedup, config })
    }

    /// Not idempotent: runs backfill then the live subscription loop until
    /// `cancel` fires or a fatal error occurs.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        self.backfill(cancel).await?;
        self.live(cancel).await
    }

    /// Phase A: produce-consume backfill of blocks between the persisted
    /// head and the live tip, over an unbuffered channel so the producer's
    /// rate matches the consumer's (§5 back-pressure).
    async fn backfill(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let consumed = self.keeper.head().map(|h| h.number).unwrap_or(0);
        let tip = self.source.latest_block_number().await?;
        if consumed >= tip {
            return Ok(());
        }

        info!(pipeline = %self.name, consumed, tip, "starting backfill");
        // tokio's mpsc requires capacity >= 1; 1 is the closest approximation
        // of an unbuffered channel, so the producer's rate matches the
        // consumer's (§5 back-pressure).
        let (tx, mut rx) = mpsc::channel::<NewBlock>(1);
        let source = self.source;
        let cancel_producer = cancel.clone();

        // Driven via `tokio::join!` rather than `tokio::spawn`: `source` only
        // borrows for `'a`, which a spawned task's `'static` bound can't
        // accept, and polling both futures on the same task is enough to get
        // the overlap this back-pressured hand-off needs.
        let producer = async move {
            let mut from = consumed + 1;
            while from <= tip {
                if cancel_producer.is_cancelled() {
                    return Ok(());
                }
                let to = (from + BACKFILL_BATCH_SIZE - 1).min(tip);
                let blocks = source.fetch_blocks(from, to, true).await?;
                for block in blocks {
                    if tx.send(block).await.is_err() {
                        return Ok(());
                    }
                }
                from = to + 1;
            }
            Ok::<_, PipelineError>(())
        };

        let consumer = async {
            while let Some(block) = rx.recv().await {
                self.handle_new_block(block).await?;
            }
            Ok::<_, PipelineError>(())
        };

        let (producer_result, consumer_result) = tokio::join!(producer, consumer);
        producer_result?;
        consumer_result?;
        info!(pipeline = %self.name, "backfill complete");
        Ok(())
    }

    /// Phase B: live subscription with bounded-back-off auto-resubscribe.
    async fn live(&mut self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(RESUBSCRIBE_INITIAL_INTERVAL)
            .with_multiplier(f64::from(self.config.resubscribe_factor))
            .with_max_interval(RESUBSCRIBE_MAX_INTERVAL)
            .with_max_elapsed_time(None)
            .build();

        loop {
            statistics::CONNECTION_ATTEMPTS.with_label_values(&[&self.name]).inc();
            let mut sub = match self.source.subscribe_new_heads().await {
                Ok(sub) => sub,
                Err(err) => {
                    let delay = backoff.next_backoff().unwrap_or(RESUBSCRIBE_MAX_INTERVAL);
                    warn!(pipeline = %self.name, ?err, ?delay, "failed to establish live subscription, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };
            backoff.reset();
            info!(pipeline = %self.name, "live subscription established");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(pipeline = %self.name, "shutdown requested, stopping live subscription");
                        return Ok(());
                    }
                    header = sub.headers.recv() => {
                        let Some(header) = header else { break };
                        let logs = self.source.logs_for_block(header.hash).await?;
                        self.handle_new_block(NewBlock { header, logs, reorged_block_hash: zero_hash() }).await?;
                    }
                    err = &mut sub.terminated => {
                        if let Ok(err) = err {
                            error!(pipeline = %self.name, ?err, "live subscription terminated");
                        }
                        break;
                    }
                }
            }

            let delay = backoff.next_backoff().unwrap_or(RESUBSCRIBE_MAX_INTERVAL);
            warn!(pipeline = %self.name, ?delay, "resubscribing after back-off");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Serialization point: computes any reorg replay, then dispatches and
    /// persists each block in order (dispatch first, then persist — §9).
    async fn handle_new_block(&mut self, block: NewBlock) -> Result<(), PipelineError> {
        let (reorg_chain, superseded) = self.keeper.compute_reorg_chain(&block.header).await?;

        let mut ordered = Vec::with_capacity(reorg_chain.len() + 1);
        if !reorg_chain.is_empty() {
            statistics::REORGS_DETECTED.with_label_values(&[&self.name]).inc();
            statistics::REORG_DEPTH.observe(reorg_chain.len() as f64);
            let fetches = reorg_chain.iter().map(|header| self.source.logs_for_block(header.hash));
            let logs = futures::future::try_join_all(fetches).await?;
            for ((header, logs), superseded_hash) in reorg_chain.into_iter().zip(logs).zip(superseded) {
                info!(pipeline = %self.name, number = header.number, hash = ?header.hash, "replaying reorg ancestor");
                ordered.push(NewBlock { header, logs, reorged_block_hash: superseded_hash });
            }
        }
        ordered.push(block);

        for block in ordered {
            self.dispatch_logs(&block.logs);
            self.keeper.set_head(block.header, block.reorged_block_hash).await;
            statistics::BLOCKS_PROCESSED.with_label_values(&[&self.name]).inc();
        }
        Ok(())
    }

    fn dispatch_logs(&mut self, logs: &[crate::types::Log]) {
        for log in logs {
            if log.topics.is_empty() || log.removed {
                continue;
            }
            let Some(key) = crate::types::SubscriptionKey::of_log(log) else { continue };
            let Some(subscription) = self.subscriptions.get(&key) else { continue };

            let fingerprint = log.fingerprint();
            if self.dedup.test(&fingerprint) {
                statistics::LOGS_DEDUPLICATED.inc();
                continue;
            }
            self.dedup.add(&fingerprint);
            statistics::LOGS_DISPATCHED.inc();
            subscription.callback(log);
        }
    }
}

#[cfg(test)]
mod tests {
    use web3::types::{H160, H256};

    use super::*;
    use crate::{
        head_store::MemoryHeadStore,
        testutil::{hash_of, FakeChainSource, RecordingSubscription},
        types::{BlockHeader, SubscriptionKey},
    };

    fn log_for(hash: H256, address: H160, topic0: H256, log_index: u64) -> crate::types::Log {
        crate::types::Log {
            block_hash: hash,
            tx_hash: H256::repeat_byte(0xAB),
            log_index,
            tx_index: 0,
            address,
            topics: vec![topic0],
            data: vec![],
            removed: false,
        }
    }

    fn tiny_config() -> EventServiceConfig {
        EventServiceConfig { ring_capacity: 8, dedup_max_items: 100, dedup_false_positive_rate: 1e-6, resubscribe_factor: 10 }
    }

    /// Cold start, no persisted head.
    #[tokio::test]
    async fn cold_start_populates_head_store_with_no_dispatch() {
        let source = FakeChainSource::linear(1000);
        let store = MemoryHeadStore::new();
        let service =
            EventService::make("l1", &source, &store, "net:l1", SubscriptionTable::new(), tiny_config()).await.unwrap();

        assert_eq!(service.keeper.head().unwrap().number, 1000);
        assert_eq!(store.get_head("net:l1").await.unwrap(), Some(hash_of(1000)));
    }

    /// Warm start, 5 blocks behind — backfill dispatches matching logs in order.
    #[tokio::test]
    async fn warm_start_backfill_dispatches_matching_logs_in_order() {
        let source = FakeChainSource::linear(1000);
        let address = H160::repeat_byte(1);
        let topic0 = H256::repeat_byte(2);
        for n in 996..=1000u64 {
            source.set_logs(hash_of(n), vec![log_for(hash_of(n), address, topic0, 0)]);
        }

        let store = MemoryHeadStore::new();
        store.set_head("net:l1", hash_of(995)).await.unwrap();

        let mut subscriptions = SubscriptionTable::new();
        let (subscription, received) = RecordingSubscription::new(SubscriptionKey::new(address, topic0));
        subscriptions.add(subscription);

        let mut service = EventService::make("l1", &source, &store, "net:l1", subscriptions, tiny_config()).await.unwrap();
        let cancel = CancellationToken::new();
        service.backfill(&cancel).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 5);
        assert_eq!(received.iter().map(|l| l.block_hash).collect::<Vec<_>>(), (996..=1000u64).map(hash_of).collect::<Vec<_>>());
        assert_eq!(store.get_head("net:l1").await.unwrap(), Some(hash_of(1000)));
    }

    /// Live new head with one matching and one non-matching log.
    #[tokio::test]
    async fn live_new_head_dispatches_only_the_matching_log() {
        let source = FakeChainSource::linear(1000);
        let address = H160::repeat_byte(1);
        let topic0 = H256::repeat_byte(2);

        let store = MemoryHeadStore::new();
        let mut subscriptions = SubscriptionTable::new();
        let (subscription, received) = RecordingSubscription::new(SubscriptionKey::new(address, topic0));
        subscriptions.add(subscription);

        let mut service = EventService::make("l1", &source, &store, "net:l1", subscriptions, tiny_config()).await.unwrap();

        let new_header = BlockHeader { hash: hash_of(1001), parent_hash: hash_of(1000), number: 1001 };
        source.insert(new_header.clone());
        let matching = log_for(hash_of(1001), address, topic0, 0);
        let non_matching = log_for(hash_of(1001), H160::repeat_byte(9), H256::repeat_byte(9), 1);
        let block = NewBlock { header: new_header, logs: vec![matching.clone(), non_matching], reorged_block_hash: zero_hash() };

        service.handle_new_block(block).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].log_index, matching.log_index);
        assert_eq!(store.get_head("net:l1").await.unwrap(), Some(hash_of(1001)));
    }

    /// Reorg depth 2 — ancestor dispatched before the triggering head.
    #[tokio::test]
    async fn reorg_depth_two_dispatches_ancestor_before_new_head() {
        let source = FakeChainSource::linear(1000);
        let address = H160::repeat_byte(1);
        let topic0 = H256::repeat_byte(2);

        let h1001a = hash_of(1001);
        source.insert(BlockHeader { hash: h1001a, parent_hash: hash_of(1000), number: 1001 });

        let store = MemoryHeadStore::new();
        store.set_head("net:l1", h1001a).await.unwrap();

        let mut subscriptions = SubscriptionTable::new();
        let (subscription, received) = RecordingSubscription::new(SubscriptionKey::new(address, topic0));
        subscriptions.add(subscription);

        let mut service = EventService::make("l1", &source, &store, "net:l1", subscriptions, tiny_config()).await.unwrap();

        let mut bytes = [0xFFu8; 32];
        bytes[24..].copy_from_slice(&1001u64.to_be_bytes());
        let h1001b = H256::from(bytes);
        source.insert(BlockHeader { hash: h1001b, parent_hash: hash_of(1000), number: 1001 });
        source.set_logs(h1001b, vec![log_for(h1001b, address, topic0, 0)]);

        let mut bytes2 = [0xFFu8; 32];
        bytes2[24..].copy_from_slice(&1002u64.to_be_bytes());
        let h1002 = H256::from(bytes2);
        let new_header = BlockHeader { hash: h1002, parent_hash: h1001b, number: 1002 };
        source.insert(new_header.clone());
        source.set_logs(h1002, vec![log_for(h1002, address, topic0, 0)]);

        let block = NewBlock { header: new_header, logs: vec![log_for(h1002, address, topic0, 0)], reorged_block_hash: zero_hash() };
        service.handle_new_block(block).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].block_hash, h1001b);
        assert_eq!(received[1].block_hash, h1002);
        assert_eq!(store.get_head("net:l1").await.unwrap(), Some(h1002));
    }

    /// A redelivered identical header (e.g. after a resubscribe) dispatches no callback twice.
    #[tokio::test]
    async fn redelivered_head_does_not_dispatch_twice() {
        let source = FakeChainSource::linear(1000);
        let address = H160::repeat_byte(1);
        let topic0 = H256::repeat_byte(2);

        let store = MemoryHeadStore::new();
        let mut subscriptions = SubscriptionTable::new();
        let (subscription, received) = RecordingSubscription::new(SubscriptionKey::new(address, topic0));
        subscriptions.add(subscription);

        let mut service = EventService::make("l1", &source, &store, "net:l1", subscriptions, tiny_config()).await.unwrap();

        let new_header = BlockHeader { hash: hash_of(1001), parent_hash: hash_of(1000), number: 1001 };
        source.insert(new_header.clone());
        let log = log_for(hash_of(1001), address, topic0, 0);

        service
            .handle_new_block(NewBlock { header: new_header.clone(), logs: vec![log.clone()], reorged_block_hash: zero_hash() })
            .await
            .unwrap();
        // Simulated redelivery after a resubscribe.
        service
            .handle_new_block(NewBlock { header: new_header, logs: vec![log], reorged_block_hash: zero_hash() })
            .await
            .unwrap();

        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(store.get_head("net:l1").await.unwrap(), Some(hash_of(1001)));
    }

    /// Crash between dispatch and persist — on restart with a fresh dedup
    /// filter, reprocessing the same block dispatches again (the acknowledged
    /// at-least-once delivery boundary across a crash/restart).
    #[tokio::test]
    async fn restart_with_fresh_dedup_redispatches_unpersisted_block() {
        let source = FakeChainSource::linear(1000);
        let address = H160::repeat_byte(1);
        let topic0 = H256::repeat_byte(2);
        source.set_logs(hash_of(1001), vec![log_for(hash_of(1001), address, topic0, 0)]);
        source.insert(BlockHeader { hash: hash_of(1001), parent_hash: hash_of(1000), number: 1001 });
        source.set_tip(1001);

        // First process: dispatches but "crashes" before the head store
        // commit is observed by a fresh instance (we model the crash by
        // simply never persisting past 1000 in a *second* store).
        let store_a = MemoryHeadStore::new();
        let mut subs_a = SubscriptionTable::new();
        let (sub_a, received_a) = RecordingSubscription::new(SubscriptionKey::new(address, topic0));
        subs_a.add(sub_a);
        let mut service_a = EventService::make("l1", &source, &store_a, "net:l1", subs_a, tiny_config()).await.unwrap();
        let cancel = CancellationToken::new();
        service_a.backfill(&cancel).await.unwrap();
        assert_eq!(received_a.lock().unwrap().len(), 1);

        // Restart: a fresh store still reports the pre-crash head (995-style
        // scenario), fresh dedup filter, same block reprocessed.
        let store_b = MemoryHeadStore::new();
        store_b.set_head("net:l1", hash_of(1000)).await.unwrap();
        let mut subs_b = SubscriptionTable::new();
        let (sub_b, received_b) = RecordingSubscription::new(SubscriptionKey::new(address, topic0));
        subs_b.add(sub_b);
        let mut service_b = EventService::make("l1", &source, &store_b, "net:l1", subs_b, tiny_config()).await.unwrap();
        service_b.backfill(&cancel).await.unwrap();

        assert_eq!(received_b.lock().unwrap().len(), 1);
        assert_eq!(store_b.get_head("net:l1").await.unwrap(), Some(hash_of(1001)));
    }
}
