#![warn(clippy::all)]

mod allocator;

use std::sync::Arc;

use anyhow::{Context, Result};
use bridge_watcher::{
    chain_source::{ChainSource, Web3ChainSource},
    config::Options,
    event_service::EventService,
    head_store::{HeadStore, SledHeadStore},
    logging,
    metrics_server,
    shutdown,
    subscription::SubscriptionTable,
};
use dotenv::dotenv;
use structopt::StructOpt;
use tokio::{runtime, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[global_allocator]
static ALLOCATOR: allocator::Allocator = allocator::Allocator;

/// Runs one Chain Pipeline end to end: connect, bootstrap, backfill, go live.
/// Subscriptions are empty for now — wiring real bridge-event subscriptions
/// in requires the ABI decoders and notification sink named as external
/// collaborators in §4.8, which this binary only stubs.
async fn run_pipeline(name: String, options: bridge_watcher::config::ChainOptions, cancel: CancellationToken) -> Result<()> {
    let source: Box<dyn ChainSource> = Box::new(
        Web3ChainSource::connect(&options.rpc_http_url, &options.rpc_ws_url)
            .await
            .with_context(|| format!("connecting chain source for pipeline {name}"))?,
    );
    let head_store: Box<dyn HeadStore> =
        Box::new(SledHeadStore::open(&options.head_store_path).with_context(|| format!("opening head store for pipeline {name}"))?);

    let mut service = EventService::make(
        name.clone(),
        source.as_ref(),
        head_store.as_ref(),
        options.head_store_prefix(),
        SubscriptionTable::new(),
        options.event_service_config(),
    )
    .await
    .with_context(|| format!("bootstrapping pipeline {name}"))?;

    service.run(&cancel).await.with_context(|| format!("pipeline {name} failed"))?;
    Ok(())
}

fn main() -> Result<()> {
    dotenv().ok();
    let options = Arc::new(Options::from_args());
    logging::init();

    runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(async move {
            let cancel = CancellationToken::new();
            shutdown::spawn_signal_handler(cancel.clone());

            let metrics_address = options.metrics_address;
            tokio::spawn(async move {
                if let Err(err) = metrics_server::run(metrics_address).await {
                    error!(?err, "metrics server exited");
                }
            });

            let mut pipelines = JoinSet::new();
            pipelines.spawn(run_pipeline("l1".to_owned(), options.l1(), cancel.clone()));
            pipelines.spawn(run_pipeline("l2".to_owned(), options.l2(), cancel.clone()));

            let mut first_error = None;
            while let Some(result) = pipelines.join_next().await {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(?err, "pipeline returned a fatal error, cancelling sibling");
                        cancel.cancel();
                        first_error.get_or_insert(err);
                    }
                    Err(join_err) => {
                        error!(?join_err, "pipeline task panicked, cancelling sibling");
                        cancel.cancel();
                        first_error.get_or_insert(anyhow::anyhow!(join_err));
                    }
                }
            }

            match first_error {
                Some(err) => Err(err),
                None => {
                    info!("all pipelines exited cleanly");
                    Ok(())
                }
            }
        })
}
