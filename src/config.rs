//! CLI/env configuration surface (§6): a `structopt` derive struct with
//! `env` fallbacks, doubled with prefixed flags for each monitored chain.

use structopt::StructOpt;
use url::Url;

use crate::event_service::EventServiceConfig;

/// Per-chain configuration, doubled at the top level for L1 and L2 with
/// `l1_`/`l2_` flag and env-var prefixes (the same flattening pattern the
/// teacher uses for its per-market option structs).
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Short tag used as the chain's Head Store key prefix component, e.g. "l1".
    pub chain_tag: String,
    pub network: String,
    pub rpc_http_url: Url,
    pub rpc_ws_url: Url,
    pub ring_capacity: usize,
    pub dedup_max_items: usize,
    pub dedup_false_positive_rate: f64,
    pub resubscribe_factor: u32,
    /// Where the embedded head-store database for this chain lives on disk.
    pub head_store_path: std::path::PathBuf,
}

impl ChainOptions {
    pub fn head_store_prefix(&self) -> String {
        format!("{}:{}", self.network, self.chain_tag)
    }

    pub fn event_service_config(&self) -> EventServiceConfig {
        EventServiceConfig {
            ring_capacity: self.ring_capacity,
            dedup_max_items: self.dedup_max_items,
            dedup_false_positive_rate: self.dedup_false_positive_rate,
            resubscribe_factor: self.resubscribe_factor,
        }
    }
}

#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
struct L1Args {
    #[structopt(long = "l1-chain-tag", env = "L1_CHAIN_TAG", default_value = "l1")]
    chain_tag: String,
    #[structopt(long = "l1-network", env = "L1_NETWORK", default_value = "mainnet")]
    network: String,
    #[structopt(long = "l1-rpc-http-url", env = "L1_RPC_HTTP_URL")]
    rpc_http_url: Url,
    #[structopt(long = "l1-rpc-ws-url", env = "L1_RPC_WS_URL")]
    rpc_ws_url: Url,
    #[structopt(long = "l1-ring-capacity", env = "L1_RING_CAPACITY", default_value = "64")]
    ring_capacity: usize,
    #[structopt(long = "l1-dedup-max-items", env = "L1_DEDUP_MAX_ITEMS", default_value = "60000")]
    dedup_max_items: usize,
    #[structopt(
        long = "l1-dedup-false-positive-rate",
        env = "L1_DEDUP_FALSE_POSITIVE_RATE",
        default_value = "0.00000001"
    )]
    dedup_false_positive_rate: f64,
    #[structopt(long = "l1-resubscribe-factor", env = "L1_RESUBSCRIBE_FACTOR", default_value = "10")]
    resubscribe_factor: u32,
    #[structopt(long = "l1-head-store-path", env = "L1_HEAD_STORE_PATH", default_value = "./data/l1")]
    head_store_path: std::path::PathBuf,
}

#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
struct L2Args {
    #[structopt(long = "l2-chain-tag", env = "L2_CHAIN_TAG", default_value = "l2")]
    chain_tag: String,
    #[structopt(long = "l2-network", env = "L2_NETWORK", default_value = "mainnet")]
    network: String,
    #[structopt(long = "l2-rpc-http-url", env = "L2_RPC_HTTP_URL")]
    rpc_http_url: Url,
    #[structopt(long = "l2-rpc-ws-url", env = "L2_RPC_WS_URL")]
    rpc_ws_url: Url,
    #[structopt(long = "l2-ring-capacity", env = "L2_RING_CAPACITY", default_value = "64")]
    ring_capacity: usize,
    #[structopt(long = "l2-dedup-max-items", env = "L2_DEDUP_MAX_ITEMS", default_value = "60000")]
    dedup_max_items: usize,
    #[structopt(
        long = "l2-dedup-false-positive-rate",
        env = "L2_DEDUP_FALSE_POSITIVE_RATE",
        default_value = "0.00000001"
    )]
    dedup_false_positive_rate: f64,
    #[structopt(long = "l2-resubscribe-factor", env = "L2_RESUBSCRIBE_FACTOR", default_value = "10")]
    resubscribe_factor: u32,
    #[structopt(long = "l2-head-store-path", env = "L2_HEAD_STORE_PATH", default_value = "./data/l2")]
    head_store_path: std::path::PathBuf,
}

/// Top-level options: one [`ChainOptions`] per monitored chain, plus the
/// process-wide ambient settings.
#[derive(StructOpt, Debug)]
#[structopt(name = "bridge-watcher")]
pub struct Options {
    #[structopt(flatten)]
    l1: L1Args,
    #[structopt(flatten)]
    l2: L2Args,

    /// Address the Prometheus metrics endpoint binds to.
    #[structopt(long, env, default_value = "0.0.0.0:9898")]
    pub metrics_address: std::net::SocketAddr,

    /// Webhook URL the notification sink posts formatted messages to.
    #[structopt(long, env)]
    pub webhook_url: Option<Url>,
}

impl Options {
    pub fn l1(&self) -> ChainOptions {
        self.l1.clone_to_chain_options()
    }

    pub fn l2(&self) -> ChainOptions {
        self.l2.clone_to_chain_options()
    }
}

impl L1Args {
    fn clone_to_chain_options(&self) -> ChainOptions {
        ChainOptions {
            chain_tag: self.chain_tag.clone(),
            network: self.network.clone(),
            rpc_http_url: self.rpc_http_url.clone(),
            rpc_ws_url: self.rpc_ws_url.clone(),
            ring_capacity: self.ring_capacity,
            dedup_max_items: self.dedup_max_items,
            dedup_false_positive_rate: self.dedup_false_positive_rate,
            resubscribe_factor: self.resubscribe_factor,
            head_store_path: self.head_store_path.clone(),
        }
    }
}

impl L2Args {
    fn clone_to_chain_options(&self) -> ChainOptions {
        ChainOptions {
            chain_tag: self.chain_tag.clone(),
            network: self.network.clone(),
            rpc_http_url: self.rpc_http_url.clone(),
            rpc_ws_url: self.rpc_ws_url.clone(),
            ring_capacity: self.ring_capacity,
            dedup_max_items: self.dedup_max_items,
            dedup_false_positive_rate: self.dedup_false_positive_rate,
            resubscribe_factor: self.resubscribe_factor,
            head_store_path: self.head_store_path.clone(),
        }
    }
}
