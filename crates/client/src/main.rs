use clap::Parser;
use moonwatch::cache::ResultCache;
use moonwatch::cli::{self, Cli};
use moonwatch::client::ChainClient;
use moonwatch::logging;
use moonwatch::moonbeam::MoonbeamClient;
use moonwatch::node::evm::HttpEvmNode;
use moonwatch::node::ws::WsNode;
use moonwatch_config::WatchConfig;
use rand::Rng;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = WatchConfig::from_env()?;
    let log_level = if args.debug {
        "debug"
    } else {
        &config.log.level
    };
    logging::init(log_level)?;

    let endpoint = moonwatch_config::get_chain(&args.chain)?;
    tracing::debug!("Chain: {}", endpoint.id);
    tracing::debug!("Log level: {}", log_level);

    let cache = if args.no_cache {
        ResultCache::disabled()
    } else {
        ResultCache::new(args.cache_path.clone())
    };
    let node = Arc::new(WsNode::new(
        endpoint.wss_endpoints.iter().map(|e| e.to_string()).collect(),
    ));
    let chain = ChainClient::new(node, cache, endpoint.id, endpoint.block_duration);
    let rpc_index = rand::rng().random_range(0..endpoint.eth_rpc_endpoints.len());
    let evm = Arc::new(HttpEvmNode::new(endpoint.eth_rpc_endpoints[rpc_index]));
    let client = MoonbeamClient::new(chain, evm, args.abi_dir.clone());

    cli::run(&client, args.command).await
}
