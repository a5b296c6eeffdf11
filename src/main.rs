use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chain::config::ChainConfig;
use chain::{ChainTable, CheckpointValidator, HeaderStore, MemoryHeaderStore};
use clap::Parser;
use fork_choice::{ChainComparator, LongestChain, MostWork, best_chain};
use metrics::Metrics;
use metrics::server::{MetricsServerConfig, run_metrics_server};
use networking::config::ServersConfig;
use networking::connection::ConnectionManager;
use networking::server::memory::{MemoryConnector, generate_chain};
use networking::sync::{
    BRIDGE_TIMEOUT_SECS, ForkOnKnownParent, IgnoreOrphans, OrphanPolicy, SyncConfig,
};
use networking::types::LiveSource;
use tokio::task;
use tracing::{info, warn};

/// Header synchronizer smoke test against simulated in-memory servers.
#[derive(Parser, Debug)]
struct Args {
    /// YAML server list. Defaults to a single local server.
    #[arg(short, long)]
    servers: Option<PathBuf>,

    /// Chain height the simulated servers start with.
    #[arg(long, default_value_t = 1_000)]
    simulate_height: u64,

    /// Seconds between simulated new headers.
    #[arg(long, default_value_t = 5)]
    block_interval: u64,

    /// Follow block notifications instead of header notifications.
    #[arg(long)]
    blocks: bool,

    /// Start a new fork for orphans whose parent is known.
    #[arg(long)]
    fork_orphans: bool,

    /// Pick the best chain by cumulative work instead of height.
    #[arg(long)]
    most_work: bool,

    /// Seconds a blocking connection-manager call may wait.
    #[arg(long, default_value_t = BRIDGE_TIMEOUT_SECS)]
    bridge_timeout: u64,

    #[arg(long)]
    metrics: bool,

    #[arg(long, default_value = "127.0.0.1")]
    metrics_address: IpAddr,

    #[arg(long, default_value_t = 5064)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let servers = match &args.servers {
        Some(path) => ServersConfig::load_from_file(path)?,
        None => ServersConfig::default(),
    };

    let chain_config = ChainConfig::regtest();
    let store: Arc<dyn HeaderStore> =
        Arc::new(MemoryHeaderStore::with_genesis(chain_config.genesis.clone()));
    let validator = Arc::new(CheckpointValidator::from_config(&chain_config));
    let chains = Arc::new(ChainTable::load(store, validator).context("loading header chains")?);

    let metrics = Arc::new(Metrics::new().context("registering metrics")?);
    if args.metrics {
        let config = MetricsServerConfig {
            metrics_address: args.metrics_address,
            metrics_port: args.metrics_port,
        };
        let metrics = metrics.clone();
        task::spawn(async move {
            if let Err(err) = run_metrics_server(config, metrics).await {
                warn!("Metrics server exited with error: {err:?}");
            }
        });
    }

    let sync_config = SyncConfig {
        live_source: if args.blocks {
            LiveSource::Blocks
        } else {
            LiveSource::Headers
        },
        ..SyncConfig::default()
    };

    let connector = Arc::new(MemoryConnector::new(generate_chain(
        &chain_config.genesis,
        args.simulate_height,
    )));
    let manager = ConnectionManager::new(connector.clone(), servers.endpoints())
        .with_config(sync_config)
        .with_metrics(metrics);

    // Exercise the blocking path the way a non-async caller would.
    let handle = manager
        .clone()
        .spawn(Duration::from_secs(args.bridge_timeout));
    let first = task::spawn_blocking(move || handle.connect_all())
        .await
        .context("bridge thread panicked")??;
    info!(server = %first, "Connected");

    let orphan_policy: Arc<dyn OrphanPolicy> = if args.fork_orphans {
        Arc::new(ForkOnKnownParent)
    } else {
        Arc::new(IgnoreOrphans)
    };
    let synchronizer = manager
        .synchronizer(chains.clone())
        .with_orphan_policy(orphan_policy);

    let monitors = synchronizer.run().await;

    let comparator: Box<dyn ChainComparator> = if args.most_work {
        Box::new(MostWork)
    } else {
        Box::new(LongestChain)
    };
    log_best_chain(&chains, comparator.as_ref());

    let interval = Duration::from_secs(args.block_interval.max(1));
    let supervisor = synchronizer.clone();
    let miner = task::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            // Servers that finished connecting since the last tick. Their
            // tasks stop with the synchronizer's shutdown.
            let late = supervisor.monitor_servers();
            if !late.is_empty() {
                info!(servers = late.len(), "Monitoring late servers");
            }
            for server in connector.servers() {
                server.mine(1);
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    miner.abort();
    synchronizer.shutdown();
    manager.disconnect_all().await;
    monitors.join().await;
    log_best_chain(&chains, comparator.as_ref());

    Ok(())
}

fn log_best_chain(chains: &ChainTable, comparator: &dyn ChainComparator) {
    match best_chain(chains, comparator) {
        Some(fork_height) => info!(
            fork_height,
            height = chains.height(fork_height),
            forks = chains.len(),
            "Best chain"
        ),
        None => warn!("No chains loaded"),
    }
}
