use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chain::{AppendOutcome, ChainError, ChainTable, ExtendOutcome};
use containers::Header;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::BoxStream;
use metrics::SharedMetrics;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
/// Chain synchronizer.
///
/// Keeps every local chain current against the connected servers:
/// 1. Matching: a server matches a chain when its header at the chain's
///    height links onto the chain at that height
/// 2. Catch-up: each chain is backfilled from its first matching server, one
///    header at a time, up to that server's tip
/// 3. Monitoring: one task per server feeds live headers into the chain table
///
/// All writes go through `ChainTable`, so catch-up and every monitor task can
/// run at once without breaking a chain.
use tracing::{debug, info, warn};

use super::{
    config::SyncConfig,
    orphan::{IgnoreOrphans, OrphanAction, OrphanPolicy},
    states::SyncState,
};
use crate::server::{ServerPool, SyncServer, adapter};
use crate::types::{LiveSource, ServerEndpoint};

/// What happened to one live header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderDisposition {
    /// Saved on top of the chain forked at this height.
    Appended(u64),
    /// Extended a tip but failed validation.
    Rejected(u64),
    /// Already stored.
    Duplicate,
    /// Started a new chain at this fork height.
    Forked(u64),
    Orphaned,
    /// The store refused the header, so no chain changed.
    NotPersisted,
}

/// Running monitor tasks, one per server.
pub struct MonitorHandle {
    tasks: Vec<(ServerEndpoint, JoinHandle<()>)>,
}

impl MonitorHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ServerEndpoint> {
        self.tasks.iter().map(|(endpoint, _)| endpoint)
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, task)| task.is_finished())
    }

    pub fn abort(&self) {
        for (_, task) in &self.tasks {
            task.abort();
        }
    }

    /// Wait for every monitor task to end.
    pub async fn join(self) {
        for (endpoint, task) in self.tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(server = %endpoint, "Monitor task failed: {err}");
                }
            }
        }
    }
}

#[derive(Clone)]
enum ServerSource {
    Fixed(Vec<SyncServer>),
    /// Read on every pass, so servers connected or added later are picked up.
    Pool(Arc<Mutex<ServerPool>>),
}

/// Removes a server from the monitored set when its task ends or is aborted.
struct MonitorGuard {
    monitored: Arc<Mutex<HashSet<ServerEndpoint>>>,
    endpoint: ServerEndpoint,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.monitored.lock().remove(&self.endpoint);
    }
}

#[derive(Clone)]
pub struct ChainSynchronizer {
    chains: Arc<ChainTable>,
    servers: ServerSource,
    config: SyncConfig,
    orphan_policy: Arc<dyn OrphanPolicy>,
    metrics: Option<SharedMetrics>,
    state: Arc<Mutex<SyncState>>,
    monitored: Arc<Mutex<HashSet<ServerEndpoint>>>,
    shutdown: CancellationToken,
}

impl ChainSynchronizer {
    /// Synchronize against a fixed list of servers.
    pub fn new(chains: Arc<ChainTable>, servers: impl IntoIterator<Item = SyncServer>) -> Self {
        let mut unique: Vec<SyncServer> = Vec::new();
        for server in servers {
            if !unique.contains(&server) {
                unique.push(server);
            }
        }

        Self::with_source(chains, ServerSource::Fixed(unique))
    }

    /// Synchronize against whatever `pool` holds at the time of each pass.
    pub fn with_pool(chains: Arc<ChainTable>, pool: Arc<Mutex<ServerPool>>) -> Self {
        Self::with_source(chains, ServerSource::Pool(pool))
    }

    fn with_source(chains: Arc<ChainTable>, servers: ServerSource) -> Self {
        Self {
            chains,
            servers,
            config: SyncConfig::default(),
            orphan_policy: Arc::new(IgnoreOrphans),
            metrics: None,
            state: Arc::new(Mutex::new(SyncState::default())),
            monitored: Arc::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_orphan_policy(mut self, policy: Arc<dyn OrphanPolicy>) -> Self {
        self.orphan_policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn chains(&self) -> &Arc<ChainTable> {
        &self.chains
    }

    pub fn servers(&self) -> Vec<SyncServer> {
        match &self.servers {
            ServerSource::Fixed(servers) => servers.clone(),
            ServerSource::Pool(pool) => pool.lock().servers().cloned().collect(),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Stop catch-up and every monitor task started by this synchronizer or
    /// its clones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Catch up, then keep monitoring every connected server.
    pub async fn run(&self) -> MonitorHandle {
        self.catch_up().await;
        self.monitor_servers()
    }

    /// For every chain, the connected servers that match it, in pool order.
    ///
    /// Every chain is a key, possibly with no servers. All chain/server
    /// pairs are probed concurrently.
    pub async fn blockchain_servers_pairs(&self) -> BTreeMap<u64, Vec<SyncServer>> {
        let fork_heights = self.chains.fork_heights();
        let candidates: Vec<SyncServer> = self
            .servers()
            .into_iter()
            .filter(SyncServer::is_connected)
            .collect();

        let mut probes = Vec::with_capacity(fork_heights.len() * candidates.len());
        for &fork_height in &fork_heights {
            for server in &candidates {
                probes.push(async move {
                    let matched = self.is_matching(fork_height, server).await;
                    (fork_height, server, matched)
                });
            }
        }

        let mut pairs: BTreeMap<u64, Vec<SyncServer>> = fork_heights
            .into_iter()
            .map(|fork_height| (fork_height, Vec::new()))
            .collect();

        for (fork_height, server, matched) in join_all(probes).await {
            if matched {
                if let Some(servers) = pairs.get_mut(&fork_height) {
                    servers.push(server.clone());
                }
            }
        }

        for (fork_height, servers) in &pairs {
            debug!(
                fork_height,
                matching = servers.len(),
                "Matched servers to chain"
            );
        }

        pairs
    }

    /// Bring every chain up to the tip of its first matching server.
    ///
    /// Returns the number of headers saved per chain that had a match.
    /// Chains without a matching server are left untouched.
    pub async fn catch_up(&self) -> BTreeMap<u64, usize> {
        self.transition(SyncState::Syncing);
        let started = Instant::now();

        let mut saved = BTreeMap::new();
        for (fork_height, servers) in self.blockchain_servers_pairs().await {
            let Some(server) = servers.into_iter().next() else {
                info!(fork_height, "No matching server for chain");
                continue;
            };

            let count = self.catch_up_chain(fork_height, &server).await;
            saved.insert(fork_height, count);
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_catch_up_duration(started.elapsed().as_secs_f64());
        }

        self.transition(if saved.is_empty() {
            SyncState::Idle
        } else {
            SyncState::Synced
        });

        saved
    }

    /// Start one monitor task per connected server.
    ///
    /// Servers this synchronizer already monitors are skipped, so calling it
    /// again after more servers connect only starts the missing tasks.
    pub fn monitor_servers(&self) -> MonitorHandle {
        let tasks = self
            .servers()
            .into_iter()
            .filter(|server| server.is_connected())
            .filter(|server| self.monitored.lock().insert(server.endpoint().clone()))
            .map(|server| {
                let endpoint = server.endpoint().clone();
                let guard = MonitorGuard {
                    monitored: self.monitored.clone(),
                    endpoint: endpoint.clone(),
                };
                let synchronizer = self.clone();
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    synchronizer.monitor_server(server).await;
                });
                (endpoint, task)
            })
            .collect();

        MonitorHandle { tasks }
    }

    /// Route one live header.
    ///
    /// In order: extend the first chain tip it links onto (lowest fork
    /// height first), ignore it if already stored, otherwise hand it to the
    /// orphan policy.
    pub fn process_header(&self, header: &Header) -> HeaderDisposition {
        match self.chains.extend_any(header) {
            Ok(ExtendOutcome::Saved(fork_height)) => {
                self.record_saved(fork_height, header.height, "monitor");
                return HeaderDisposition::Appended(fork_height);
            }
            Ok(ExtendOutcome::Rejected(fork_height)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_headers_rejected("monitor");
                }
                return HeaderDisposition::Rejected(fork_height);
            }
            Ok(ExtendOutcome::NoMatch) => {}
            Err(err) => {
                warn!(height = header.height, "Live header not saved: {err}");
                return HeaderDisposition::NotPersisted;
            }
        }

        if self.chains.contains(header) {
            debug!(height = header.height, "Ignoring duplicate header");
            if let Some(metrics) = &self.metrics {
                metrics.inc_headers_duplicate();
            }
            return HeaderDisposition::Duplicate;
        }

        let action = self.orphan_policy.on_orphan(header, &self.chains);
        if let Some(metrics) = &self.metrics {
            metrics.inc_headers_orphaned(action.as_str());
        }

        match action {
            OrphanAction::Drop => {
                debug!(
                    height = header.height,
                    hash = %header.hash(),
                    "Dropping orphan header"
                );
                HeaderDisposition::Orphaned
            }
            OrphanAction::Fork { parent } => match self.chains.insert_fork(parent, header.clone()) {
                Ok(fork_height) => {
                    self.record_saved(fork_height, header.height, "fork");
                    HeaderDisposition::Forked(fork_height)
                }
                Err(err @ ChainError::Store(_)) => {
                    warn!(height = header.height, parent, "Fork header not saved: {err}");
                    HeaderDisposition::NotPersisted
                }
                Err(err) => {
                    debug!(height = header.height, parent, "Could not fork on orphan: {err}");
                    HeaderDisposition::Orphaned
                }
            },
        }
    }

    async fn is_matching(&self, fork_height: u64, server: &SyncServer) -> bool {
        let Some(height) = self.chains.height(fork_height) else {
            return false;
        };

        // A server behind the chain cannot match it, and asking it for a
        // header it does not have would count as a failure.
        match server.last_height(self.config.request_timeout).await {
            Ok(server_tip) if server_tip >= height => {}
            Ok(_) => return false,
            Err(err) => {
                debug!(fork_height, server = %server.endpoint(), "Match probe failed: {err:#}");
                return false;
            }
        }

        match server.fetch_header(height, self.config.request_timeout).await {
            Ok(header) => self
                .chains
                .with_chain(fork_height, |chain| chain.can_connect(&header, false))
                .unwrap_or(false),
            Err(err) => {
                debug!(fork_height, server = %server.endpoint(), "Match probe failed: {err:#}");
                false
            }
        }
    }

    async fn catch_up_chain(&self, fork_height: u64, server: &SyncServer) -> usize {
        let timeout = self.config.request_timeout;
        let server_tip = match server.last_height(timeout).await {
            Ok(height) => height,
            Err(err) => {
                warn!(fork_height, server = %server.endpoint(), "Catch-up skipped: {err:#}");
                return 0;
            }
        };

        let token = server.shutdown_token();
        info!(
            fork_height,
            server = %server.endpoint(),
            from = self.chains.height(fork_height),
            to = server_tip,
            "Catching up chain"
        );

        let mut saved = 0;
        loop {
            if token.is_cancelled() || self.shutdown.is_cancelled() {
                info!(fork_height, "Catch-up cancelled");
                break;
            }

            let Some(height) = self.chains.height(fork_height) else {
                break;
            };
            if height >= server_tip {
                break;
            }
            let next = height + 1;

            let header = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(fork_height, "Catch-up cancelled");
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    info!(fork_height, "Catch-up cancelled");
                    break;
                }
                result = server.fetch_header(next, timeout) => match result {
                    Ok(header) => header,
                    Err(err) => {
                        warn!(fork_height, server = %server.endpoint(), "Catch-up stopped: {err:#}");
                        break;
                    }
                }
            };

            match self.chains.append(fork_height, header) {
                Ok(AppendOutcome::Saved) => {
                    saved += 1;
                    self.record_saved(fork_height, next, "catch_up");
                }
                Ok(AppendOutcome::AlreadyStored) => {
                    debug!(fork_height, height = next, "Header already stored");
                }
                Ok(AppendOutcome::Rejected) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_headers_rejected("catch_up");
                    }
                    warn!(
                        fork_height,
                        height = next,
                        server = %server.endpoint(),
                        "Stopping catch-up at invalid header"
                    );
                    break;
                }
                Ok(AppendOutcome::NotConnected) => {
                    warn!(
                        fork_height,
                        height = next,
                        server = %server.endpoint(),
                        "Server header does not extend chain, stopping catch-up"
                    );
                    break;
                }
                Err(err) => {
                    warn!(fork_height, "Catch-up stopped: {err}");
                    break;
                }
            }
        }

        info!(
            fork_height,
            saved,
            height = self.chains.height(fork_height),
            "Catch-up finished"
        );
        saved
    }

    async fn monitor_server(self, server: SyncServer) {
        let token = server.shutdown_token();
        let mut headers = match self.live_headers(&server).await {
            Ok(headers) => headers,
            Err(err) => {
                server.mark_failed(&err);
                return;
            }
        };

        info!(
            server = %server.endpoint(),
            source = ?self.config.live_source,
            "Monitoring server"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(server = %server.endpoint(), "Monitor stopped");
                    break;
                }
                _ = self.shutdown.cancelled() => break,
                next = headers.next() => match next {
                    Some(header) => {
                        self.process_header(&header);
                    }
                    None => {
                        server.mark_failed(&anyhow!("live subscription ended"));
                        break;
                    }
                }
            }
        }
    }

    async fn live_headers(&self, server: &SyncServer) -> Result<BoxStream<'static, Header>> {
        let timeout = self.config.request_timeout;
        let transport = server.transport();

        let headers = match self.config.live_source {
            LiveSource::Headers => tokio::time::timeout(timeout, transport.subscribe_to_headers())
                .await
                .context("subscribing to headers timed out")??
                .boxed(),
            LiveSource::Blocks => adapter::block_headers(
                tokio::time::timeout(timeout, transport.subscribe_to_blocks())
                    .await
                    .context("subscribing to blocks timed out")??,
            ),
        };

        Ok(headers)
    }

    fn record_saved(&self, fork_height: u64, height: u64, source: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_headers_saved(source);
            metrics.set_chain_height(fork_height, height);
        }
    }

    fn transition(&self, target: SyncState) {
        let mut state = self.state.lock();
        if *state == target {
            return;
        }
        if state.can_transition_to(target) {
            info!(from = ?*state, to = ?target, "Sync state changed");
            *state = target;
        } else {
            debug!(from = ?*state, to = ?target, "Ignoring sync state change");
        }
    }
}
